pub mod api;
pub mod config;
pub mod environments;
pub mod evaluation;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod router;
pub mod server;

// Shared with the integration tests under tests/, so it is compiled into the library.
pub mod test_utils;
