pub mod document_fetcher;
pub mod environment_models;
pub mod environment_service;
pub mod environment_store;
pub mod refresh;
