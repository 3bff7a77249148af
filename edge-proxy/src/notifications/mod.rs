pub mod change_store;
pub mod stream;
