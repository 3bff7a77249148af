pub mod engine;
pub mod mappers;
pub mod memoizer;
