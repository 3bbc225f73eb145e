pub mod api;
pub mod builders;
pub mod cli;
pub mod engine;
pub mod storage;
