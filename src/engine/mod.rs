pub mod context;
pub mod dispatch;
pub mod executor;
pub mod recovery;
pub mod runner;
pub mod scope;
pub mod types;

pub use executor::WorkflowEngine;
