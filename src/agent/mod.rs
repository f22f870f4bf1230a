pub mod engine;
pub mod handlers;
pub mod intent;
pub mod tools;

pub use engine::{Route, TurnOutcome, Workflow, WorkflowError};
