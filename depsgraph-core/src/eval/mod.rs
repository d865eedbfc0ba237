//! Evaluation
//!
//! [`scheduler`] orders the dirty operations of a graph; [`executor`] runs
//! them through host supplied [`OperationBody`] implementations.

pub mod executor;
pub mod scheduler;

pub use executor::{CancellationToken, EvalReport, Evaluator, OperationBody, OperationContext};
pub use scheduler::{dirty_operations, schedule, Schedule};
