//! Governance task workflow and the run executors
//!
//! - `task`: the task state machine (assign, respond, complete, review)
//! - `sync`: sync task execution through a pluggable connector
//! - `quality`: quality check execution through a pluggable evaluator

pub mod quality;
pub mod sync;
pub mod task;

pub use quality::{QualityExecutor, SimulatedEvaluator};
pub use sync::{NoopConnector, SyncExecutor};
pub use task::{RespondAction, ReviewAction, TaskWorkflow};
