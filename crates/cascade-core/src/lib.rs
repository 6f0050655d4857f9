//! Core data model for the Cascade workflow engine
//!
//! This crate is I/O-free: workflow graph types, the condition DSL
//! evaluator, parameter templating, and the execution/job/event records
//! shared by the engine, storage, and API crates.

pub mod condition;
pub mod error;
pub mod events;
pub mod execution;
pub mod job;
pub mod template;
pub mod workflow;

pub use condition::{evaluate, lookup_path};
pub use error::ValidationError;
pub use events::{ExecutionEvent, JobStatusUpdate};
pub use execution::{Execution, ExecutionLog, ExecutionStatus, LogStatus};
pub use job::{Job, JobStatus, JobType};
pub use workflow::{Edge, Node, NodeType, Trigger, WorkflowDefinition};
