//! Execution and scheduling engine for Cascade
//!
//! The pieces, wired together once at startup and passed by reference:
//!
//! - [`ActionRegistry`]: name → async handler map with the built-in
//!   actions (`delay`, `notify`, `http_request`, `email`,
//!   `check_ticket_assigned`)
//! - [`WorkflowExecutor`]: walks a node graph with conditional edges,
//!   per-node retry, and event emission
//! - [`JobScheduler`]: owns deferred jobs and the dispatch loop
//! - [`EventBus`]: fans execution/job events out to local subscribers and
//!   the external realtime bridge
//! - [`EmailMonitor`]: observes the mailer's pub/sub lifecycle events

pub mod actions;
pub mod bus;
pub mod executor;
pub mod mail;
pub mod monitor;
pub mod realtime;
pub mod scheduler;

pub use actions::{ActionDeps, ActionError, ActionRegistry, Context};
pub use bus::{EventBus, Subscription};
pub use executor::{ExecutorError, WorkflowExecutor};
pub use mail::{EmailReceipt, Mailer, MemoryMailer};
pub use monitor::EmailMonitor;
pub use realtime::{bridge_from_key, AblyBridge, NoopBridge, RealtimeBridge};
pub use scheduler::{BoundFn, JobScheduler, SchedulerConfig};
