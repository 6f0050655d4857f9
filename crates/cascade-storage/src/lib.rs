//! Persistence and cache collaborators for the Cascade engine
//!
//! Two seams live here:
//!
//! - [`ExecutionStore`]: workflows, executions, and their append-only log
//!   lines. Backed by PostgreSQL in production ([`PgExecutionStore`]) and by
//!   an in-memory map with identical semantics ([`MemoryExecutionStore`])
//!   for tests and single-process runs.
//! - [`Cache`]: the key-value JSON store with TTL plus publish/subscribe,
//!   backed by Redis ([`RedisCache`]) or in-process channels
//!   ([`MemoryCache`]).

pub mod cache;
pub mod memory;
pub mod postgres;
pub mod redis_cache;
pub mod store;

pub use cache::{Cache, CacheError, EventStream, MemoryCache};
pub use memory::MemoryExecutionStore;
pub use postgres::PgExecutionStore;
pub use redis_cache::RedisCache;
pub use store::{ExecutionStore, StoreError, StoredWorkflow};
