//! # honeyqueue
//!
//! A demand-driven, distributed background-job processing pool.
//!
//! ## Overview
//!
//! `honeyqueue` gives every pool a durable queue backend, a fixed set of
//! worker monitors pulling jobs one at a time, and a submission API for
//! fire-and-forget or reply-expecting work. Swap backends (in-memory,
//! AMQP) without changing application code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use honeyqueue::{
//!     backend::memory::MemoryBackend, pool, registry::PoolRegistry, failure_mode::MemoryFailureMode,
//!     types::{OwnerId, PoolConfig, PoolId, Task},
//!     worker::WorkerModule, error::Result,
//! };
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl WorkerModule for Greeter {
//!     type State = ();
//!
//!     async fn init(&self) -> Result<Self::State> {
//!         Ok(())
//!     }
//!
//!     async fn call(&self, _state: &Self::State, task: &honeyqueue::types::Task) -> Result<serde_json::Value> {
//!         Ok(serde_json::json!(format!("hello, {}", task.method_name())))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let registry = Arc::new(PoolRegistry::new());
//! let config = PoolConfig::new(PoolId::local("greeters")).with_workers(2);
//!
//! let submission = pool::start(
//!     config,
//!     backend,
//!     Arc::new(Greeter),
//!     Arc::new(MemoryFailureMode::default()),
//!     registry,
//! )
//! .await?;
//!
//! let owner = OwnerId::new("caller-1");
//! let request_id = submission.submit(owner.clone(), Task::method("world")).await?;
//! let result = submission.await_result(&owner, request_id, Duration::from_secs(5)).await?;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **memory** — in-memory backend for testing and embedded use
//! - **amqp** — a real AMQP broker connection via `amqprs`
//!
//! ## Architecture
//!
//! - **QueueBackend** trait — core abstraction all backends implement
//! - **queue::QueueHandle** — demand-driven producer sitting in front of a backend
//! - **monitor** — owns the worker lease and turns crashes into failure-mode calls
//! - **submission::Pool** — caller-facing submit/await_result facade
//! - **registry::Registry** — `(PoolId, Role) -> [Member]` lookup table

pub mod backend;
pub mod error;
pub mod failure_mode;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod submission;
pub mod types;
pub mod worker;

pub use error::{JobError, Result};
pub use submission::Pool;
pub use types::{Job, JobResult, OwnerId, PoolConfig, PoolId, PoolStatus, Role, Task};
pub use worker::WorkerModule;

pub use backend::memory::MemoryBackend;
pub use backend::{BackendInfo, Delivery, QueueBackend};
