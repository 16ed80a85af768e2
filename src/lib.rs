//! Arbiter - supervised workers with multi-generator answer fusion
//!
//! An arbiter is a named, long-lived worker that pulls tasks from a bounded
//! priority queue and runs each one through a circuit breaker, a timeout
//! race and exponential-backoff retries. The routing worker answers a query
//! by classifying it, consulting a divergent and a convergent generator,
//! fusing their answers, reflecting until confident and escalating to an
//! arbiter generator when confidence stays low. Identity and lineage are
//! persisted so a restarted arbiter keeps its generation.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, error taxonomy and port traits
//! - **Service Layer** (`services`): execution core, breaker, router, fusion
//! - **Adapters** (`adapters`): HTTP generators, SQLite and in-memory stores, clocks
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use arbiter::adapters::{clock::SystemClock, memory::InMemoryStateStore};
//! use arbiter::services::{ArbiterCore, ArbiterDeps, EventBus, Worker};
//!
//! let deps = ArbiterDeps {
//!     clock: Arc::new(SystemClock),
//!     bus: Arc::new(EventBus::default()),
//!     store: Arc::new(InMemoryStateStore::new()),
//! };
//! let arbiter = Arc::new(ArbiterCore::new(&config, Worker::perception(), deps));
//! arbiter.initialize().await?;
//! let handle = arbiter.submit(arbiter.task("classify me")).await?;
//! arbiter.drain().await;
//! let result = handle.wait().await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ArbiterIdentity, Config, PerceptionResult, QueryOutcome, Task, TaskPriority, TaskResult,
    TaskStatus,
};
pub use domain::ports::{Clock, Generator, StateStore, TaskExecutor};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ArbiterCore, CognitiveRouter, EventBus, Worker};
