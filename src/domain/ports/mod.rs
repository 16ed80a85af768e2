//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces adapters implement:
//! - Generator: text-generation backends
//! - StateStore: durable snapshot storage
//! - Clock: wall-clock reads and sleeps
//! - TaskExecutor / FitnessEvaluator: worker variants and evolution scoring

pub mod clock;
pub mod generator;
pub mod state_store;
pub mod task_executor;

pub use clock::Clock;
pub use generator::Generator;
pub use state_store::StateStore;
pub use task_executor::{FitnessEvaluator, TaskExecutor};
