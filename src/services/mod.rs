pub mod arbiter_core;
pub mod circuit_breaker;
pub mod cognitive_router;
pub mod event_bus;
pub mod fusion;
pub mod lineage;
pub mod perception;
pub mod safety_gate;
pub mod task_queue;
pub mod workers;

pub use arbiter_core::{
    ArbiterCore, ArbiterDeps, ArbiterStatus, Evolved, ProcessOutcome, TaskHandle, TaskRequest,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitCheckResult, CircuitState, CircuitStats,
    GuardedGenerator,
};
pub use cognitive_router::{CognitiveRouter, GeneratorSet, RouterStats};
pub use event_bus::{Envelope, EventBus, EventBusConfig, Subscription, TopicSubscription};
pub use fusion::{fuse, FusionError};
pub use lineage::{
    derive_identity, CloneOverrides, EvolutionOutcome, FixedFitness, NeutralFitness,
    FITNESS_THRESHOLD,
};
pub use perception::classify;
pub use task_queue::TaskQueue;
pub use workers::{PerceptionWorker, RoutingWorker, Worker};
