pub mod config;
pub mod generation;
pub mod identity;
pub mod perception;
pub mod task;

pub use config::{
    ArbiterConfig, CircuitBreakerConfig, Config, DatabaseConfig, GeneratorBackend,
    GeneratorConfig, GeneratorsConfig, LogFormat, LoggingConfig, RetryConfig, RotationPolicy,
    RouterConfig, TaskConfig,
};
pub use generation::{
    FusedAnswer, Generation, GenerationContext, GenerationPhase, GeneratorResponse,
    GeneratorRole, ProvenanceEntry, QueryOutcome, ThoughtRecord, FAILED_RESPONSE_CONFIDENCE,
    MAX_CONFIDENCE,
};
pub use identity::{
    state_key, ArbiterIdentity, ArbiterMetrics, ArbiterRole, ArbiterSnapshot, Capability,
    CapabilitySet, ContextEntry, Dna, ErrorLogEntry, EvolutionEvent, EvolutionKind,
    MutationRecord,
};
pub use perception::{PerceptionResult, QueryDomain};
pub use task::{Task, TaskOutput, TaskPriority, TaskResult, TaskStatus};
