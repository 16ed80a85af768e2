//! Worker variants an arbiter can run.
//!
//! The set is closed: each kind of work is a variant of [`Worker`] and new
//! kinds are added here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::cognitive_router::CognitiveRouter;
use super::perception;
use crate::domain::errors::DomainResult;
use crate::domain::models::{ArbiterRole, Capability, CapabilitySet, Task, TaskOutput};
use crate::domain::ports::TaskExecutor;

/// Capabilities provided by the execution core itself, independent of the
/// worker variant.
const CORE_CAPABILITIES: [Capability; 2] = [Capability::Cloning, Capability::Evolution];

/// Answers each task's query through the cognitive router.
#[derive(Clone)]
pub struct RoutingWorker {
    router: Arc<CognitiveRouter>,
}

impl RoutingWorker {
    pub fn new(router: Arc<CognitiveRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<CognitiveRouter> {
        &self.router
    }
}

#[async_trait]
impl TaskExecutor for RoutingWorker {
    fn role(&self) -> ArbiterRole {
        ArbiterRole::CognitiveRouter
    }

    fn capabilities(&self) -> CapabilitySet {
        let mut caps: CapabilitySet = [
            Capability::CognitiveRouting,
            Capability::Perception,
            Capability::Escalation,
        ]
        .into_iter()
        .chain(CORE_CAPABILITIES)
        .collect();
        if self.router.config().reflection_enabled {
            caps.insert(Capability::Reflection);
        }
        caps
    }

    async fn execute(&self, task: &Task) -> DomainResult<TaskOutput> {
        let outcome = self.router.process_query(&task.query, &task.context).await;

        let mut metadata = HashMap::new();
        metadata.insert("trace_id".to_string(), outcome.trace_id.to_string().into());
        metadata.insert("best_source".to_string(), outcome.best_source.clone().into());
        metadata.insert("domain".to_string(), outcome.perception.domain.as_str().into());
        metadata.insert("escalated".to_string(), outcome.escalated.into());
        metadata.insert("safety_flagged".to_string(), outcome.safety_flagged.into());

        Ok(TaskOutput {
            confidence: outcome.confidence,
            iterations: outcome.iterations,
            payload: serde_json::to_value(&outcome)?,
            metadata,
        })
    }

    /// Share the generators but retune the router from the given traits.
    fn derive(&self, traits: &BTreeMap<String, f64>) -> Self {
        let config = self.router.config().clone().with_traits(traits);
        let mut router = CognitiveRouter::new(
            self.router.name(),
            self.router.generators().clone(),
            config,
        );
        if let Some(bus) = self.router.bus() {
            router = router.with_bus(bus.clone());
        }
        Self::new(Arc::new(router))
    }
}

/// Classifies each task's query without generating an answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptionWorker;

#[async_trait]
impl TaskExecutor for PerceptionWorker {
    fn role(&self) -> ArbiterRole {
        ArbiterRole::Perception
    }

    fn capabilities(&self) -> CapabilitySet {
        std::iter::once(Capability::Perception)
            .chain(CORE_CAPABILITIES)
            .collect()
    }

    async fn execute(&self, task: &Task) -> DomainResult<TaskOutput> {
        let result = perception::classify(&task.query);
        Ok(TaskOutput {
            payload: serde_json::to_value(&result)?,
            // Classification is deterministic
            confidence: 1.0,
            iterations: 0,
            metadata: HashMap::new(),
        })
    }

    fn derive(&self, _traits: &BTreeMap<String, f64>) -> Self {
        Self
    }
}

/// Every worker kind an arbiter can be built around.
#[derive(Clone)]
pub enum Worker {
    CognitiveRouter(RoutingWorker),
    Perception(PerceptionWorker),
}

impl Worker {
    pub fn routing(router: Arc<CognitiveRouter>) -> Self {
        Self::CognitiveRouter(RoutingWorker::new(router))
    }

    pub fn perception() -> Self {
        Self::Perception(PerceptionWorker)
    }
}

#[async_trait]
impl TaskExecutor for Worker {
    fn role(&self) -> ArbiterRole {
        match self {
            Self::CognitiveRouter(w) => w.role(),
            Self::Perception(w) => w.role(),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        match self {
            Self::CognitiveRouter(w) => w.capabilities(),
            Self::Perception(w) => w.capabilities(),
        }
    }

    async fn execute(&self, task: &Task) -> DomainResult<TaskOutput> {
        match self {
            Self::CognitiveRouter(w) => w.execute(task).await,
            Self::Perception(w) => w.execute(task).await,
        }
    }

    fn derive(&self, traits: &BTreeMap<String, f64>) -> Self {
        match self {
            Self::CognitiveRouter(w) => Self::CognitiveRouter(w.derive(traits)),
            Self::Perception(w) => Self::Perception(w.derive(traits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::ScriptedGenerator;
    use crate::domain::models::{QueryOutcome, RouterConfig};
    use crate::services::cognitive_router::GeneratorSet;

    fn routing_worker() -> Worker {
        let generators = GeneratorSet::new(
            Arc::new(ScriptedGenerator::answering("div", "divergent take", 0.9)),
            Arc::new(ScriptedGenerator::answering("con", "convergent take", 0.9)),
        );
        Worker::routing(Arc::new(CognitiveRouter::new(
            "router",
            generators,
            RouterConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_routing_worker_returns_outcome_payload() {
        let worker = routing_worker();
        let output = worker
            .execute(&Task::new("debug this function error"))
            .await
            .unwrap();

        let outcome: QueryOutcome = serde_json::from_value(output.payload).unwrap();
        assert_eq!(outcome.answer, "convergent take");
        assert!((output.confidence - outcome.confidence).abs() < f64::EPSILON);
        assert_eq!(output.metadata["domain"], "technical");
    }

    #[tokio::test]
    async fn test_perception_worker() {
        let output = Worker::perception()
            .execute(&Task::new("imagine a creative story about dragons"))
            .await
            .unwrap();
        assert_eq!(output.payload["domain"], "creative");
        assert_eq!(Worker::perception().role(), ArbiterRole::Perception);
    }

    #[test]
    fn test_capabilities() {
        let routing = routing_worker().capabilities();
        assert!(routing.contains(&Capability::CognitiveRouting));
        assert!(routing.contains(&Capability::Reflection));

        let perception = Worker::perception().capabilities();
        assert!(perception.contains(&Capability::Perception));
        assert!(!perception.contains(&Capability::CognitiveRouting));
    }

    #[test]
    fn test_derive_retunes_router() {
        let mut traits = BTreeMap::new();
        traits.insert("max_iterations".to_string(), 1.0);
        let Worker::CognitiveRouter(child) = routing_worker().derive(&traits) else {
            panic!("expected routing worker");
        };
        assert_eq!(child.router().config().max_iterations, 1);
    }
}
