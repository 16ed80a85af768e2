//! Task executor port - the unit of work a worker variant supplies.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ArbiterIdentity, ArbiterRole, CapabilitySet, Task, TaskOutput};

/// Work performed by an arbiter for each dequeued task.
///
/// The execution core owns queueing, retries, the breaker and persistence;
/// executors only turn one task into one output.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    fn role(&self) -> ArbiterRole;

    /// Capabilities this executor can back. The arbiter's declared set is
    /// intersected with this.
    fn capabilities(&self) -> CapabilitySet;

    async fn execute(&self, task: &Task) -> DomainResult<TaskOutput>;

    /// Build a sibling executor tuned by the given trait values.
    fn derive(&self, traits: &BTreeMap<String, f64>) -> Self
    where
        Self: Sized;
}

/// Scores a freshly derived arbiter before it is promoted.
#[async_trait]
pub trait FitnessEvaluator: Send + Sync {
    async fn evaluate(&self, candidate: &ArbiterIdentity) -> DomainResult<f64>;
}
