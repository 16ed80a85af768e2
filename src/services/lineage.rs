//! Deriving child arbiters from a parent identity.
//!
//! Cloning is a pure factory over identities: the child gets a fresh id,
//! the next generation number, the parent's name appended to its lineage
//! and any trait overrides recorded as mutations. Evolution adds a fitness
//! gate on top.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ArbiterIdentity, ContextEntry, MutationRecord};
use crate::domain::ports::FitnessEvaluator;

/// Score an evolved child must exceed to be promoted.
pub const FITNESS_THRESHOLD: f64 = 0.7;

/// What to change when deriving a child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloneOverrides {
    /// Child name; defaults to `<parent>-g<generation>`
    pub name: Option<String>,
    /// Trait values to set on the child
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,
    /// Copy the parent's recent context history into the child
    #[serde(default)]
    pub copy_context: bool,
}

impl CloneOverrides {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_trait(mut self, name: impl Into<String>, value: f64) -> Self {
        self.traits.insert(name.into(), value);
        self
    }

    pub fn with_context(mut self) -> Self {
        self.copy_context = true;
        self
    }
}

/// Build a child identity from its parent.
pub fn derive_identity(
    parent: &ArbiterIdentity,
    overrides: &CloneOverrides,
    now: DateTime<Utc>,
) -> ArbiterIdentity {
    let generation = parent.generation + 1;
    let name = overrides
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-g{generation}", parent.name));

    let mut lineage = parent.lineage.clone();
    lineage.push(parent.name.clone());

    let mut traits = parent.traits.clone();
    let mut mutations = parent.mutations.clone();
    for (trait_name, &value) in &overrides.traits {
        let previous = traits.insert(trait_name.clone(), value);
        if previous != Some(value) {
            mutations.push(MutationRecord {
                trait_name: trait_name.clone(),
                from: previous,
                to: value,
                generation,
                at: now,
            });
        }
    }

    let mut child = ArbiterIdentity {
        id: Uuid::new_v4(),
        name,
        role: parent.role,
        capabilities: parent.capabilities.clone(),
        version: parent.version.clone(),
        generation,
        parent_id: Some(parent.id),
        lineage,
        traits,
        dna: parent.dna.clone(),
        mutations,
        evolution_log: Vec::new(),
        created_at: now,
    };
    child.refresh_dna();
    child
}

/// Context entries a child inherits when `copy_context` is set.
pub fn inherited_context(
    parent_history: &[ContextEntry],
    overrides: &CloneOverrides,
) -> Vec<ContextEntry> {
    if overrides.copy_context {
        parent_history.to_vec()
    } else {
        Vec::new()
    }
}

/// Result of an evolution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvolutionOutcome {
    /// The child scored above the threshold and was kept.
    Promoted {
        child: ArbiterIdentity,
        score: f64,
    },
    /// The child was not promoted. Nothing is rolled back.
    Underperformed {
        child_name: String,
        score: f64,
    },
}

impl EvolutionOutcome {
    pub fn score(&self) -> f64 {
        match self {
            Self::Promoted { score, .. } | Self::Underperformed { score, .. } => *score,
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}

pub fn passes_fitness(score: f64) -> bool {
    score > FITNESS_THRESHOLD
}

/// Evaluator that scores every candidate at 0.5.
///
/// With the default threshold this never promotes; plug in a real
/// evaluator to make evolution meaningful.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralFitness;

impl NeutralFitness {
    pub const SCORE: f64 = 0.5;
}

#[async_trait]
impl FitnessEvaluator for NeutralFitness {
    async fn evaluate(&self, _candidate: &ArbiterIdentity) -> DomainResult<f64> {
        Ok(Self::SCORE)
    }
}

/// Evaluator returning a fixed score.
#[derive(Debug, Clone, Copy)]
pub struct FixedFitness(pub f64);

#[async_trait]
impl FitnessEvaluator for FixedFitness {
    async fn evaluate(&self, _candidate: &ArbiterIdentity) -> DomainResult<f64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ArbiterRole, Capability};

    fn parent() -> ArbiterIdentity {
        let caps = [Capability::CognitiveRouting, Capability::Cloning]
            .into_iter()
            .collect();
        let mut traits = BTreeMap::new();
        traits.insert("finalize_threshold".to_string(), 0.85);
        ArbiterIdentity::new("router", ArbiterRole::CognitiveRouter, caps, "1.0.0")
            .with_traits(traits)
    }

    #[test]
    fn test_derive_identity_advances_generation_and_lineage() {
        let parent = parent();
        let now = Utc::now();
        let child = derive_identity(&parent, &CloneOverrides::default(), now);

        assert_ne!(child.id, parent.id);
        assert_eq!(child.name, "router-g1");
        assert_eq!(child.generation, 1);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.lineage, vec!["router".to_string()]);
        assert!(child.mutations.is_empty());
        assert_eq!(child.dna.fingerprint, parent.dna.fingerprint);
        assert_eq!(child.created_at, now);

        let grandchild = derive_identity(&child, &CloneOverrides::named("deep"), now);
        assert_eq!(grandchild.generation, 2);
        assert_eq!(grandchild.lineage, vec!["router".to_string(), "router-g1".to_string()]);
        assert_eq!(grandchild.name, "deep");
    }

    #[test]
    fn test_trait_overrides_recorded_as_mutations() {
        let parent = parent();
        let overrides = CloneOverrides::default()
            .with_trait("finalize_threshold", 0.9)
            .with_trait("max_iterations", 5.0);
        let child = derive_identity(&parent, &overrides, Utc::now());

        assert_eq!(child.mutations.len(), 2);
        let finalize = child
            .mutations
            .iter()
            .find(|m| m.trait_name == "finalize_threshold")
            .unwrap();
        assert_eq!(finalize.from, Some(0.85));
        assert!((finalize.to - 0.9).abs() < f64::EPSILON);
        assert_eq!(finalize.generation, 1);
        assert_ne!(child.dna.fingerprint, parent.dna.fingerprint);
    }

    #[test]
    fn test_unchanged_override_is_not_a_mutation() {
        let parent = parent();
        let overrides = CloneOverrides::default().with_trait("finalize_threshold", 0.85);
        let child = derive_identity(&parent, &overrides, Utc::now());
        assert!(child.mutations.is_empty());
    }

    #[test]
    fn test_inherited_context() {
        let history = vec![ContextEntry {
            task_id: Uuid::new_v4(),
            query: "q".to_string(),
            confidence: 0.8,
            duration_ms: 10,
            completed_at: Utc::now(),
        }];
        assert!(inherited_context(&history, &CloneOverrides::default()).is_empty());
        assert_eq!(
            inherited_context(&history, &CloneOverrides::default().with_context()).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_neutral_fitness_never_promotes() {
        let score = NeutralFitness.evaluate(&parent()).await.unwrap();
        assert!((score - 0.5).abs() < f64::EPSILON);
        assert!(!passes_fitness(score));
        assert!(!passes_fitness(FITNESS_THRESHOLD));
        assert!(passes_fitness(0.71));
    }
}
