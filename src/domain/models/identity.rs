//! Arbiter identity, lineage and persisted state.
//!
//! An identity is created once, persisted on every structural change and
//! reloaded at startup so that generation numbers and lineage survive
//! restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Closed set of worker roles. New kinds are added here at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterRole {
    CognitiveRouter,
    Perception,
}

impl ArbiterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CognitiveRouter => "cognitive_router",
            Self::Perception => "perception",
        }
    }
}

impl std::fmt::Display for ArbiterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared capabilities. Dispatch checks are plain set membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CognitiveRouting,
    Perception,
    Reflection,
    Escalation,
    Cloning,
    Evolution,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CognitiveRouting => "cognitive_routing",
            Self::Perception => "perception",
            Self::Reflection => "reflection",
            Self::Escalation => "escalation",
            Self::Cloning => "cloning",
            Self::Evolution => "evolution",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cognitive_routing" => Some(Self::CognitiveRouting),
            "perception" => Some(Self::Perception),
            "reflection" => Some(Self::Reflection),
            "escalation" => Some(Self::Escalation),
            "cloning" => Some(Self::Cloning),
            "evolution" => Some(Self::Evolution),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

/// Content-derived snapshot of what makes an arbiter behave the way it does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dna {
    pub role: ArbiterRole,
    pub capabilities: Vec<Capability>,
    pub traits: BTreeMap<String, f64>,
    /// Hex SHA-256 over the canonical JSON of the fields above
    pub fingerprint: String,
}

impl Dna {
    pub fn compute(
        role: ArbiterRole,
        capabilities: &CapabilitySet,
        traits: &BTreeMap<String, f64>,
    ) -> Self {
        let capabilities: Vec<Capability> = capabilities.iter().copied().collect();
        let canonical = serde_json::json!({
            "role": role,
            "capabilities": capabilities,
            "traits": traits,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Self {
            role,
            capabilities,
            traits: traits.clone(),
            fingerprint: hex::encode(digest),
        }
    }

    /// First 12 hex chars, enough for display.
    pub fn short(&self) -> &str {
        self.fingerprint.get(..12).unwrap_or(&self.fingerprint)
    }
}

/// One trait change applied while deriving a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub trait_name: String,
    pub from: Option<f64>,
    pub to: f64,
    /// Generation of the arbiter that received the mutation
    pub generation: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionKind {
    Cloned,
    Promoted,
    Underperformed,
}

/// Entry in an arbiter's evolution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub kind: EvolutionKind,
    pub child_id: Uuid,
    pub child_name: String,
    pub child_generation: u32,
    pub fitness: Option<f64>,
    pub at: DateTime<Utc>,
}

/// Identity of one arbiter, including its ancestry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterIdentity {
    pub id: Uuid,
    pub name: String,
    pub role: ArbiterRole,
    pub capabilities: CapabilitySet,
    pub version: String,
    pub generation: u32,
    pub parent_id: Option<Uuid>,
    /// Ancestor names, oldest first
    pub lineage: Vec<String>,
    pub traits: BTreeMap<String, f64>,
    pub dna: Dna,
    pub mutations: Vec<MutationRecord>,
    pub evolution_log: Vec<EvolutionEvent>,
    pub created_at: DateTime<Utc>,
}

impl ArbiterIdentity {
    pub fn new(
        name: impl Into<String>,
        role: ArbiterRole,
        capabilities: CapabilitySet,
        version: impl Into<String>,
    ) -> Self {
        let traits = BTreeMap::new();
        let dna = Dna::compute(role, &capabilities, &traits);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            capabilities,
            version: version.into(),
            generation: 0,
            parent_id: None,
            lineage: Vec::new(),
            traits,
            dna,
            mutations: Vec::new(),
            evolution_log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_traits(mut self, traits: BTreeMap<String, f64>) -> Self {
        self.traits = traits;
        self.refresh_dna();
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Recompute the DNA after traits or capabilities changed.
    pub fn refresh_dna(&mut self) {
        self.dna = Dna::compute(self.role, &self.capabilities, &self.traits);
    }

    /// Durable storage key for this arbiter's snapshot.
    pub fn state_key(&self) -> String {
        state_key(&self.name)
    }
}

/// Durable storage key for an arbiter name.
pub fn state_key(name: &str) -> String {
    format!("arbiter:{name}")
}

/// Execution metrics accumulated over an arbiter's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbiterMetrics {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub last_active: Option<DateTime<Utc>>,
}

impl ArbiterMetrics {
    pub fn record_success(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.tasks_succeeded += 1;
        self.record(duration, at);
    }

    pub fn record_failure(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.tasks_failed += 1;
        self.record(duration, at);
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    fn record(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.tasks_processed += 1;
        let n = self.tasks_processed as f64;
        let ms = duration.as_secs_f64() * 1000.0;
        self.avg_duration_ms += (ms - self.avg_duration_ms) / n;
        self.success_rate = self.tasks_succeeded as f64 / n;
        self.last_active = Some(at);
    }
}

/// Summary of a completed task kept in the bounded context history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub task_id: Uuid,
    pub query: String,
    pub confidence: f64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Terminal failure kept in the bounded error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub task_id: Uuid,
    pub kind: String,
    pub message: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Everything an arbiter writes to the durable state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterSnapshot {
    pub identity: ArbiterIdentity,
    pub metrics: ArbiterMetrics,
    #[serde(default)]
    pub context_history: Vec<ContextEntry>,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilitySet {
        [Capability::CognitiveRouting, Capability::Cloning]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_dna_is_deterministic_and_trait_sensitive() {
        let mut traits = BTreeMap::new();
        let a = Dna::compute(ArbiterRole::CognitiveRouter, &caps(), &traits);
        let b = Dna::compute(ArbiterRole::CognitiveRouter, &caps(), &traits);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);

        traits.insert("finalize_threshold".to_string(), 0.9);
        let c = Dna::compute(ArbiterRole::CognitiveRouter, &caps(), &traits);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(c.short().len(), 12);
    }

    #[test]
    fn test_metrics_rolling_values() {
        let mut m = ArbiterMetrics::default();
        let now = Utc::now();
        m.record_success(Duration::from_millis(100), now);
        m.record_failure(Duration::from_millis(300), now);
        assert_eq!(m.tasks_processed, 2);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!((m.avg_duration_ms - 200.0).abs() < 1e-9);
        assert_eq!(m.last_active, Some(now));
    }

    #[test]
    fn test_identity_capability_check() {
        let identity = ArbiterIdentity::new("a", ArbiterRole::CognitiveRouter, caps(), "1.0.0");
        assert!(identity.has_capability(Capability::Cloning));
        assert!(!identity.has_capability(Capability::Evolution));
        assert_eq!(identity.state_key(), "arbiter:a");
        assert_eq!(identity.generation, 0);
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!(Capability::from_str("Cloning"), Some(Capability::Cloning));
        assert_eq!(Capability::from_str("teleport"), None);
    }
}
