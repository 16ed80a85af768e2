//! Generation domain models.
//!
//! Generators are external text-generation backends. Each response they
//! produce is tagged with the role it played so fusion can weight it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::perception::PerceptionResult;
use super::task::duration_ms;

/// Confidence assigned to a response whose generator call failed.
pub const FAILED_RESPONSE_CONFIDENCE: f64 = 0.1;

/// Upper bound for any blended confidence.
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Role a generator plays in the fusion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorRole {
    /// Exploratory, favoured for novel input
    Divergent,
    /// Focused, favoured for familiar input
    Convergent,
    /// Higher-trust integrator used for escalation
    Arbiter,
}

impl GeneratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Divergent => "divergent",
            Self::Convergent => "convergent",
            Self::Arbiter => "arbiter",
        }
    }
}

impl std::fmt::Display for GeneratorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline phase a generator call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Initial,
    Critique,
    Expand,
    Escalation,
}

impl GenerationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Critique => "critique",
            Self::Expand => "expand",
            Self::Escalation => "escalation",
        }
    }
}

impl std::fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context object passed alongside a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub phase: GenerationPhase,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl GenerationContext {
    pub fn new(phase: GenerationPhase) -> Self {
        Self {
            phase,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// What a generator returns on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

impl Generation {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
        }
    }
}

/// One generator invocation as seen by fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorResponse {
    /// Unique within a query, e.g. `divergent-initial-0`
    pub id: String,
    pub role: GeneratorRole,
    /// Name of the generator instance that answered
    pub generator: String,
    pub phase: GenerationPhase,
    pub text: String,
    pub confidence: f64,
    pub rationale: Option<String>,
    /// Set when the call failed and this is a placeholder
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl GeneratorResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of one fusion pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedAnswer {
    pub text: String,
    pub confidence: f64,
    /// Response id of the best-scoring source
    pub best_source: String,
    /// Normalized weight per response id
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub safety_flagged: bool,
    #[serde(default)]
    pub escalated: bool,
}

/// Audit trail entry describing one response that fed an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub source: String,
    pub role: GeneratorRole,
    pub generator: String,
    pub phase: GenerationPhase,
    pub confidence: f64,
    pub weight: Option<f64>,
    pub snippet: String,
    pub error: bool,
}

/// Introspection entry appended after every routed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtRecord {
    pub trace_id: Uuid,
    pub query: String,
    pub perception: PerceptionResult,
    pub responses: usize,
    pub iterations: u32,
    pub confidence: f64,
    pub escalated: bool,
    pub safety_flagged: bool,
    pub timestamp: DateTime<Utc>,
}

/// What `process_query` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub trace_id: Uuid,
    pub answer: String,
    pub confidence: f64,
    pub best_source: String,
    pub provenance: Vec<ProvenanceEntry>,
    pub perception: PerceptionResult,
    pub iterations: u32,
    pub escalated: bool,
    pub safety_flagged: bool,
}
