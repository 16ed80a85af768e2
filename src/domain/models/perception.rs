//! Perception output attached to every routed query.

use serde::{Deserialize, Serialize};

/// Coarse domain tag assigned by the perception classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDomain {
    Medical,
    Technical,
    Creative,
    #[default]
    General,
}

impl QueryDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Technical => "technical",
            Self::Creative => "creative",
            Self::General => "general",
        }
    }

    /// Fixed risk estimate per domain.
    pub const fn risk(self) -> f64 {
        match self {
            Self::Medical => 0.9,
            Self::Technical => 0.2,
            Self::Creative | Self::General => 0.1,
        }
    }
}

impl std::fmt::Display for QueryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    /// Saturating length signal in [0, 1]
    pub novelty: f64,
    pub domain: QueryDomain,
    pub risk: f64,
    /// Word count of the query
    pub token_length: usize,
    pub complexity: f64,
}
