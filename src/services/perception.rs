//! Perception classifier.
//!
//! A fast, deterministic heuristic that tags a query with a domain, a
//! novelty score and a risk estimate. No I/O and no learned state.

use crate::domain::models::{PerceptionResult, QueryDomain};

const MEDICAL_KEYWORDS: &[&str] = &[
    "allergy", "blood", "cancer", "diagnose", "diagnosis", "disease", "doctor", "dosage",
    "dose", "drug", "drugs", "fever", "health", "illness", "infection", "medical",
    "medication", "medicine", "pain", "patient", "pregnancy", "pregnant", "prescription",
    "surgery", "symptom", "symptoms", "therapy", "treatment", "vaccine",
];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "algorithm", "api", "bug", "code", "coding", "compile", "compiler", "crash", "database",
    "debug", "deploy", "error", "exception", "function", "kernel", "memory", "network",
    "program", "programming", "python", "query", "rust", "server", "software", "sql",
    "stack", "thread",
];

const CREATIVE_KEYWORDS: &[&str] = &[
    "art", "character", "creative", "dragon", "dragons", "dream", "fantasy", "fiction",
    "imagine", "invent", "lyrics", "metaphor", "novel", "paint", "plot", "poem", "song",
    "story", "write",
];

/// Words at which novelty saturates.
const NOVELTY_SATURATION_WORDS: f64 = 20.0;

/// Classify a query. Identical input always yields an identical result.
pub fn classify(query: &str) -> PerceptionResult {
    let domain = detect_domain(query);
    let word_count = query.split_whitespace().count();
    let char_length = query.chars().count();

    let novelty = (word_count as f64 / NOVELTY_SATURATION_WORDS).min(1.0);
    let complexity = novelty * (char_length as f64 / 100.0);

    PerceptionResult {
        novelty,
        domain,
        risk: domain.risk(),
        token_length: word_count,
        complexity,
    }
}

fn detect_domain(query: &str) -> QueryDomain {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let hits = |keywords: &[&str]| tokens.iter().any(|t| keywords.contains(t));

    if hits(MEDICAL_KEYWORDS) {
        QueryDomain::Medical
    } else if hits(TECHNICAL_KEYWORDS) {
        QueryDomain::Technical
    } else if hits(CREATIVE_KEYWORDS) {
        QueryDomain::Creative
    } else {
        QueryDomain::General
    }
}
