//! Confidence-weighted fusion of generator responses.
//!
//! Each response is weighted by how well its role suits the query's novelty
//! and by its own confidence. Weights are normalized to sum to one; the
//! representative text is the response with the highest
//! `weight * confidence`, and the blended confidence is the sum of those
//! products, capped below certainty.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::models::{FusedAnswer, GeneratorResponse, GeneratorRole, MAX_CONFIDENCE};

/// Flat base weight for escalation responses.
const ARBITER_BASE_WEIGHT: f64 = 0.8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FusionError {
    #[error("No responses available for fusion")]
    NoResponses,
}

/// Role weight before the response's own confidence is applied.
pub fn base_weight(role: GeneratorRole, novelty: f64) -> f64 {
    let novelty = novelty.clamp(0.0, 1.0);
    match role {
        GeneratorRole::Divergent => 0.7f64.mul_add(novelty, 0.3),
        GeneratorRole::Convergent => 0.7f64.mul_add(1.0 - novelty, 0.3),
        GeneratorRole::Arbiter => ARBITER_BASE_WEIGHT,
    }
}

fn sanitized(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Normalized weight per response, in input order.
pub fn normalized_weights(responses: &[GeneratorResponse], novelty: f64) -> Vec<f64> {
    let raw: Vec<f64> = responses
        .iter()
        .map(|r| base_weight(r.role, novelty) * sanitized(r.confidence))
        .collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|w| w / total).collect()
    } else {
        let uniform = 1.0 / responses.len().max(1) as f64;
        vec![uniform; responses.len()]
    }
}

/// Fuse a response set into one answer.
pub fn fuse(responses: &[GeneratorResponse], novelty: f64) -> Result<FusedAnswer, FusionError> {
    if responses.is_empty() {
        return Err(FusionError::NoResponses);
    }

    let weights = normalized_weights(responses, novelty);
    let mut best_index = 0;
    let mut best_score = f64::NEG_INFINITY;
    let mut blended = 0.0;

    for (index, (response, weight)) in responses.iter().zip(&weights).enumerate() {
        let score = weight * sanitized(response.confidence);
        blended += score;
        // Strict comparison keeps the earliest response on ties
        if score > best_score {
            best_score = score;
            best_index = index;
        }
    }

    let best = &responses[best_index];
    let weight_map: BTreeMap<String, f64> = responses
        .iter()
        .zip(&weights)
        .map(|(r, w)| (r.id.clone(), *w))
        .collect();

    let confidence = blended.clamp(0.0, MAX_CONFIDENCE);
    debug!(
        responses = responses.len(),
        best = %best.id,
        confidence,
        "fused responses"
    );

    Ok(FusedAnswer {
        text: best.text.clone(),
        confidence,
        best_source: best.id.clone(),
        weights: weight_map,
        safety_flagged: false,
        escalated: false,
    })
}
