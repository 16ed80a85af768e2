//! Mandatory disclaimer for high-risk answers.
//!
//! Applied to every routed answer after escalation. Not configurable.

use crate::domain::models::{FusedAnswer, PerceptionResult, QueryDomain};

pub const MEDICAL_DISCLAIMER: &str = "[SAFETY NOTICE] This response is informational only and is not medical advice. Consult a qualified healthcare professional before acting on it.";

const RISK_THRESHOLD: f64 = 0.8;
const CONFIDENCE_FLOOR: f64 = 0.95;

/// Whether an answer in this domain, at this risk and confidence, must carry
/// the disclaimer.
pub fn requires_disclaimer(domain: QueryDomain, risk: f64, confidence: f64) -> bool {
    domain == QueryDomain::Medical && risk > RISK_THRESHOLD && confidence < CONFIDENCE_FLOOR
}

/// Prepend the disclaimer and set the safety flag when required.
/// Returns whether the gate fired.
pub fn apply(answer: &mut FusedAnswer, perception: &PerceptionResult) -> bool {
    if !requires_disclaimer(perception.domain, perception.risk, answer.confidence) {
        return false;
    }
    if !answer.text.starts_with(MEDICAL_DISCLAIMER) {
        answer.text = format!("{MEDICAL_DISCLAIMER}\n\n{}", answer.text);
    }
    answer.safety_flagged = true;
    true
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn answer(confidence: f64) -> FusedAnswer {
        FusedAnswer {
            text: "Rest and fluids.".to_string(),
            confidence,
            best_source: "convergent-initial-0".to_string(),
            weights: BTreeMap::new(),
            safety_flagged: false,
            escalated: false,
        }
    }

    fn perception(domain: QueryDomain, risk: f64) -> PerceptionResult {
        PerceptionResult {
            novelty: 0.2,
            domain,
            risk,
            token_length: 4,
            complexity: 0.1,
        }
    }

    #[test]
    fn test_medical_low_confidence_flagged() {
        let mut a = answer(0.5);
        assert!(apply(&mut a, &perception(QueryDomain::Medical, 0.9)));
        assert!(a.safety_flagged);
        assert!(a.text.starts_with(MEDICAL_DISCLAIMER));
        assert!(a.text.ends_with("Rest and fluids."));
    }

    #[test]
    fn test_medical_high_confidence_untouched() {
        let mut a = answer(0.97);
        assert!(!apply(&mut a, &perception(QueryDomain::Medical, 0.9)));
        assert!(!a.safety_flagged);
        assert_eq!(a.text, "Rest and fluids.");
    }

    #[test]
    fn test_other_domains_never_flagged() {
        let mut a = answer(0.1);
        assert!(!apply(&mut a, &perception(QueryDomain::Technical, 0.9)));
        assert!(!requires_disclaimer(QueryDomain::Medical, 0.8, 0.1));
    }

    #[test]
    fn test_banner_not_duplicated() {
        let mut a = answer(0.5);
        let p = perception(QueryDomain::Medical, 0.9);
        apply(&mut a, &p);
        apply(&mut a, &p);
        assert_eq!(a.text.matches("[SAFETY NOTICE]").count(), 1);
    }
}
