mod common;

use arbiter::domain::models::{GeneratorRole, Task, TaskPriority, MAX_CONFIDENCE};
use arbiter::services::fusion::{fuse, normalized_weights};
use arbiter::services::TaskQueue;
use common::response;
use proptest::prelude::*;

fn role_strategy() -> impl Strategy<Value = GeneratorRole> {
    prop_oneof![
        Just(GeneratorRole::Divergent),
        Just(GeneratorRole::Convergent),
        Just(GeneratorRole::Arbiter),
    ]
}

fn responses_strategy() -> impl Strategy<Value = Vec<(GeneratorRole, f64)>> {
    prop::collection::vec((role_strategy(), 0.0f64..=1.0), 1..12)
}

proptest! {
    /// Property: normalized weights always sum to one
    #[test]
    fn prop_weights_sum_to_one(pairs in responses_strategy(), novelty in 0.0f64..=1.0) {
        let responses: Vec<_> = pairs
            .iter()
            .enumerate()
            .map(|(i, (role, conf))| response(&format!("r{i}"), *role, *conf))
            .collect();
        let weights = normalized_weights(&responses, novelty);
        let total: f64 = weights.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "weights summed to {}", total);
        prop_assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    /// Property: fused confidence stays within [0, MAX_CONFIDENCE] and never
    /// exceeds the most confident input
    #[test]
    fn prop_fused_confidence_bounded(pairs in responses_strategy(), novelty in 0.0f64..=1.0) {
        let responses: Vec<_> = pairs
            .iter()
            .enumerate()
            .map(|(i, (role, conf))| response(&format!("r{i}"), *role, *conf))
            .collect();
        let fused = fuse(&responses, novelty).unwrap();
        let max_input = pairs.iter().map(|(_, c)| *c).fold(0.0f64, f64::max);

        prop_assert!(fused.confidence >= 0.0);
        prop_assert!(fused.confidence <= MAX_CONFIDENCE);
        prop_assert!(fused.confidence <= max_input + 1e-9);
        prop_assert!(responses.iter().any(|r| r.id == fused.best_source));
        prop_assert_eq!(fused.weights.len(), responses.len());
    }

    /// Property: the queue never holds more than its capacity and pops
    /// every accepted task exactly once
    #[test]
    fn prop_queue_respects_capacity(
        capacity in 1usize..32,
        priorities in prop::collection::vec(0usize..5, 0..64),
    ) {
        let mut queue = TaskQueue::new(capacity);
        let mut accepted = 0;
        for p in &priorities {
            let task = Task::new("q").with_priority(TaskPriority::ALL[*p]);
            if queue.push_back(task).is_ok() {
                accepted += 1;
            }
            prop_assert!(queue.len() <= capacity);
        }
        prop_assert_eq!(accepted, priorities.len().min(capacity));

        let mut last_band = 0;
        let mut popped = 0;
        while let Some(task) = queue.pop() {
            let band = task.priority.band();
            prop_assert!(band >= last_band, "priorities must not increase while draining");
            last_band = band;
            popped += 1;
        }
        prop_assert_eq!(popped, accepted);
    }
}
