use std::time::Duration;

use arbiter::domain::models::{GenerationPhase, GeneratorResponse, GeneratorRole};
use arbiter::services::fusion::fuse;
use arbiter::services::perception::classify;
use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn responses(count: usize) -> Vec<GeneratorResponse> {
    (0..count)
        .map(|i| GeneratorResponse {
            id: format!("response-{i}"),
            role: if i % 2 == 0 {
                GeneratorRole::Divergent
            } else {
                GeneratorRole::Convergent
            },
            generator: "bench".to_string(),
            phase: GenerationPhase::Initial,
            text: "a plausible answer with some supporting detail".to_string(),
            confidence: 0.4 + (i % 6) as f64 / 10.0,
            rationale: None,
            error: None,
            timestamp: Utc::now(),
            elapsed: Duration::from_millis(12),
        })
        .collect()
}

fn bench_fuse(c: &mut Criterion) {
    // One reflection-heavy query: initial pair plus three critique/expand rounds
    let batch = responses(8);
    c.bench_function("fusion/fuse_8", |b| {
        b.iter(|| fuse(black_box(&batch), black_box(0.55)).expect("responses present"));
    });
}

fn bench_classify(c: &mut Criterion) {
    let query = "Explain how a write-ahead log lets a database recover after a crash \
                 and what the trade-offs are against shadow paging";
    c.bench_function("perception/classify", |b| {
        b.iter(|| classify(black_box(query)));
    });
}

criterion_group!(benches, bench_fuse, bench_classify);
criterion_main!(benches);
