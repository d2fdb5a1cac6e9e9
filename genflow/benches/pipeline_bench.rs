//! Benchmarks for the retry decision path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genflow::pipeline::estimate_completion;
use genflow::retry::{ErrorClassifier, RetryPolicy};

fn retry_benchmark(c: &mut Criterion) {
    let policy = RetryPolicy::new().with_max_attempts(10);
    c.bench_function("compute_delay", |b| {
        b.iter(|| {
            for attempt in 1..10 {
                black_box(policy.compute_delay(black_box(attempt)));
            }
        });
    });

    let classifier = ErrorClassifier::new();
    let keywords = RetryPolicy::default().retryable_keywords;
    let messages = [
        "generate_grid failed: Network timeout",
        "promote_unit failed: artifact not found",
        "export_project failed: Unexpected end of stream",
    ];
    c.bench_function("classify", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(classifier.classify(black_box(message), &keywords));
            }
        });
    });

    c.bench_function("estimate_completion", |b| {
        b.iter(|| black_box(estimate_completion(black_box(0), black_box(12_345), black_box(37.5))));
    });
}

criterion_group!(benches, retry_benchmark);
criterion_main!(benches);
