//! Benchmarks for preference-queue matching throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use type_duel::matchmaking::PreferenceQueue;
use type_duel::types::{MatchPreference, Participant};
use type_duel::utils::current_timestamp;

fn preference(language: &str) -> MatchPreference {
    MatchPreference {
        language: language.to_string(),
        max_passage_length: 100,
    }
}

fn filled_queue(size: usize) -> PreferenceQueue {
    let languages = ["en", "fr", "de", "es"];
    let mut queue = PreferenceQueue::new();
    for i in 0..size {
        queue.enqueue(
            Participant::new(format!("p{}", i), format!("P{}", i)),
            preference(languages[i % languages.len()]),
        );
    }
    queue
}

fn bench_find_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_match");
    for size in [10, 100, 1000] {
        let queue = filled_queue(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                // Worst case: the caller's language is the rarest in the queue
                queue.find_match(black_box("caller"), black_box(&preference("es")))
            })
        });
    }
    group.finish();
}

fn bench_enqueue_refresh(c: &mut Criterion) {
    c.bench_function("enqueue_refresh_existing", |b| {
        let mut queue = filled_queue(100);
        b.iter(|| {
            queue.enqueue(
                black_box(Participant::new("p50", "P50")),
                black_box(preference("en")),
            )
        })
    });
}

fn bench_evict_expired(c: &mut Criterion) {
    c.bench_function("evict_expired_none_stale", |b| {
        let mut queue = filled_queue(1000);
        let now = current_timestamp();
        b.iter(|| queue.evict_expired(black_box(now)))
    });
}

criterion_group!(
    benches,
    bench_find_match,
    bench_enqueue_refresh,
    bench_evict_expired
);
criterion_main!(benches);
