//! Benchmarks for the admission and policy hot paths.
//!
//! Benchmarks cover:
//! - Outcome classification of driver signals
//! - Cooldown decisions over a full history
//! - Admission against both store backends
//! - Run queue enqueue/dequeue

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use apply_governor::config::CooldownPolicyConfig;
use apply_governor::core::{
    classify, AdmissionController, CooldownPolicy, IdentityHistory, IdentityStore, OutcomeEvent,
    OutcomeKind, RawSignal, RunQueue, ScheduledRun,
};
use apply_governor::infra::{InMemoryIdentityStore, InMemoryRunQueue, SqliteIdentityStore};
use apply_governor::util::serde::{IdentityId, Priority};

// ============================================================================
// Classification and Policy
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    let signals = [
        RawSignal::Completed { applied: 5 },
        RawSignal::HttpStatus { code: 429 },
        RawSignal::PageText {
            text: "We noticed unusual activity on your account. Complete this security check.".into(),
        },
        RawSignal::fault("TimeoutException", "page load exceeded 30s"),
    ];
    c.bench_function("classify_signals", |b| {
        b.iter(|| {
            for signal in &signals {
                black_box(classify(black_box(signal)));
            }
        });
    });
}

fn bench_policy_decide(c: &mut Criterion) {
    let policy = CooldownPolicy::new(CooldownPolicyConfig::default()).unwrap();
    let mut group = c.benchmark_group("policy_decide");

    for size in [8_usize, 32, 128] {
        let history: Vec<OutcomeEvent> = (0..size)
            .map(|i| OutcomeEvent {
                kind: if i % 3 == 0 { OutcomeKind::RateLimited } else { OutcomeKind::SoftFailure },
                at_ms: 1_000 * i as u128,
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &history, |b, history| {
            let view = IdentityHistory {
                cooldown_until: None,
                recent: history,
            };
            b.iter(|| black_box(policy.decide(OutcomeKind::RateLimited, &view, 200_000)));
        });
    }
    group.finish();
}

// ============================================================================
// Admission
// ============================================================================

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let backends: [(&str, Arc<dyn IdentityStore>); 2] = [
        ("memory", Arc::new(InMemoryIdentityStore::new())),
        ("sqlite", Arc::new(SqliteIdentityStore::in_memory(32).unwrap())),
    ];

    for (name, store) in backends {
        let controller = AdmissionController::new(Arc::clone(&store));
        let ids: Vec<IdentityId> = (0..1_000).map(|i| IdentityId::new(format!("acct-{i}"))).collect();
        for id in &ids {
            store.conditional_set_running(id, 0).unwrap();
        }
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("reject_running", name), |b| {
            let mut next = 0;
            b.iter(|| {
                next = (next + 1) % ids.len();
                black_box(controller.admit(&ids[next], 1).unwrap())
            });
        });
    }
    group.finish();
}

// ============================================================================
// Queue
// ============================================================================

fn bench_queue_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_queue");

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = InMemoryRunQueue::new(size as usize);
                for i in 0..size {
                    let priority = match i % 4 {
                        0 => Priority::Low,
                        1 => Priority::Normal,
                        2 => Priority::High,
                        _ => Priority::Critical,
                    };
                    let run = ScheduledRun::new(IdentityId::new(format!("acct-{i}")), priority, u128::from(i));
                    queue.enqueue(run).unwrap();
                }
                while let Some(run) = queue.dequeue_ready(u128::from(size)) {
                    black_box(run);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_policy_decide,
    bench_admission,
    bench_queue_enqueue_dequeue
);
criterion_main!(benches);
