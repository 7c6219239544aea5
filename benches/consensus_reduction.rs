//! Criterion benchmarks for the verdict reduction and lesson matching hot
//! paths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

use veritor::domain::models::{tokenize, ClaimFingerprint};
use veritor::services::{reduce_verdicts, LessonStore};
use veritor::{ClaimVector, DecayTrigger, Lesson, LessonType, TriggerPattern, Verdict};

fn panel(claim: &ClaimVector, size: usize) -> Vec<Verdict> {
    let fingerprint = ClaimFingerprint::compute("bench", claim);
    (0..size)
        .map(|i| {
            let offset = (i as f64) * 0.01;
            let observed = ClaimVector::Numeric(vec![0.45 + offset, 0.52 - offset, 0.3]);
            Verdict::ok(format!("v{i}"), fingerprint.clone(), observed, 0.9, 5)
        })
        .collect()
}

fn bench_reduce_verdicts(c: &mut Criterion) {
    let claim = ClaimVector::Numeric(vec![0.82, 0.95, 0.3]);
    let mut group = c.benchmark_group("reduce_verdicts");
    for size in [3, 16, 128] {
        let verdicts = panel(&claim, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &verdicts, |b, verdicts| {
            b.iter(|| reduce_verdicts(black_box(&claim), black_box(verdicts), 0.15, 2));
        });
    }
    group.finish();
}

fn bench_lesson_matching(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let store = LessonStore::new(DecayTrigger::AnyUpgrade);
    runtime.block_on(async {
        for i in 0..500 {
            let trigger = TriggerPattern::new([format!("table_{i}"), format!("schema_{}", i % 7)])
                .expect("valid trigger");
            let lesson = Lesson::new(
                trigger,
                format!("Rule {i}"),
                LessonType::Business,
                0.7,
                Uuid::new_v4(),
            );
            store.insert(lesson).await.expect("insert");
        }
    });

    let snapshot = store.snapshot();
    let tokens = tokenize("SELECT * FROM schema_3.table_10 JOIN schema_3.table_220");
    c.bench_function("lesson_snapshot_matching", |b| {
        b.iter(|| snapshot.matching_tokens(black_box(&tokens)).len());
    });
}

criterion_group!(benches, bench_reduce_verdicts, bench_lesson_matching);
criterion_main!(benches);
