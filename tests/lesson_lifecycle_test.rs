//! Lesson lifecycle tests: patch idempotence, strategy selection, batch
//! merging and the semantic purge.

use std::sync::Arc;

use uuid::Uuid;
use veritor::domain::models::{PatcherConfig, ToolCall, TraceSource};
use veritor::services::{InsertOutcome, LessonStore, Patcher};
use veritor::{
    ApplyStrategy, CapabilityUpgrade, DecayTrigger, FailureKind, FailureTrace, Lesson,
    LessonType, PatchOutcome, Severity, TriggerPattern,
};

fn patcher(decay: DecayTrigger) -> Patcher {
    Patcher::new(PatcherConfig::default(), Arc::new(LessonStore::new(decay)))
}

fn trace(kind: FailureKind, severity: Severity, input: &str, output: Option<&str>) -> Arc<FailureTrace> {
    let mut call = ToolCall::new("sql", input);
    if let Some(output) = output {
        call = call.with_output(output);
    }
    Arc::new(
        FailureTrace::new(
            "Report quarterly revenue by region",
            "The query returned nothing",
            kind,
            severity,
            TraceSource::Audit {
                task_id: Uuid::new_v4(),
            },
        )
        .with_tool_call(call),
    )
}

fn lesson(terms: &[&str], lesson_type: LessonType, rule: &str, confidence: f64) -> Lesson {
    Lesson::new(
        TriggerPattern::new(terms.iter().copied()).unwrap(),
        rule,
        lesson_type,
        confidence,
        Uuid::new_v4(),
    )
}

#[tokio::test]
async fn test_same_request_applied_twice_yields_one_lesson() {
    let patcher = patcher(DecayTrigger::AnyUpgrade);
    let failure = trace(
        FailureKind::CommissionSafety,
        Severity::Critical,
        "DELETE FROM billing.invoices WHERE region_code = 'EU'",
        None,
    );

    let request = patcher.propose(failure, None).unwrap();
    assert_eq!(request.apply_strategy, ApplyStrategy::HotfixNow);

    let first = patcher.apply(request.clone()).await.unwrap();
    let second = patcher.apply(request).await.unwrap();

    assert!(matches!(first, PatchOutcome::Applied { .. }));
    assert_eq!(second, PatchOutcome::AlreadyApplied);
    let snapshot = patcher.store().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.count_by_type(LessonType::Security), 1);
}

#[tokio::test]
async fn test_strategy_follows_severity() {
    let patcher = patcher(DecayTrigger::AnyUpgrade);
    for (severity, strategy) in [
        (Severity::Critical, ApplyStrategy::HotfixNow),
        (Severity::NonCritical, ApplyStrategy::BatchLater),
    ] {
        for kind in [
            FailureKind::OmissionLaziness,
            FailureKind::CommissionSafety,
            FailureKind::Hallucination,
        ] {
            let request = patcher
                .propose(trace(kind, severity, "SELECT total FROM finance.revenue", None), None)
                .unwrap();
            assert_eq!(request.apply_strategy, strategy, "{kind:?} / {severity:?}");
        }
    }
}

#[tokio::test]
async fn test_trigger_is_derived_from_trace() {
    let patcher = patcher(DecayTrigger::AnyUpgrade);
    let failure = trace(
        FailureKind::OmissionLaziness,
        Severity::NonCritical,
        "SELECT sum(amount) FROM finance.revenue_q3 GROUP BY region_code",
        Some("ERROR: no such column region_code"),
    );

    let request = patcher.propose(failure.clone(), None).unwrap();
    let tokens = failure.evidence_tokens();

    assert_eq!(request.lesson.lesson_type, LessonType::Syntax);
    assert!(request.lesson.trigger_pattern.unmatched_in(&tokens).is_empty());
    assert!(request
        .lesson
        .trigger_pattern
        .terms()
        .iter()
        .all(|t| t.len() >= TriggerPattern::MIN_TERM_LEN));
}

#[tokio::test]
async fn test_batch_merges_near_duplicates() {
    let patcher = patcher(DecayTrigger::AnyUpgrade);
    let inputs = [
        "SELECT * FROM finance.revenue_q3 WHERE region_code = 'EU'",
        "SELECT region_code FROM finance.revenue_q3",
    ];
    for input in inputs {
        let request = patcher
            .propose(
                trace(FailureKind::OmissionLaziness, Severity::NonCritical, input, None),
                None,
            )
            .unwrap();
        assert_eq!(patcher.apply(request).await.unwrap(), PatchOutcome::Queued);
    }
    assert_eq!(patcher.pending_len().await, 2);

    let report = patcher.run_batch().await.unwrap();

    assert_eq!(report.drained, 2);
    assert_eq!(report.merged, 1);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(patcher.store().snapshot().len(), 1);
}

#[tokio::test]
async fn test_conflict_keeps_higher_confidence() {
    let store = LessonStore::new(DecayTrigger::AnyUpgrade);
    let weak = lesson(&["invoices"], LessonType::Business, "Use the invoices view.", 0.4);
    let strong = lesson(&["invoices"], LessonType::Business, "Use billing.invoices_v2.", 0.9);

    assert_eq!(store.insert(weak.clone()).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(
        store.insert(strong.clone()).await.unwrap(),
        InsertOutcome::Superseded { retired: weak.id }
    );

    let weaker = lesson(&["invoices"], LessonType::Business, "Ask the user.", 0.2);
    assert_eq!(
        store.insert(weaker).await.unwrap(),
        InsertOutcome::Rejected { kept: strong.id }
    );

    let matching = store.matching("list unpaid invoices");
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].id, strong.id);
}

#[tokio::test]
async fn test_upgrade_purges_only_syntax_lessons() {
    let store = LessonStore::new(DecayTrigger::AnyUpgrade);
    store
        .insert(lesson(&["region_code"], LessonType::Syntax, "Quote identifiers.", 0.7))
        .await
        .unwrap();
    store
        .insert(lesson(&["orders"], LessonType::Business, "Check archives.", 0.8))
        .await
        .unwrap();
    store
        .insert(lesson(&["invoices"], LessonType::Security, "Never delete.", 0.9))
        .await
        .unwrap();

    let pinned = store.snapshot();
    let report = store
        .purge(&CapabilityUpgrade::new("model-a", "model-b", 1, 2))
        .await
        .unwrap();

    assert!(report.fired);
    assert_eq!(report.retired.len(), 1);
    let current = store.snapshot();
    assert_eq!(current.count_by_type(LessonType::Syntax), 0);
    assert_eq!(current.count_by_type(LessonType::Business), 1);
    assert_eq!(current.count_by_type(LessonType::Security), 1);

    // A snapshot taken before the purge is unaffected.
    assert_eq!(pinned.count_by_type(LessonType::Syntax), 1);
    assert!(current.version() > pinned.version());
}

#[tokio::test]
async fn test_tier_increase_trigger_ignores_lateral_upgrades() {
    let store = LessonStore::new(DecayTrigger::TierIncrease);
    store
        .insert(lesson(&["region_code"], LessonType::Syntax, "Quote identifiers.", 0.7))
        .await
        .unwrap();

    let lateral = store
        .purge(&CapabilityUpgrade::new("model-a", "model-a2", 2, 2))
        .await
        .unwrap();
    assert!(!lateral.fired);
    assert_eq!(store.snapshot().len(), 1);

    let raised = store
        .purge(&CapabilityUpgrade::new("model-a2", "model-b", 2, 3))
        .await
        .unwrap();
    assert!(raised.fired);
    assert!(store.snapshot().is_empty());
}
