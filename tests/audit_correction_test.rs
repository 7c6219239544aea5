//! End-to-end audit and correction tests through the kernel facade.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{archive_shadow, gave_up_response, march_orders_task, numeric};
use veritor::adapters::memory::{ScriptedShadow, ScriptedVerifier};
use veritor::domain::models::{AuditEventKind, PatcherConfig};
use veritor::services::AuditFilter;
use veritor::{
    AgentResponse, AuditOutcome, AuditTask, Claim, Decision, FailureKind, Kernel, KernelConfig,
    LessonType,
};

async fn kernel_with(config: KernelConfig, shadow: Arc<ScriptedShadow>) -> Kernel {
    Kernel::builder(config)
        .verifier(Arc::new(ScriptedVerifier::observing("a", numeric(&[0.45, 0.52]), 0.9)))
        .verifier(Arc::new(ScriptedVerifier::observing("b", numeric(&[0.45, 0.52]), 0.9)))
        .shadow(shadow)
        .build()
        .await
        .expect("kernel builds")
}

#[tokio::test]
async fn test_no_data_found_scenario_emits_laziness_trace() {
    let shadow = archive_shadow();
    let kernel = kernel_with(KernelConfig::default(), shadow.clone()).await;

    let result = kernel
        .audit(&march_orders_task(), &gave_up_response())
        .await
        .unwrap();

    assert!(result.triggered);
    assert!(result.teacher_found_data);
    assert_eq!(result.outcome, AuditOutcome::LazinessDetected);
    let trace = result.failure_trace.as_ref().unwrap();
    assert_eq!(trace.failure_kind, FailureKind::OmissionLaziness);
    assert_eq!(trace.evidence.as_deref(), Some("archive.orders_2023"));
    assert_eq!(shadow.calls(), 1);

    let recorded = kernel
        .audit_trail()
        .query(AuditFilter::new().with_kind(AuditEventKind::FailureTrace))
        .await;
    assert_eq!(recorded.len(), 1);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_non_critical_laziness_waits_for_batch() {
    let kernel = kernel_with(KernelConfig::default(), archive_shadow()).await;
    let context = "SELECT * FROM sales.orders WHERE shipped_at > '2024-01-01'";

    kernel
        .audit(&march_orders_task(), &gave_up_response())
        .await
        .unwrap();
    assert!(kernel.frame(context).is_empty());

    let report = kernel.run_batch().await.unwrap();
    assert_eq!(report.applied.len(), 1);

    let framing = kernel.frame(context);
    assert_eq!(framing.rules.len(), 1);
    assert!(framing.render().contains("archive.orders_2023"));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_exhaustive_response_is_not_escalated() {
    let shadow = archive_shadow();
    let kernel = kernel_with(KernelConfig::default(), shadow.clone()).await;
    let response = AgentResponse::text(
        "No data found. I checked sales.orders, archive.orders_2023 and the rename log.",
    );

    let result = kernel.audit(&march_orders_task(), &response).await.unwrap();

    assert!(!result.triggered);
    assert_eq!(result.outcome, AuditOutcome::NotTriggered);
    assert_eq!(shadow.calls(), 0);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_empty_response_always_triggers() {
    let shadow = Arc::new(ScriptedShadow::finding_nothing());
    let kernel = kernel_with(KernelConfig::default(), shadow.clone()).await;

    let result = kernel
        .audit(&AuditTask::new("List open invoices"), &AgentResponse::empty())
        .await
        .unwrap();

    assert!(result.triggered);
    assert_eq!(result.outcome, AuditOutcome::GenuineFailure);
    assert!(result.failure_trace.is_none());
    assert!(kernel.lesson_store().snapshot().is_empty());
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_shadow_timeout_leaves_no_trace() {
    let shadow =
        Arc::new(ScriptedShadow::finding("archive.orders_2023").with_delay(Duration::from_secs(30)));
    let mut config = KernelConfig::default();
    config.auditor.shadow_timeout_ms = 50;
    let kernel = kernel_with(config, shadow).await;

    let result = kernel
        .audit(&march_orders_task(), &gave_up_response())
        .await
        .unwrap();

    assert_eq!(result.outcome, AuditOutcome::Inconclusive);
    assert!(!result.teacher_found_data);
    let traces = kernel
        .audit_trail()
        .query(AuditFilter::new().with_kind(AuditEventKind::FailureTrace))
        .await;
    assert!(traces.is_empty());
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_flag_is_patched_only_when_enabled() {
    // A single refuting verifier yields FLAG, not FAIL.
    let claim = || Claim::new("uplift for campaign_spring", numeric(&[0.82, 0.95])).critical();

    for (patch_on_flag, expected_lessons) in [(false, 0), (true, 1)] {
        let config = KernelConfig {
            patcher: PatcherConfig {
                patch_on_flag,
                ..PatcherConfig::default()
            },
            ..KernelConfig::default()
        };
        let kernel = Kernel::builder(config)
            .verifier(Arc::new(ScriptedVerifier::observing("a", numeric(&[0.45, 0.52]), 0.9)))
            .shadow(archive_shadow())
            .build()
            .await
            .unwrap();

        let decision = kernel.evaluate(&claim()).await.unwrap();
        assert_eq!(decision.decision, Decision::Flag);
        // FLAG traces are never critical, so they go through the batch pass.
        kernel.run_batch().await.unwrap();
        assert_eq!(
            kernel.lesson_store().snapshot().len(),
            expected_lessons,
            "patch_on_flag = {patch_on_flag}"
        );
        kernel.shutdown().await;
    }
}

#[tokio::test]
async fn test_repeated_failure_does_not_duplicate_lessons() {
    let kernel = kernel_with(KernelConfig::default(), archive_shadow()).await;
    let claim = Claim::new("uplift for campaign_spring", numeric(&[0.82, 0.95])).critical();

    assert_eq!(kernel.evaluate(&claim).await.unwrap().decision, Decision::Fail);
    assert_eq!(kernel.evaluate(&claim).await.unwrap().decision, Decision::Fail);

    let snapshot = kernel.lesson_store().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.count_by_type(LessonType::Business), 1);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_auditor_tracks_trigger_rate() {
    let kernel = kernel_with(KernelConfig::default(), archive_shadow()).await;
    let task = AuditTask::new("Sum invoices");

    for _ in 0..9 {
        kernel
            .audit(&task, &AgentResponse::text("The total is 1200 EUR."))
            .await
            .unwrap();
    }
    kernel.audit(&task, &AgentResponse::empty()).await.unwrap();

    let stats = kernel.auditor_stats();
    assert_eq!(stats.audited, 10);
    assert_eq!(stats.triggered, 1);
    assert!((stats.trigger_rate - 0.1).abs() < f64::EPSILON);
    kernel.shutdown().await;
}
