//! Consensus engine integration tests: fan-out, deadlines, coalescing and
//! the audit trail written per evaluation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{as_adapters, audit_trail, numeric, observing_panel};
use veritor::adapters::memory::ScriptedVerifier;
use veritor::domain::models::{
    AuditEventKind, AuditRecord, AuditTrailConfig, ConsensusConfig, Decision, VerdictStatus,
};
use veritor::services::{AuditFilter, AuditTrail, ConsensusEngine};
use veritor::{AuditSink, Claim, ClaimVector, DomainError, DomainResult, VerifierError};

/// Sink that loads empty and refuses every write.
struct RejectingSink;

#[async_trait]
impl AuditSink for RejectingSink {
    async fn append(&self, _record: &AuditRecord) -> DomainResult<()> {
        Err(DomainError::DatabaseError("disk full".to_string()))
    }

    async fn load(&self) -> DomainResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}

fn config(timeout_ms: u64) -> ConsensusConfig {
    ConsensusConfig {
        timeout_ms,
        ..ConsensusConfig::default()
    }
}

#[tokio::test]
async fn test_identical_observations_pass_with_zero_drift() {
    let panel = observing_panel(3, &[0.82, 0.95], 0.9);
    let engine = ConsensusEngine::new(as_adapters(&panel), config(1_000), audit_trail()).unwrap();
    let claim = Claim::new("conversion and retention", numeric(&[0.82, 0.95]));

    let decision = engine.evaluate(&claim).await.unwrap();

    assert_eq!(decision.decision, Decision::Pass);
    assert_eq!(decision.drift, Some(0.0));
    assert_eq!(decision.contributing.len(), 3);
    assert!(decision.refuting.is_empty());
}

#[tokio::test]
async fn test_reference_scenario_flags_with_single_observation() {
    let panel = observing_panel(1, &[0.45, 0.52], 0.9);
    let engine = ConsensusEngine::new(as_adapters(&panel), config(1_000), audit_trail()).unwrap();
    let claim = Claim::new("conversion and retention", numeric(&[0.82, 0.95]));

    let decision = engine.evaluate(&claim).await.unwrap();

    // One refuting verdict is below the failure quorum.
    assert_eq!(decision.decision, Decision::Flag);
    let drift = decision.drift.unwrap();
    // sqrt(0.37^2 + 0.43^2) = 0.5673, not the 0.586 sometimes quoted for this case.
    assert!((drift - 0.5673).abs() < 1e-3, "drift was {drift}");
}

#[tokio::test]
async fn test_all_timeouts_are_inconclusive() {
    let panel: Vec<Arc<ScriptedVerifier>> = (0..3)
        .map(|i| {
            Arc::new(
                ScriptedVerifier::agreeing(format!("slow-{i}"), 0.9)
                    .with_delay(Duration::from_secs(30)),
            )
        })
        .collect();
    let audit = audit_trail();
    let engine = ConsensusEngine::new(as_adapters(&panel), config(50), audit.clone()).unwrap();
    let claim = Claim::new("conversion", numeric(&[0.5]));

    let evaluation = engine.evaluate_with_trace(&claim).await.unwrap();

    assert_eq!(evaluation.decision.decision, Decision::Inconclusive);
    assert!(evaluation.decision.drift.is_none());
    assert!(evaluation.trace.is_none());
    assert_eq!(evaluation.decision.verdicts.len(), 3);
    assert!(evaluation
        .decision
        .verdicts
        .iter()
        .all(|v| v.status == VerdictStatus::Timeout && v.confidence == 0.0));

    let traces = audit
        .query(AuditFilter::new().with_kind(AuditEventKind::FailureTrace))
        .await;
    assert!(traces.is_empty());
}

#[tokio::test]
async fn test_adapter_errors_are_absorbed() {
    let adapters: Vec<Arc<dyn veritor::VerifierAdapter>> = vec![
        Arc::new(ScriptedVerifier::failing(
            "down",
            VerifierError::Unavailable("503".to_string()),
        )),
        Arc::new(ScriptedVerifier::agreeing("up", 0.8)),
    ];
    let engine = ConsensusEngine::new(adapters, config(1_000), audit_trail()).unwrap();
    let claim = Claim::new("conversion", numeric(&[0.4]));

    let decision = engine.evaluate(&claim).await.unwrap();

    assert_eq!(decision.decision, Decision::Pass);
    assert_eq!(decision.ok_count(), 1);
    assert!(decision
        .verdicts
        .iter()
        .any(|v| v.status == VerdictStatus::Error));
}

#[tokio::test]
async fn test_slow_verifier_is_excluded_from_reduction() {
    let adapters: Vec<Arc<dyn veritor::VerifierAdapter>> = vec![
        Arc::new(ScriptedVerifier::agreeing("fast", 0.9)),
        Arc::new(
            ScriptedVerifier::observing("slow", numeric(&[0.0]), 0.9)
                .with_delay(Duration::from_secs(30)),
        ),
    ];
    let engine = ConsensusEngine::new(adapters, config(100), audit_trail()).unwrap();
    let claim = Claim::new("conversion", numeric(&[0.9]));

    let decision = engine.evaluate(&claim).await.unwrap();

    assert_eq!(decision.decision, Decision::Pass);
    assert_eq!(decision.contributing.len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_are_coalesced() {
    let panel: Vec<Arc<ScriptedVerifier>> = (0..3)
        .map(|i| {
            Arc::new(
                ScriptedVerifier::agreeing(format!("v{i}"), 0.9)
                    .with_delay(Duration::from_millis(100)),
            )
        })
        .collect();
    let audit = audit_trail();
    let engine = ConsensusEngine::new(as_adapters(&panel), config(5_000), audit.clone()).unwrap();

    // Same subject and vector, different context: same fingerprint.
    let first = Claim::new("weekly revenue", numeric(&[0.7, 0.2]));
    let second = Claim::new("weekly revenue", numeric(&[0.7, 0.2])).with_context("run", "b");
    assert_eq!(first.fingerprint(), second.fingerprint());

    let (a, b) = tokio::join!(
        engine.evaluate_with_trace(&first),
        engine.evaluate_with_trace(&second)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.decision.id, b.decision.id);
    assert!(a.coalesced != b.coalesced);
    for verifier in &panel {
        assert_eq!(verifier.calls(), 1);
    }

    let decisions = audit
        .query(AuditFilter::new().with_kind(AuditEventKind::Decision))
        .await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_many_concurrent_callers_share_one_fan_out() {
    let verifier = Arc::new(
        ScriptedVerifier::agreeing("only", 0.9).with_delay(Duration::from_millis(100)),
    );
    let engine = ConsensusEngine::new(
        vec![verifier.clone() as Arc<dyn veritor::VerifierAdapter>],
        config(5_000),
        audit_trail(),
    )
    .unwrap();
    let claim = Claim::new("daily signups", numeric(&[0.4]));

    let results = futures::future::join_all((0..8).map(|_| engine.evaluate_with_trace(&claim))).await;

    let leaders = results
        .iter()
        .filter(|r| !r.as_ref().unwrap().coalesced)
        .count();
    assert_eq!(leaders, 1);
    assert_eq!(verifier.calls(), 1);
    let first_id = results[0].as_ref().unwrap().decision.id;
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap().decision.id == first_id));
}

#[tokio::test]
async fn test_failed_evaluation_is_shared_with_waiting_callers() {
    let verifier = Arc::new(
        ScriptedVerifier::agreeing("only", 0.9).with_delay(Duration::from_millis(100)),
    );
    let audit = Arc::new(
        AuditTrail::open(AuditTrailConfig::default(), Arc::new(RejectingSink))
            .await
            .unwrap(),
    );
    let engine = ConsensusEngine::new(
        vec![verifier.clone() as Arc<dyn veritor::VerifierAdapter>],
        config(5_000),
        audit,
    )
    .unwrap();
    let claim = Claim::new("daily signups", numeric(&[0.4]));

    let (a, b, c) = tokio::join!(
        engine.evaluate(&claim),
        engine.evaluate(&claim),
        engine.evaluate(&claim)
    );

    for result in [a, b, c] {
        assert!(matches!(result, Err(DomainError::DatabaseError(_))));
    }
    assert_eq!(verifier.calls(), 1);
    assert_eq!(engine.in_flight(), 0);

    // The failed entry is not cached for later, non-concurrent calls.
    let _ = engine.evaluate(&claim).await;
    assert_eq!(verifier.calls(), 2);
}

#[tokio::test]
async fn test_sequential_duplicates_are_evaluated_again() {
    let panel = observing_panel(2, &[0.3], 0.9);
    let engine = ConsensusEngine::new(as_adapters(&panel), config(1_000), audit_trail()).unwrap();
    let claim = Claim::new("churn", numeric(&[0.3]));

    let first = engine.evaluate(&claim).await.unwrap();
    let second = engine.evaluate(&claim).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(panel[0].calls(), 2);
}

#[tokio::test]
async fn test_majority_refutation_fails_and_records_trace() {
    let panel = observing_panel(3, &[0.1, 0.1], 0.9);
    let audit = audit_trail();
    let engine = ConsensusEngine::new(as_adapters(&panel), config(1_000), audit.clone()).unwrap();
    let claim = Claim::new("margin for q3_forecast", numeric(&[0.9, 0.9])).critical();

    let evaluation = engine.evaluate_with_trace(&claim).await.unwrap();

    assert_eq!(evaluation.decision.decision, Decision::Fail);
    let trace = evaluation.trace.expect("failure trace");
    assert!(trace.is_critical());
    assert!(trace.prompt.contains("q3_forecast"));

    let history = audit.entity_history(trace.trace_id).await;
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_categorical_disagreement_fails() {
    let adapters: Vec<Arc<dyn veritor::VerifierAdapter>> = (0..2)
        .map(|i| {
            Arc::new(ScriptedVerifier::observing(
                format!("v{i}"),
                ClaimVector::categorical(["approved", "low"]).unwrap(),
                0.9,
            )) as Arc<dyn veritor::VerifierAdapter>
        })
        .collect();
    let engine = ConsensusEngine::new(adapters, config(1_000), audit_trail()).unwrap();
    let claim = Claim::new(
        "loan review",
        ClaimVector::categorical(["rejected", "high"]).unwrap(),
    );

    let decision = engine.evaluate(&claim).await.unwrap();

    assert_eq!(decision.decision, Decision::Fail);
    assert_eq!(decision.drift, Some(1.0));
}

#[test]
fn test_engine_configuration_errors() {
    let no_adapters = ConsensusEngine::new(Vec::new(), ConsensusConfig::default(), audit_trail());
    assert!(matches!(no_adapters, Err(DomainError::Configuration(_))));

    let panel = observing_panel(1, &[0.5], 0.9);
    for threshold in [0.0, 1.0, -0.2, 1.5] {
        let bad = ConsensusConfig {
            threshold,
            ..ConsensusConfig::default()
        };
        let result = ConsensusEngine::new(as_adapters(&panel), bad, audit_trail());
        assert!(matches!(result, Err(DomainError::Configuration(_))), "threshold {threshold}");
    }
}
