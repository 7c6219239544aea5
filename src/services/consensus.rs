//! Consensus engine.
//!
//! Fans a claim out to every configured verifier in parallel, collects what
//! arrives before the deadline and reduces it to one [`ConsensusDecision`]
//! with plain arithmetic. No model is ever asked for the decision itself.
//!
//! # Reduction
//!
//! Only verdicts with status `ok` carry weight; each is weighted by its
//! confidence (falling back to equal weights when every confidence is 0).
//!
//! - Numeric claims: the aggregate observation is the weighted
//!   component-wise mean, and drift is the Euclidean distance between the
//!   claim vector and the aggregate.
//! - Categorical claims: per position, agreement is the weighted share of
//!   verdicts whose label equals the claimed one; drift is
//!   `1 - mean(agreement)`.
//!
//! A verdict *refutes* the claim when its own drift (same metric, against
//! its single observation) exceeds the threshold. Decisions are taken in
//! this order:
//!
//! 1. no ok verdicts: `INCONCLUSIVE`
//! 2. an even number of ok verdicts split exactly in half: `FLAG`
//! 3. drift within the threshold: `PASS`
//! 4. quorum reached and a strict majority refutes: `FAIL`
//! 5. otherwise: `FLAG`

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    context_text, AuditEvent, Claim, ClaimFingerprint, ClaimVector, ConsensusConfig,
    ConsensusDecision, Decision, FailureKind, FailureTrace, Severity, TraceSource, Verdict,
    VerdictStatus,
};
use crate::domain::ports::VerifierAdapter;
use crate::services::audit_trail::AuditTrail;

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

/// Result of reducing a verdict set, before it is stamped into a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub drift: Option<f64>,
    pub decision: Decision,
    pub contributing: Vec<Uuid>,
    pub refuting: Vec<Uuid>,
}

/// Reduce verdicts for a claim to a decision.
///
/// Deterministic: the same claim vector, verdicts and parameters always
/// give the same result. Verdicts whose observation does not fit the claim
/// are ignored like non-ok ones.
pub fn reduce_verdicts(
    claim: &ClaimVector,
    verdicts: &[Verdict],
    threshold: f64,
    min_fail_quorum: usize,
) -> Reduction {
    let usable: Vec<(&Verdict, &ClaimVector)> = verdicts
        .iter()
        .filter_map(|v| v.observation().map(|o| (v, o)))
        .filter(|(_, o)| o.is_compatible(claim))
        .collect();

    let contributing: Vec<Uuid> = usable.iter().map(|(v, _)| v.id).collect();
    if usable.is_empty() {
        return Reduction {
            drift: None,
            decision: Decision::Inconclusive,
            contributing,
            refuting: Vec::new(),
        };
    }

    let refuting: Vec<Uuid> = usable
        .iter()
        .filter(|(_, observed)| pairwise_drift(claim, observed) > threshold)
        .map(|(v, _)| v.id)
        .collect();

    let weights = normalised_weights(usable.iter().map(|(v, _)| v.confidence));
    let observations: Vec<&ClaimVector> = usable.iter().map(|(_, o)| *o).collect();
    let drift = aggregate_drift(claim, &observations, &weights);

    let ok = usable.len();
    let against = refuting.len();
    let decision = if ok % 2 == 0 && against * 2 == ok {
        Decision::Flag
    } else if drift <= threshold {
        Decision::Pass
    } else if ok >= min_fail_quorum && against * 2 > ok {
        Decision::Fail
    } else {
        Decision::Flag
    };

    Reduction {
        drift: Some(drift),
        decision,
        contributing,
        refuting,
    }
}

fn normalised_weights(confidences: impl Iterator<Item = f64>) -> Vec<f64> {
    let raw: Vec<f64> = confidences.collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|c| c / total).collect()
    } else {
        vec![1.0 / raw.len() as f64; raw.len()]
    }
}

/// Drift of a single observation against the claim.
fn pairwise_drift(claim: &ClaimVector, observed: &ClaimVector) -> f64 {
    match (claim, observed) {
        (ClaimVector::Numeric(c), ClaimVector::Numeric(o)) => euclidean(c, o),
        (ClaimVector::Categorical(c), ClaimVector::Categorical(o)) => {
            let matching = c.iter().zip(o).filter(|(a, b)| a == b).count();
            1.0 - matching as f64 / c.len() as f64
        }
        _ => f64::INFINITY,
    }
}

fn aggregate_drift(claim: &ClaimVector, observations: &[&ClaimVector], weights: &[f64]) -> f64 {
    match claim {
        ClaimVector::Numeric(c) => {
            let numeric: Vec<&[f64]> = observations
                .iter()
                .filter_map(|o| match o {
                    ClaimVector::Numeric(values) => Some(values.as_slice()),
                    ClaimVector::Categorical(_) => None,
                })
                .collect();
            euclidean(c, &weighted_mean(&numeric, weights))
        }
        ClaimVector::Categorical(c) => {
            let agreement: f64 = c
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    observations
                        .iter()
                        .zip(weights)
                        .filter(|(o, _)| match o {
                            ClaimVector::Categorical(labels) => labels.get(i) == Some(label),
                            ClaimVector::Numeric(_) => false,
                        })
                        .map(|(_, w)| w)
                        .sum::<f64>()
                })
                .sum();
            (1.0 - agreement / c.len() as f64).max(0.0)
        }
    }
}

/// Weighted component-wise mean, taken as offsets from the first
/// observation so identical observations reproduce it exactly.
fn weighted_mean(observations: &[&[f64]], weights: &[f64]) -> Vec<f64> {
    let base = observations[0];
    (0..base.len())
        .map(|j| {
            let offset: f64 = observations
                .iter()
                .zip(weights)
                .map(|(o, w)| w * (o[j] - base[j]))
                .sum();
            base[j] + offset
        })
        .collect()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One finished evaluation as seen by a caller.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: ConsensusDecision,
    /// Trace emitted for a FAIL or FLAG decision.
    pub trace: Option<Arc<FailureTrace>>,
    /// True when this caller joined an evaluation started by another caller.
    pub coalesced: bool,
}

type Outcome = DomainResult<(ConsensusDecision, Option<Arc<FailureTrace>>)>;

// The cell holds the leader's result even when it is an error, so waiting
// callers never start a second fan-out.
type InFlight = Arc<OnceCell<Outcome>>;

/// Parallel fan-out/fan-in over a fixed set of verifiers.
pub struct ConsensusEngine {
    adapters: Vec<Arc<dyn VerifierAdapter>>,
    config: ConsensusConfig,
    audit: Arc<AuditTrail>,
    in_flight: Mutex<HashMap<ClaimFingerprint, InFlight>>,
}

impl ConsensusEngine {
    pub fn new(
        adapters: Vec<Arc<dyn VerifierAdapter>>,
        config: ConsensusConfig,
        audit: Arc<AuditTrail>,
    ) -> DomainResult<Self> {
        if adapters.is_empty() {
            return Err(DomainError::configuration(
                "consensus engine needs at least one verifier adapter",
            ));
        }
        if !(config.threshold > 0.0 && config.threshold < 1.0) {
            return Err(DomainError::configuration(format!(
                "consensus threshold {} must lie strictly between 0 and 1",
                config.threshold
            )));
        }
        if config.timeout_ms == 0 {
            return Err(DomainError::configuration("consensus timeout must be positive"));
        }

        Ok(Self {
            adapters,
            config,
            audit,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Number of fingerprints currently being evaluated.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Evaluate a claim and return its decision.
    pub async fn evaluate(&self, claim: &Claim) -> DomainResult<ConsensusDecision> {
        Ok(self.evaluate_with_trace(claim).await?.decision)
    }

    /// Evaluate a claim, also returning the failure trace it produced.
    ///
    /// Concurrent calls for the same fingerprint share one evaluation: only
    /// the first caller submits to the verifiers, later callers await its
    /// result (an error included) and are marked `coalesced`.
    #[instrument(skip(self, claim), fields(fingerprint = %claim.fingerprint()))]
    pub async fn evaluate_with_trace(&self, claim: &Claim) -> DomainResult<Evaluation> {
        claim.validate()?;
        let fingerprint = claim.fingerprint();

        let cell = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| DomainError::configuration("in-flight table poisoned"))?;
            in_flight.entry(fingerprint.clone()).or_default().clone()
        };

        let led = AtomicBool::new(false);
        let led_ref = &led;
        let fingerprint_ref = &fingerprint;
        let result = cell
            .get_or_init(|| async move {
                led_ref.store(true, Ordering::SeqCst);
                self.run(claim, fingerprint_ref).await
            })
            .await
            .clone();

        let leader = led.load(Ordering::SeqCst);
        if leader {
            if let Ok(mut in_flight) = self.in_flight.lock() {
                if in_flight
                    .get(&fingerprint)
                    .is_some_and(|current| Arc::ptr_eq(current, &cell))
                {
                    in_flight.remove(&fingerprint);
                }
            }
        }

        let (decision, trace) = result?;
        if !leader {
            tracing::debug!(decision_id = %decision.id, "Joined in-flight evaluation");
        }
        Ok(Evaluation {
            decision,
            trace,
            coalesced: !leader,
        })
    }

    async fn run(&self, claim: &Claim, fingerprint: &ClaimFingerprint) -> Outcome {
        let (verdicts, late) = self.collect(claim, fingerprint).await;

        let reduction = reduce_verdicts(
            &claim.vector,
            &verdicts,
            self.config.threshold,
            self.config.min_fail_quorum,
        );

        let decision = ConsensusDecision {
            id: Uuid::new_v4(),
            claim_id: claim.id,
            fingerprint: fingerprint.clone(),
            drift: reduction.drift,
            decision: reduction.decision,
            threshold: self.config.threshold,
            verdicts,
            contributing: reduction.contributing,
            refuting: reduction.refuting,
            late_verdicts: late.len(),
            decided_at: Utc::now(),
        };

        tracing::info!(
            decision_id = %decision.id,
            decision = %decision.decision,
            drift = ?decision.drift,
            ok = decision.ok_count(),
            refuting = decision.refuting.len(),
            late = decision.late_verdicts,
            "Consensus reached"
        );

        self.audit
            .record(AuditEvent::Decision(decision.clone()))
            .await?;
        for verdict in late {
            self.audit
                .record(AuditEvent::LateVerdict {
                    fingerprint: fingerprint.clone(),
                    decision_id: decision.id,
                    verdict,
                })
                .await?;
        }

        let trace = if decision.decision.is_failure() {
            let trace = failure_trace_for(claim, &decision);
            self.audit
                .record(AuditEvent::FailureTrace(trace.clone()))
                .await?;
            Some(Arc::new(trace))
        } else {
            None
        };

        Ok((decision, trace))
    }

    /// Fan out and collect verdicts until all adapters answer or the
    /// deadline passes. Returns in-time verdicts (one per adapter, in
    /// adapter order) and results that raced the deadline.
    async fn collect(
        &self,
        claim: &Claim,
        fingerprint: &ClaimFingerprint,
    ) -> (Vec<Verdict>, Vec<Verdict>) {
        let started = Instant::now();
        let deadline = started + self.config.timeout();
        let shared = Arc::new(claim.clone());

        let mut set = JoinSet::new();
        let mut slots = HashMap::new();
        for (index, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let claim = Arc::clone(&shared);
            let handle = set.spawn(async move { (index, adapter.submit(&claim, deadline).await) });
            slots.insert(handle.id(), index);
        }

        let mut collected: Vec<Option<Verdict>> = vec![None; self.adapters.len()];
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, verdict)))) => collected[index] = Some(verdict),
                Ok(Some(Err(err))) => {
                    if let Some(&index) = slots.get(&err.id()) {
                        tracing::error!(
                            verifier = self.adapters[index].name(),
                            error = %err,
                            "Verifier task failed"
                        );
                        collected[index] = Some(Verdict::error(
                            self.adapters[index].name(),
                            fingerprint.clone(),
                            format!("verifier task failed: {err}"),
                            elapsed_ms(started),
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = set.len(),
                        timeout_ms = self.config.timeout_ms,
                        "Consensus deadline reached; cancelling pending verifiers"
                    );
                    break;
                }
            }
        }

        set.abort_all();
        let mut late = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                // A verifier that gave up at the deadline reported its own timeout.
                Ok((index, verdict)) if verdict.status == VerdictStatus::Timeout => {
                    collected[index] = Some(verdict);
                }
                Ok((_, verdict)) => {
                    tracing::debug!(verifier = %verdict.verifier, "Late verdict discarded");
                    late.push(verdict);
                }
                Err(_) => {}
            }
        }

        let verdicts = collected
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Verdict::timeout(
                        self.adapters[index].name(),
                        fingerprint.clone(),
                        elapsed_ms(started),
                    )
                })
            })
            .collect();

        (verdicts, late)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn failure_trace_for(claim: &Claim, decision: &ConsensusDecision) -> FailureTrace {
    let severity = if claim.critical && decision.decision == Decision::Fail {
        Severity::Critical
    } else {
        Severity::NonCritical
    };

    let context = context_text(&claim.context);
    let prompt = if context.is_empty() {
        claim.subject.clone()
    } else {
        format!("{}\n{}", claim.subject, context)
    };

    let reasoning = format!(
        "{} verdict: drift {:.3} against threshold {:.3}; {} of {} ok verdicts refute the claim",
        decision.decision,
        decision.drift.unwrap_or_default(),
        decision.threshold,
        decision.refuting.len(),
        decision.ok_count()
    );

    let evidence = decision
        .verdicts
        .iter()
        .filter_map(|v| v.observation().map(|o| format!("{} observed {:?}", v.verifier, o)))
        .collect::<Vec<_>>()
        .join("; ");

    FailureTrace::new(
        prompt,
        reasoning,
        FailureKind::Hallucination,
        severity,
        TraceSource::Consensus {
            decision_id: decision.id,
        },
    )
    .with_evidence(evidence)
}
