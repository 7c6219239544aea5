//! Correction pipeline.
//!
//! Confirmed failures travel from the consensus engine and the completeness
//! auditor to the patcher as explicit messages. A single worker task owns
//! the route `failure → diagnosis → patch request → lesson store`, and every
//! envelope it receives ends in exactly one [`PipelineOutcome`] reported on
//! the envelope's reply channel. A caller therefore never waits on a chain
//! that has silently stalled: either an outcome arrives or the pipeline is
//! reported closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditOutcome, AuditResult, Decision, FailureTrace, Lesson, PatchOutcome,
};
use crate::services::consensus::Evaluation;
use crate::services::patcher::Patcher;

const CHANNEL_CAPACITY: usize = 64;

/// Terminal state of one correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// A lesson went live in the store.
    Applied { lesson_id: Uuid },
    /// The patch waits for the next batch pass.
    Queued,
    /// This trace was corrected before.
    AlreadyApplied,
    /// A conflicting lesson existed; the higher confidence one was kept.
    ConflictResolved { kept: Uuid, discarded: Uuid },
    /// No valid patch could be derived or committed.
    Rejected { reason: String },
    /// Nothing can be concluded: no ok verdicts, or the shadow verifier
    /// was unavailable.
    Inconclusive,
    /// There was nothing to correct.
    NoFailure,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Queued => "queued",
            Self::AlreadyApplied => "already_applied",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::Rejected { .. } => "rejected",
            Self::Inconclusive => "inconclusive",
            Self::NoFailure => "no_failure",
        }
    }
}

impl From<PatchOutcome> for PipelineOutcome {
    fn from(outcome: PatchOutcome) -> Self {
        match outcome {
            PatchOutcome::Applied { lesson_id } => Self::Applied { lesson_id },
            PatchOutcome::Queued => Self::Queued,
            PatchOutcome::AlreadyApplied => Self::AlreadyApplied,
            PatchOutcome::ConflictResolved { kept, discarded } => {
                Self::ConflictResolved { kept, discarded }
            }
        }
    }
}

/// What entered the pipeline.
#[derive(Debug, Clone)]
pub enum CorrectionInput {
    Consensus(Evaluation),
    Audit(AuditResult),
}

/// Message carrying one correction and the channel for its outcome.
#[derive(Debug)]
pub struct CorrectionEnvelope {
    pub id: Uuid,
    pub input: CorrectionInput,
    pub submitted_at: DateTime<Utc>,
    reply: oneshot::Sender<PipelineOutcome>,
}

/// Handle to the running correction worker.
pub struct CorrectionPipeline {
    tx: mpsc::Sender<CorrectionEnvelope>,
    worker: JoinHandle<()>,
}

impl CorrectionPipeline {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(patcher: Arc<Patcher>) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = tokio::spawn(run_worker(patcher, rx));
        Self { tx, worker }
    }

    /// Send one correction and wait for its terminal outcome.
    pub async fn submit(&self, input: CorrectionInput) -> DomainResult<PipelineOutcome> {
        let (reply, outcome) = oneshot::channel();
        let envelope = CorrectionEnvelope {
            id: Uuid::new_v4(),
            input,
            submitted_at: Utc::now(),
            reply,
        };

        self.tx
            .send(envelope)
            .await
            .map_err(|_| DomainError::PipelineClosed)?;
        outcome.await.map_err(|_| DomainError::PipelineClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop accepting envelopes and wait for queued ones to finish.
    pub async fn shutdown(self) {
        let Self { tx, worker } = self;
        drop(tx);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Correction worker ended abnormally");
        }
    }
}

async fn run_worker(patcher: Arc<Patcher>, mut rx: mpsc::Receiver<CorrectionEnvelope>) {
    tracing::debug!("Correction pipeline started");

    while let Some(envelope) = rx.recv().await {
        let outcome = route(&patcher, envelope.input).await;
        tracing::info!(
            envelope_id = %envelope.id,
            outcome = outcome.as_str(),
            queued_ms = (Utc::now() - envelope.submitted_at).num_milliseconds(),
            "Correction finished"
        );
        if envelope.reply.send(outcome).is_err() {
            tracing::debug!(envelope_id = %envelope.id, "Correction caller went away");
        }
    }

    tracing::debug!("Correction pipeline stopped");
}

async fn route(patcher: &Patcher, input: CorrectionInput) -> PipelineOutcome {
    match input {
        CorrectionInput::Consensus(evaluation) => match evaluation.trace {
            Some(_) if evaluation.coalesced => PipelineOutcome::AlreadyApplied,
            Some(_)
                if evaluation.decision.decision == Decision::Flag
                    && !patcher.config().patch_on_flag =>
            {
                tracing::debug!(
                    decision_id = %evaluation.decision.id,
                    "Flag decision not routed to patching"
                );
                PipelineOutcome::NoFailure
            }
            Some(trace) => correct(patcher, trace).await,
            None if evaluation.decision.decision == Decision::Inconclusive => {
                PipelineOutcome::Inconclusive
            }
            None => PipelineOutcome::NoFailure,
        },
        CorrectionInput::Audit(result) => match (result.outcome, result.failure_trace) {
            (AuditOutcome::LazinessDetected, Some(trace)) => {
                correct(patcher, Arc::new(trace)).await
            }
            (AuditOutcome::LazinessDetected, None) => PipelineOutcome::Rejected {
                reason: "laziness detected without a failure trace".to_string(),
            },
            (AuditOutcome::Inconclusive, _) => PipelineOutcome::Inconclusive,
            (AuditOutcome::NotTriggered | AuditOutcome::GenuineFailure, _) => {
                PipelineOutcome::NoFailure
            }
        },
    }
}

async fn correct(patcher: &Patcher, trace: Arc<FailureTrace>) -> PipelineOutcome {
    let trace_id = trace.trace_id;
    let lesson_type = match patcher.diagnose(&trace) {
        Ok(diagnosis) => diagnosis.root_cause.lesson_type(),
        Err(e) => return rejected(trace_id, &e),
    };

    let snapshot = patcher.store().snapshot();
    let tokens = trace.evidence_tokens();
    let prior: Option<&Lesson> = snapshot
        .matching_tokens(&tokens)
        .into_iter()
        .find(|l| l.lesson_type == lesson_type);

    let request = match patcher.propose(trace, prior) {
        Ok(request) => request,
        Err(e) => return rejected(trace_id, &e),
    };

    match patcher.apply(request).await {
        Ok(outcome) => outcome.into(),
        Err(e) => rejected(trace_id, &e),
    }
}

fn rejected(trace_id: Uuid, error: &DomainError) -> PipelineOutcome {
    tracing::warn!(trace_id = %trace_id, error = %error, "Correction rejected");
    PipelineOutcome::Rejected {
        reason: error.to_string(),
    }
}
