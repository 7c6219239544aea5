//! Kernel facade.
//!
//! Wires the consensus engine, completeness auditor, patcher, lesson store
//! and audit trail together and exposes the inbound interface used by an
//! agent runtime. Failures detected on the way in are routed through the
//! correction pipeline before the call returns, so a hotfix lesson is live
//! for the very next task.

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentResponse, AuditOutcome, AuditResult, AuditTask, CapabilityUpgrade, Claim,
    ConsensusDecision, KernelConfig,
};
use crate::domain::ports::{AuditSink, LessonLog, ShadowAdapter, VerifierAdapter};
use crate::infrastructure::config::ConfigLoader;
use crate::services::audit_trail::AuditTrail;
use crate::services::completeness_auditor::{AuditorStats, CompletenessAuditor};
use crate::services::consensus::ConsensusEngine;
use crate::services::correction_pipeline::{CorrectionInput, CorrectionPipeline, PipelineOutcome};
use crate::services::lesson_store::{LessonStore, PurgeReport, TaskFraming};
use crate::services::maintenance_daemon::MaintenanceDaemon;
use crate::services::patcher::{BatchReport, Patcher};

/// Assembles a [`Kernel`] from its configuration and adapters.
pub struct KernelBuilder {
    config: KernelConfig,
    verifiers: Vec<Arc<dyn VerifierAdapter>>,
    shadow: Option<Arc<dyn ShadowAdapter>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    lesson_log: Option<Arc<dyn LessonLog>>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            verifiers: Vec::new(),
            shadow: None,
            audit_sink: None,
            lesson_log: None,
        }
    }

    pub fn verifier(mut self, adapter: Arc<dyn VerifierAdapter>) -> Self {
        self.verifiers.push(adapter);
        self
    }

    pub fn verifiers(mut self, adapters: impl IntoIterator<Item = Arc<dyn VerifierAdapter>>) -> Self {
        self.verifiers.extend(adapters);
        self
    }

    pub fn shadow(mut self, adapter: Arc<dyn ShadowAdapter>) -> Self {
        self.shadow = Some(adapter);
        self
    }

    /// Persist the audit trail; without a sink it is kept in memory only.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Persist lessons; without a log the store starts empty every run.
    pub fn lesson_log(mut self, log: Arc<dyn LessonLog>) -> Self {
        self.lesson_log = Some(log);
        self
    }

    /// Build the kernel. Must be called from within a tokio runtime.
    ///
    /// The configuration is validated here as well as by the loader, since
    /// a `KernelConfig` can be assembled in code.
    pub async fn build(self) -> DomainResult<Kernel> {
        ConfigLoader::validate(&self.config)
            .map_err(|e| DomainError::configuration(e.to_string()))?;

        let shadow = self
            .shadow
            .ok_or_else(|| DomainError::configuration("kernel needs a shadow verifier adapter"))?;

        let audit = Arc::new(match self.audit_sink {
            Some(sink) => AuditTrail::open(self.config.audit_trail.clone(), sink).await?,
            None => AuditTrail::new(self.config.audit_trail.clone()),
        });

        let store = match self.lesson_log {
            Some(log) => LessonStore::open(log, self.config.decay.trigger).await?,
            None => LessonStore::new(self.config.decay.trigger),
        };
        let store = Arc::new(store.with_audit(audit.clone()));

        let consensus = ConsensusEngine::new(
            self.verifiers,
            self.config.consensus.clone(),
            audit.clone(),
        )?;
        let auditor = CompletenessAuditor::new(&self.config.auditor, shadow, audit.clone())?;
        let patcher = Arc::new(
            Patcher::new(self.config.patcher.clone(), store.clone()).with_audit(audit.clone()),
        );
        let pipeline = CorrectionPipeline::spawn(patcher.clone());

        tracing::info!(
            threshold = self.config.consensus.threshold,
            decay = ?self.config.decay.trigger,
            lessons = store.snapshot().len(),
            "Verification kernel ready"
        );

        Ok(Kernel {
            config: self.config,
            audit,
            consensus,
            auditor,
            store,
            patcher,
            pipeline,
        })
    }
}

/// The self-correcting verification kernel.
pub struct Kernel {
    config: KernelConfig,
    audit: Arc<AuditTrail>,
    consensus: ConsensusEngine,
    auditor: CompletenessAuditor,
    store: Arc<LessonStore>,
    patcher: Arc<Patcher>,
    pipeline: CorrectionPipeline,
}

impl Kernel {
    pub fn builder(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Evaluate a claim against every verifier.
    ///
    /// A FAIL (or, with `patch_on_flag`, a FLAG) is corrected before this
    /// returns. Callers that joined another caller's evaluation do not
    /// route the shared trace a second time.
    pub async fn evaluate(&self, claim: &Claim) -> DomainResult<ConsensusDecision> {
        let evaluation = self.consensus.evaluate_with_trace(claim).await?;

        if evaluation.trace.is_some() && !evaluation.coalesced {
            let decision_id = evaluation.decision.id;
            let outcome = self
                .pipeline
                .submit(CorrectionInput::Consensus(evaluation.clone()))
                .await?;
            log_correction(decision_id, &outcome);
        }

        Ok(evaluation.decision)
    }

    /// Audit an agent response for premature give-up.
    pub async fn audit(
        &self,
        task: &AuditTask,
        response: &AgentResponse,
    ) -> DomainResult<AuditResult> {
        let result = self.auditor.audit(task, response).await?;

        if result.outcome == AuditOutcome::LazinessDetected {
            let outcome = self
                .pipeline
                .submit(CorrectionInput::Audit(result.clone()))
                .await?;
            log_correction(task.id, &outcome);
        }

        Ok(result)
    }

    /// Rules to inject into a task's framing, taken from one snapshot.
    pub fn frame(&self, context: &str) -> TaskFraming {
        self.store.framing(context)
    }

    /// Apply the decay policy for a capability upgrade.
    pub async fn capability_upgrade(&self, upgrade: &CapabilityUpgrade) -> DomainResult<PurgeReport> {
        self.store.purge(upgrade).await
    }

    /// Apply queued patches now.
    pub async fn run_batch(&self) -> DomainResult<BatchReport> {
        self.patcher.run_batch().await
    }

    /// A maintenance daemon over this kernel's patcher; call `run` on it.
    pub fn maintenance_daemon(&self) -> MaintenanceDaemon {
        MaintenanceDaemon::with_defaults(self.patcher.clone())
    }

    pub fn audit_trail(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn lesson_store(&self) -> &Arc<LessonStore> {
        &self.store
    }

    pub fn auditor_stats(&self) -> AuditorStats {
        self.auditor.stats()
    }

    /// Finish queued corrections and stop the pipeline worker.
    pub async fn shutdown(self) {
        self.pipeline.shutdown().await;
    }
}

fn log_correction(source_id: uuid::Uuid, outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::Rejected { reason } => {
            tracing::warn!(source_id = %source_id, %reason, "Failure could not be corrected");
        }
        other => {
            tracing::info!(source_id = %source_id, outcome = other.as_str(), "Failure routed to correction");
        }
    }
}
