//! Kernel services.
//!
//! Leaf first: the audit trail and lesson store hold state; the consensus
//! engine, completeness auditor and patcher act on it; the correction
//! pipeline and maintenance daemon move work between them; the kernel
//! facade ties everything together.

pub mod audit_trail;
pub mod completeness_auditor;
pub mod consensus;
pub mod correction_pipeline;
pub mod kernel;
pub mod lesson_store;
pub mod maintenance_daemon;
pub mod patcher;
pub mod shadow_verification;

pub use audit_trail::{AuditFilter, AuditStats, AuditTrail};
pub use completeness_auditor::{AuditorStats, CompletenessAuditor};
pub use consensus::{reduce_verdicts, ConsensusEngine, Evaluation, Reduction};
pub use correction_pipeline::{
    CorrectionEnvelope, CorrectionInput, CorrectionPipeline, PipelineOutcome,
};
pub use kernel::{Kernel, KernelBuilder};
pub use lesson_store::{
    FramedRule, InsertOutcome, LessonSnapshot, LessonStore, PurgeReport, TaskFraming,
};
pub use maintenance_daemon::{
    DaemonHandle, DaemonStatus, MaintenanceConfig, MaintenanceDaemon, MaintenanceEvent,
    StopReason,
};
pub use patcher::{BatchReport, Patcher};
pub use shadow_verification::{ShadowOutcome, ShadowVerifier};
