//! Domain models: the closed, validated data contracts of the kernel.

pub mod audit;
pub mod audit_record;
pub mod claim;
pub mod config;
pub mod consensus;
pub mod failure;
pub mod lesson;
pub mod patch;
pub mod verdict;

pub use audit::{
    AgentResponse, AuditOutcome, AuditResult, AuditTask, AuditTicket, GiveUpSignal,
    ShadowFinding, ShadowRequest, ShadowVerdict,
};
pub use audit_record::{AuditEvent, AuditEventKind, AuditRecord};
pub use claim::{
    context_text, validate_context, Claim, ClaimFingerprint, ClaimVector, ContextMap,
    ContextValue, VectorKind, RESERVED_CONTEXT_KEYS,
};
pub use config::{
    AuditTrailConfig, AuditorConfig, ConsensusConfig, DatabaseConfig, DecayConfig, KernelConfig,
    LogFormat, LoggingConfig, PatcherConfig, RotationPolicy,
};
pub use consensus::{ConsensusDecision, Decision};
pub use failure::{FailureKind, FailureTrace, Severity, ToolCall, TraceSource};
pub use lesson::{
    tokenize, CapabilityUpgrade, DecayTrigger, Lesson, LessonKey, LessonType, TriggerPattern,
};
pub use patch::{ApplyStrategy, Diagnosis, PatchOutcome, PatchRequest, RootCause};
pub use verdict::{Verdict, VerdictPayload, VerdictStatus};
