//! Audit trail records.
//!
//! The audit trail is append-only and timestamp ordered: one record per
//! event, never rewritten. Records double as structured training data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::AuditOutcome;
use super::claim::ClaimFingerprint;
use super::consensus::ConsensusDecision;
use super::failure::FailureTrace;
use super::lesson::{CapabilityUpgrade, LessonType, TriggerPattern};
use super::patch::ApplyStrategy;
use super::verdict::Verdict;

/// Event payload of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Decision(ConsensusDecision),
    FailureTrace(FailureTrace),
    /// A verifier answered after its claim's deadline.
    LateVerdict {
        fingerprint: ClaimFingerprint,
        decision_id: Uuid,
        verdict: Verdict,
    },
    AuditCompleted {
        task_id: Uuid,
        outcome: AuditOutcome,
    },
    PatchApplied {
        request_id: Uuid,
        trace_id: Uuid,
        lesson_id: Uuid,
        strategy: ApplyStrategy,
    },
    PatchConflict {
        trigger: TriggerPattern,
        lesson_type: LessonType,
        kept: Uuid,
        discarded: Uuid,
        kept_confidence: f64,
        discarded_confidence: f64,
    },
    LessonsPurged {
        upgrade: CapabilityUpgrade,
        retired: Vec<Uuid>,
    },
}

/// Coarse event kind, for filtering and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Decision,
    FailureTrace,
    LateVerdict,
    AuditCompleted,
    PatchApplied,
    PatchConflict,
    LessonsPurged,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::FailureTrace => "failure_trace",
            Self::LateVerdict => "late_verdict",
            Self::AuditCompleted => "audit_completed",
            Self::PatchApplied => "patch_applied",
            Self::PatchConflict => "patch_conflict",
            Self::LessonsPurged => "lessons_purged",
        }
    }
}

impl AuditEvent {
    pub fn kind(&self) -> AuditEventKind {
        match self {
            Self::Decision(_) => AuditEventKind::Decision,
            Self::FailureTrace(_) => AuditEventKind::FailureTrace,
            Self::LateVerdict { .. } => AuditEventKind::LateVerdict,
            Self::AuditCompleted { .. } => AuditEventKind::AuditCompleted,
            Self::PatchApplied { .. } => AuditEventKind::PatchApplied,
            Self::PatchConflict { .. } => AuditEventKind::PatchConflict,
            Self::LessonsPurged { .. } => AuditEventKind::LessonsPurged,
        }
    }

    /// Primary entity the event is about.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            Self::Decision(d) => Some(d.id),
            Self::FailureTrace(t) => Some(t.trace_id),
            Self::LateVerdict { decision_id, .. } => Some(*decision_id),
            Self::AuditCompleted { task_id, .. } => Some(*task_id),
            Self::PatchApplied { trace_id, .. } => Some(*trace_id),
            Self::PatchConflict { kept, .. } => Some(*kept),
            Self::LessonsPurged { .. } => None,
        }
    }
}

/// One sequenced entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Strictly increasing within one trail.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}
