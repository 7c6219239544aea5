//! Patch request model: binds a failure trace to a proposed lesson.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::claim::{validate_context, ContextMap};
use super::failure::FailureTrace;
use super::lesson::{Lesson, LessonType};
use crate::domain::errors::{DomainError, DomainResult};

/// How a patch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategy {
    /// Write into the live store synchronously; effective on the next task.
    HotfixNow,
    /// Queue for the periodic, dedup-aware batch pass.
    BatchLater,
}

impl ApplyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotfixNow => "hotfix_now",
            Self::BatchLater => "batch_later",
        }
    }
}

/// Structured root cause of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    /// The data existed at another location (archived or renamed).
    ResourceRelocated,
    /// The agent stopped without evidence of an exhaustive search.
    PrematureTermination,
    /// A tool rejected the agent's syntax or identifiers.
    SyntaxMisuse,
    /// The agent took an unsafe action.
    UnsafeAction,
    /// The agent asserted what verifiers could not confirm.
    UnsupportedAssertion,
}

impl RootCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceRelocated => "resource_relocated",
            Self::PrematureTermination => "premature_termination",
            Self::SyntaxMisuse => "syntax_misuse",
            Self::UnsafeAction => "unsafe_action",
            Self::UnsupportedAssertion => "unsupported_assertion",
        }
    }

    pub fn lesson_type(&self) -> LessonType {
        match self {
            Self::SyntaxMisuse => LessonType::Syntax,
            Self::UnsafeAction => LessonType::Security,
            Self::ResourceRelocated | Self::PrematureTermination | Self::UnsupportedAssertion => {
                LessonType::Business
            }
        }
    }
}

/// Short, structured description of why a failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: RootCause,
    pub summary: String,
    /// Identifiers from the trace that characterise the failing context.
    pub salient_terms: Vec<String>,
}

/// A proposed lesson bound to the trace that justifies it.
///
/// Consumed exactly once by the application step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub id: Uuid,
    pub trace: Arc<FailureTrace>,
    pub diagnosis: Diagnosis,
    pub lesson: Lesson,
    pub apply_strategy: ApplyStrategy,
    pub context: ContextMap,
}

impl PatchRequest {
    /// Bind a lesson to its trace.
    ///
    /// Fails when any trigger term is absent from the trace: a trigger must
    /// generalise the evidence, never invent a context unrelated to it.
    pub fn new(
        trace: Arc<FailureTrace>,
        diagnosis: Diagnosis,
        lesson: Lesson,
        apply_strategy: ApplyStrategy,
        context: ContextMap,
    ) -> DomainResult<Self> {
        validate_context(&context)?;

        let unmatched = lesson
            .trigger_pattern
            .unmatched_in(&trace.evidence_tokens());
        if !unmatched.is_empty() {
            return Err(DomainError::PatchDerivation {
                trace_id: trace.trace_id,
                unmatched,
            });
        }

        if lesson.source_trace_id != trace.trace_id {
            return Err(DomainError::validation(format!(
                "lesson {} cites trace {} but the request binds trace {}",
                lesson.id, lesson.source_trace_id, trace.trace_id
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            trace,
            diagnosis,
            lesson,
            apply_strategy,
            context,
        })
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace.trace_id
    }
}

/// Terminal result of applying a patch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PatchOutcome {
    /// The lesson is live in the store.
    Applied { lesson_id: Uuid },
    /// The request waits for the next batch pass.
    Queued,
    /// A request for the same trace was applied or queued before.
    AlreadyApplied,
    /// Same trigger and type with different rule text; the higher
    /// confidence lesson was kept.
    ConflictResolved { kept: Uuid, discarded: Uuid },
}
