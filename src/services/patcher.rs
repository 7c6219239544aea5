//! Patcher service.
//!
//! Turns a confirmed failure into a durable correction. A [`FailureTrace`]
//! is diagnosed, a [`Lesson`] whose trigger is built only from terms that
//! occur in the trace is proposed, and the resulting [`PatchRequest`] is
//! either written to the [`LessonStore`] immediately (critical failures) or
//! queued for the periodic batch pass, which merges near duplicates before
//! committing.

use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApplyStrategy, AuditEvent, ContextMap, Diagnosis, FailureKind, FailureTrace,
    Lesson, PatchOutcome, PatchRequest, PatcherConfig, RootCause, TraceSource, TriggerPattern,
};
use crate::services::audit_trail::AuditTrail;
use crate::services::lesson_store::{InsertOutcome, LessonStore};

// Dotted paths, snake_case names and quoted identifiers.
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+|[A-Za-z0-9]*_[A-Za-z0-9_]+|["'`][A-Za-z_][A-Za-z0-9_ .]*["'`]"#,
    )
    .expect("valid identifier pattern")
});

static SYNTAX_ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:syntax error|parse error|unknown (?:column|identifier|field|table)|no such (?:column|table)|unexpected token|invalid identifier)\b",
    )
    .expect("valid syntax error pattern")
});

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "from", "with", "where", "select", "into", "that", "this", "what",
    "which", "when", "there", "their", "about", "please", "find", "show", "list", "return",
    "query", "table", "data", "value", "values", "none", "null", "true", "false", "order",
    "group", "limit", "count", "should", "would", "could", "have", "been", "were", "does",
    "verdict", "verdicts", "against", "threshold", "refute", "claim", "drift", "response",
];

// Words at least this long are salient even without identifier shape.
const LONG_WORD_LEN: usize = 6;

/// Result of one batch application pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub drained: usize,
    /// Requests dropped as exact or near duplicates of a kept request.
    pub merged: usize,
    pub applied: Vec<Uuid>,
    pub already_applied: usize,
    pub conflicts: usize,
}

#[derive(Default)]
struct PendingQueue {
    requests: VecDeque<PatchRequest>,
    traces: HashSet<Uuid>,
}

/// Diagnoses failures and applies the resulting lessons.
pub struct Patcher {
    config: PatcherConfig,
    store: Arc<LessonStore>,
    audit: Option<Arc<AuditTrail>>,
    pending: Mutex<PendingQueue>,
}

impl Patcher {
    pub fn new(config: PatcherConfig, store: Arc<LessonStore>) -> Self {
        Self {
            config,
            store,
            audit: None,
            pending: Mutex::new(PendingQueue::default()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LessonStore> {
        &self.store
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.requests.len()
    }

    /// Derive a structured root cause from the trace.
    pub fn diagnose(&self, trace: &FailureTrace) -> DomainResult<Diagnosis> {
        let tool_output = trace
            .tool_call
            .as_ref()
            .and_then(|c| c.output.as_deref())
            .unwrap_or("");

        let root_cause = match trace.failure_kind {
            FailureKind::CommissionSafety => RootCause::UnsafeAction,
            _ if SYNTAX_ERROR_PATTERN.is_match(tool_output) => RootCause::SyntaxMisuse,
            FailureKind::OmissionLaziness if trace.evidence.is_some() => {
                RootCause::ResourceRelocated
            }
            FailureKind::OmissionLaziness => RootCause::PrematureTermination,
            FailureKind::Hallucination => RootCause::UnsupportedAssertion,
        };

        let salient_terms = self.salient_terms(trace);
        if salient_terms.is_empty() {
            return Err(DomainError::validation(format!(
                "trace {} carries no salient terms to build a trigger from",
                trace.trace_id
            )));
        }

        let summary = match root_cause {
            RootCause::ResourceRelocated => format!(
                "requested resource exists elsewhere ({})",
                trace.evidence.as_deref().unwrap_or("unknown location")
            ),
            RootCause::PrematureTermination => {
                "agent stopped searching before exhausting alternatives".to_string()
            }
            RootCause::SyntaxMisuse => "tool call used invalid syntax or identifiers".to_string(),
            RootCause::UnsafeAction => "agent attempted an unsafe action".to_string(),
            RootCause::UnsupportedAssertion => {
                "asserted values diverge from independent verification".to_string()
            }
        };

        Ok(Diagnosis {
            root_cause,
            summary,
            salient_terms,
        })
    }

    /// Identifier-shaped terms first, then long words; tool input before
    /// prompt before reasoning.
    fn salient_terms(&self, trace: &FailureTrace) -> Vec<String> {
        let mut sources: Vec<&str> = Vec::new();
        if let Some(call) = &trace.tool_call {
            sources.push(&call.input);
        }
        sources.push(&trace.prompt);
        sources.push(&trace.reasoning_trace);

        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        let mut push = |token: String, terms: &mut Vec<String>| {
            let usable = token.chars().count() >= TriggerPattern::MIN_TERM_LEN
                && !token.chars().all(|c| c.is_ascii_digit())
                && !STOP_WORDS.contains(&token.as_str());
            if usable && seen.insert(token.clone()) {
                terms.push(token);
            }
        };

        for source in &sources {
            for m in IDENTIFIER_PATTERN.find_iter(source) {
                for token in ordered_tokens(m.as_str()) {
                    push(token, &mut terms);
                }
            }
        }
        for source in &sources {
            for token in ordered_tokens(source) {
                if token.chars().count() >= LONG_WORD_LEN {
                    push(token, &mut terms);
                }
            }
        }

        terms.truncate(self.config.max_trigger_terms);
        terms
    }

    /// Propose a patch for the trace, optionally amending a prior lesson.
    pub fn propose(
        &self,
        trace: Arc<FailureTrace>,
        prior: Option<&Lesson>,
    ) -> DomainResult<PatchRequest> {
        let diagnosis = self.diagnose(&trace)?;
        let lesson_type = diagnosis.root_cause.lesson_type();
        let clause = rule_clause(&diagnosis, &trace);

        let tokens = trace.evidence_tokens();
        let amendable = prior.filter(|p| {
            p.lesson_type == lesson_type && p.trigger_pattern.unmatched_in(&tokens).is_empty()
        });

        let lesson = match amendable {
            Some(prior) => {
                let rule_text = if prior.rule_text.contains(&clause) {
                    prior.rule_text.clone()
                } else {
                    format!("{} {}", prior.rule_text, clause)
                };
                let confidence = (prior.confidence.max(base_confidence(diagnosis.root_cause))
                    + 0.1)
                    .min(1.0);
                tracing::debug!(
                    prior_id = %prior.id,
                    trigger = %prior.trigger_pattern,
                    "Amending prior lesson"
                );
                Lesson::new(
                    prior.trigger_pattern.clone(),
                    rule_text,
                    lesson_type,
                    confidence,
                    trace.trace_id,
                )
            }
            None => {
                let trigger = TriggerPattern::new(&diagnosis.salient_terms)?;
                Lesson::new(
                    trigger,
                    format!(
                        "When a task references {}: {}",
                        diagnosis.salient_terms.join(", "),
                        clause
                    ),
                    lesson_type,
                    base_confidence(diagnosis.root_cause),
                    trace.trace_id,
                )
            }
        };

        let apply_strategy = if trace.is_critical() {
            ApplyStrategy::HotfixNow
        } else {
            ApplyStrategy::BatchLater
        };

        let mut context = ContextMap::new();
        context.insert("root_cause".to_string(), diagnosis.root_cause.as_str().into());
        context.insert("failure_kind".to_string(), trace.failure_kind.as_str().into());
        let origin = match &trace.source {
            TraceSource::Consensus { .. } => "consensus",
            TraceSource::Audit { .. } => "audit",
        };
        context.insert("origin".to_string(), origin.into());

        PatchRequest::new(trace, diagnosis, lesson, apply_strategy, context)
    }

    /// Apply a patch request according to its strategy.
    ///
    /// Idempotent per trace id: a second request for an already applied or
    /// already queued trace reports `AlreadyApplied`.
    pub async fn apply(&self, request: PatchRequest) -> DomainResult<PatchOutcome> {
        match request.apply_strategy {
            ApplyStrategy::HotfixNow => self.commit(&request).await,
            ApplyStrategy::BatchLater => {
                let trace_id = request.trace_id();
                if self.store.is_applied(trace_id).await {
                    return Ok(PatchOutcome::AlreadyApplied);
                }
                let mut pending = self.pending.lock().await;
                if !pending.traces.insert(trace_id) {
                    return Ok(PatchOutcome::AlreadyApplied);
                }
                tracing::debug!(
                    request_id = %request.id,
                    trace_id = %trace_id,
                    queued = pending.requests.len() + 1,
                    "Patch queued for batch application"
                );
                pending.requests.push_back(request);
                Ok(PatchOutcome::Queued)
            }
        }
    }

    async fn commit(&self, request: &PatchRequest) -> DomainResult<PatchOutcome> {
        let lesson = request.lesson.clone();
        let lesson_id = lesson.id;
        let outcome = match self.store.insert(lesson).await? {
            InsertOutcome::Inserted => PatchOutcome::Applied { lesson_id },
            InsertOutcome::AlreadyApplied | InsertOutcome::Duplicate { .. } => {
                PatchOutcome::AlreadyApplied
            }
            InsertOutcome::Superseded { retired } => PatchOutcome::ConflictResolved {
                kept: lesson_id,
                discarded: retired,
            },
            InsertOutcome::Rejected { kept } => PatchOutcome::ConflictResolved {
                kept,
                discarded: lesson_id,
            },
        };

        let committed = match &outcome {
            PatchOutcome::Applied { .. } => true,
            PatchOutcome::ConflictResolved { kept, .. } => *kept == lesson_id,
            PatchOutcome::Queued | PatchOutcome::AlreadyApplied => false,
        };
        if committed {
            tracing::info!(
                request_id = %request.id,
                lesson_id = %lesson_id,
                strategy = request.apply_strategy.as_str(),
                "Patch applied"
            );
            if let Some(audit) = &self.audit {
                audit
                    .record(AuditEvent::PatchApplied {
                        request_id: request.id,
                        trace_id: request.trace_id(),
                        lesson_id,
                        strategy: request.apply_strategy,
                    })
                    .await?;
            }
        }

        Ok(outcome)
    }

    /// Drain the pending queue, merge duplicates and commit the survivors.
    pub async fn run_batch(&self) -> DomainResult<BatchReport> {
        let drained: Vec<PatchRequest> = {
            let mut pending = self.pending.lock().await;
            pending.traces.clear();
            pending.requests.drain(..).collect()
        };

        let mut report = BatchReport {
            drained: drained.len(),
            ..BatchReport::default()
        };
        if drained.is_empty() {
            return Ok(report);
        }

        let mut ordered = drained;
        ordered.sort_by(|a, b| b.lesson.confidence.total_cmp(&a.lesson.confidence));

        let mut survivors: Vec<PatchRequest> = Vec::new();
        for request in ordered {
            let duplicate = survivors.iter().any(|kept| {
                kept.lesson.lesson_type == request.lesson.lesson_type
                    && (kept.lesson.trigger_pattern == request.lesson.trigger_pattern
                        || kept
                            .lesson
                            .trigger_pattern
                            .similarity(&request.lesson.trigger_pattern)
                            >= self.config.near_duplicate_similarity)
            });
            if duplicate {
                report.merged += 1;
            } else {
                survivors.push(request);
            }
        }

        let mut remaining = survivors.into_iter();
        while let Some(request) = remaining.next() {
            match self.commit(&request).await {
                Ok(PatchOutcome::Applied { lesson_id }) => report.applied.push(lesson_id),
                Ok(PatchOutcome::ConflictResolved { kept, .. }) => {
                    report.conflicts += 1;
                    if kept == request.lesson.id {
                        report.applied.push(kept);
                    }
                }
                Ok(PatchOutcome::AlreadyApplied | PatchOutcome::Queued) => {
                    report.already_applied += 1;
                }
                Err(e) => {
                    // Put uncommitted work back so the next pass retries it.
                    let mut pending = self.pending.lock().await;
                    for request in std::iter::once(request).chain(remaining) {
                        pending.traces.insert(request.trace_id());
                        pending.requests.push_back(request);
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            drained = report.drained,
            merged = report.merged,
            applied = report.applied.len(),
            conflicts = report.conflicts,
            "Batch patch pass complete"
        );

        Ok(report)
    }
}

fn ordered_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn base_confidence(root_cause: RootCause) -> f64 {
    match root_cause {
        RootCause::UnsafeAction => 0.9,
        RootCause::ResourceRelocated => 0.8,
        RootCause::SyntaxMisuse => 0.7,
        RootCause::PrematureTermination => 0.6,
        RootCause::UnsupportedAssertion => 0.5,
    }
}

fn rule_clause(diagnosis: &Diagnosis, trace: &FailureTrace) -> String {
    match diagnosis.root_cause {
        RootCause::ResourceRelocated => format!(
            "check archival and renamed locations before reporting absence; it was found at {}.",
            trace.evidence.as_deref().unwrap_or("an alternate location")
        ),
        RootCause::PrematureTermination => {
            "search alternative locations and list what was tried before reporting that data is missing.".to_string()
        }
        RootCause::SyntaxMisuse => {
            let tool = trace
                .tool_call
                .as_ref()
                .map_or("tool", |c| c.name.as_str());
            format!("verify identifiers and syntax against the current schema before the {tool} call.")
        }
        RootCause::UnsafeAction => {
            "do not perform destructive or irreversible actions without explicit confirmation.".to_string()
        }
        RootCause::UnsupportedAssertion => {
            "only assert values that independent evidence supports.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DecayTrigger, LessonType, Severity, ToolCall};

    fn patcher() -> Patcher {
        Patcher::new(
            PatcherConfig::default(),
            Arc::new(LessonStore::new(DecayTrigger::AnyUpgrade)),
        )
    }

    fn laziness(severity: Severity) -> FailureTrace {
        FailureTrace::new(
            "How many orders shipped in March 2023?",
            "Queried sales.orders and got nothing, so no data exists.",
            FailureKind::OmissionLaziness,
            severity,
            TraceSource::Audit {
                task_id: Uuid::new_v4(),
            },
        )
        .with_tool_call(
            ToolCall::new("sql", "SELECT count(*) FROM sales.orders WHERE shipped_at >= '2023-03-01'")
                .with_output("0 rows"),
        )
        .with_evidence("archive.orders_2023")
    }

    #[test]
    fn test_diagnose_relocated_resource() {
        let diagnosis = patcher().diagnose(&laziness(Severity::NonCritical)).unwrap();
        assert_eq!(diagnosis.root_cause, RootCause::ResourceRelocated);
        assert_eq!(diagnosis.salient_terms, vec!["sales", "orders", "shipped_at"]);
    }

    #[test]
    fn test_diagnose_syntax_misuse_from_tool_output() {
        let trace = FailureTrace::new(
            "Total revenue per region",
            "ran the query",
            FailureKind::Hallucination,
            Severity::NonCritical,
            TraceSource::Audit {
                task_id: Uuid::new_v4(),
            },
        )
        .with_tool_call(
            ToolCall::new("sql", "SELECT sum(revenue_usd) FROM finance.revenue")
                .with_output("ERROR: unknown column revenue_usd"),
        );
        let diagnosis = patcher().diagnose(&trace).unwrap();
        assert_eq!(diagnosis.root_cause, RootCause::SyntaxMisuse);
        assert_eq!(diagnosis.root_cause.lesson_type(), LessonType::Syntax);
    }

    #[test]
    fn test_trigger_is_derivable_from_trace() {
        let trace = Arc::new(laziness(Severity::NonCritical));
        let request = patcher().propose(trace.clone(), None).unwrap();
        let tokens = trace.evidence_tokens();
        assert!(request.lesson.trigger_pattern.unmatched_in(&tokens).is_empty());
        assert_eq!(request.trace_id(), trace.trace_id);
        assert!(request.lesson.rule_text.contains("archive.orders_2023"));
    }

    #[test]
    fn test_critical_trace_selects_hotfix() {
        let p = patcher();
        let critical = p.propose(Arc::new(laziness(Severity::Critical)), None).unwrap();
        let routine = p.propose(Arc::new(laziness(Severity::NonCritical)), None).unwrap();
        assert_eq!(critical.apply_strategy, ApplyStrategy::HotfixNow);
        assert_eq!(routine.apply_strategy, ApplyStrategy::BatchLater);
    }

    #[test]
    fn test_amend_keeps_prior_trigger_and_raises_confidence() {
        let p = patcher();
        let first = p
            .propose(Arc::new(laziness(Severity::NonCritical)), None)
            .unwrap();
        let amended = p
            .propose(Arc::new(laziness(Severity::NonCritical)), Some(&first.lesson))
            .unwrap();
        assert_eq!(amended.lesson.trigger_pattern, first.lesson.trigger_pattern);
        assert!(amended.lesson.confidence > first.lesson.confidence);
    }

    #[tokio::test]
    async fn test_hotfix_is_idempotent() {
        let p = patcher();
        let trace = Arc::new(laziness(Severity::Critical));
        let request = p.propose(trace.clone(), None).unwrap();

        let first = p.apply(request.clone()).await.unwrap();
        assert!(matches!(first, PatchOutcome::Applied { .. }));
        let second = p.apply(request).await.unwrap();
        assert_eq!(second, PatchOutcome::AlreadyApplied);
        assert_eq!(p.store().snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_merges_near_duplicates() {
        let p = patcher();
        let a = p.propose(Arc::new(laziness(Severity::NonCritical)), None).unwrap();
        let b = p.propose(Arc::new(laziness(Severity::NonCritical)), None).unwrap();

        assert_eq!(p.apply(a.clone()).await.unwrap(), PatchOutcome::Queued);
        assert_eq!(p.apply(a).await.unwrap(), PatchOutcome::AlreadyApplied);
        assert_eq!(p.apply(b).await.unwrap(), PatchOutcome::Queued);
        assert!(p.store().snapshot().is_empty());

        let report = p.run_batch().await.unwrap();
        assert_eq!(report.drained, 2);
        assert_eq!(report.merged, 1);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(p.store().snapshot().len(), 1);
        assert_eq!(p.pending_len().await, 0);
    }
}
