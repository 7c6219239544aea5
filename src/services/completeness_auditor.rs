//! Completeness auditor.
//!
//! Classifies agent responses against configured give-up signatures with
//! plain pattern matching, and escalates only the suspicious ones to the
//! shadow verifier. Selectivity matters: every escalation costs one
//! elevated-capability call, so the trigger rate is tracked and a warning
//! is logged when it exceeds the configured ceiling.

use regex::{Regex, RegexBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    context_text, AgentResponse, AuditEvent, AuditOutcome, AuditResult, AuditTask, AuditTicket,
    AuditorConfig, FailureKind, FailureTrace, GiveUpSignal, Severity, TraceSource,
};
use crate::domain::ports::ShadowAdapter;
use crate::services::audit_trail::AuditTrail;
use crate::services::shadow_verification::{ShadowOutcome, ShadowVerifier};

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](?:\s+|$)|\n").expect("valid sentence pattern"));

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*\u{2022}]|\d+[.)])\s+\S").expect("valid list pattern"));

static ITEM_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",|;|\band\b|\bor\b").expect("valid separator pattern"));

/// Running audit counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditorStats {
    pub audited: u64,
    pub triggered: u64,
    pub trigger_rate: f64,
}

pub struct CompletenessAuditor {
    signatures: Vec<Regex>,
    indicators: Vec<Regex>,
    min_alternatives: usize,
    max_trigger_rate: f64,
    warmup_responses: u64,
    shadow: ShadowVerifier,
    audit: Arc<AuditTrail>,
    audited: AtomicU64,
    triggered: AtomicU64,
}

impl CompletenessAuditor {
    pub fn new(
        config: &AuditorConfig,
        shadow: Arc<dyn ShadowAdapter>,
        audit: Arc<AuditTrail>,
    ) -> DomainResult<Self> {
        if config.give_up_signatures.is_empty() {
            return Err(DomainError::configuration(
                "completeness auditor needs at least one give-up signature",
            ));
        }

        Ok(Self {
            signatures: compile("give-up signature", &config.give_up_signatures)?,
            indicators: compile("exhaustive indicator", &config.exhaustive_indicators)?,
            min_alternatives: config.min_alternatives,
            max_trigger_rate: config.max_trigger_rate,
            warmup_responses: config.warmup_responses,
            shadow: ShadowVerifier::new(shadow, config),
            audit,
            audited: AtomicU64::new(0),
            triggered: AtomicU64::new(0),
        })
    }

    /// Classify a response. Pure: no model call, no side effects.
    pub fn classify(&self, response: &AgentResponse) -> GiveUpSignal {
        let body = response.body().trim();
        if body.is_empty() {
            return GiveUpSignal::Empty;
        }

        let Some(signature) = self.signatures.iter().find(|re| re.is_match(body)) else {
            return GiveUpSignal::None;
        };

        if self.shows_exhaustive_search(body) {
            return GiveUpSignal::None;
        }

        GiveUpSignal::Matched {
            pattern: signature.as_str().to_string(),
        }
    }

    /// An exhaustive-search indicator plus enough listed alternatives.
    fn shows_exhaustive_search(&self, body: &str) -> bool {
        let listed = body.lines().filter(|l| LIST_ITEM.is_match(l)).count();

        let mut best_inline = 0;
        let mut indicated = false;
        for sentence in SENTENCE_BREAK.split(body) {
            for indicator in &self.indicators {
                if let Some(m) = indicator.find(sentence) {
                    indicated = true;
                    let items = ITEM_SEPARATOR
                        .split(&sentence[m.end()..])
                        .filter(|item| item.chars().any(char::is_alphanumeric))
                        .count();
                    best_inline = best_inline.max(items);
                }
            }
        }

        indicated && listed.max(best_inline) >= self.min_alternatives
    }

    /// Audit one response, escalating to the shadow verifier on a give-up
    /// signal.
    pub async fn audit(
        &self,
        task: &AuditTask,
        response: &AgentResponse,
    ) -> DomainResult<AuditResult> {
        let audited = self.audited.fetch_add(1, Ordering::Relaxed) + 1;
        let signal = self.classify(response);

        if !signal.is_triggered() {
            let result = AuditResult {
                task_id: task.id,
                triggered: false,
                teacher_found_data: false,
                outcome: AuditOutcome::NotTriggered,
                signal,
                evidence: None,
                failure_trace: None,
            };
            self.record_completion(&result).await?;
            return Ok(result);
        }

        let triggered = self.triggered.fetch_add(1, Ordering::Relaxed) + 1;
        let rate = triggered as f64 / audited as f64;
        if audited >= self.warmup_responses && rate > self.max_trigger_rate {
            tracing::warn!(
                audited,
                triggered,
                rate,
                ceiling = self.max_trigger_rate,
                "Audit trigger rate above ceiling; give-up signatures may be too broad"
            );
        }

        tracing::info!(task_id = %task.id, signal = ?signal, "Give-up signal detected");

        let ticket = AuditTicket::issue(task.id);
        let (outcome, evidence, failure_trace) =
            match self.shadow.verify(ticket, task, response).await {
                ShadowOutcome::Found(finding) => {
                    let trace = laziness_trace(task, response, finding.location.as_deref());
                    self.audit
                        .record(AuditEvent::FailureTrace(trace.clone()))
                        .await?;
                    (AuditOutcome::LazinessDetected, Some(finding), Some(trace))
                }
                ShadowOutcome::NotFound(finding) => {
                    (AuditOutcome::GenuineFailure, Some(finding), None)
                }
                ShadowOutcome::Unavailable { reason } => {
                    tracing::info!(task_id = %task.id, %reason, "Audit inconclusive");
                    (AuditOutcome::Inconclusive, None, None)
                }
            };

        let result = AuditResult {
            task_id: task.id,
            triggered: true,
            teacher_found_data: outcome == AuditOutcome::LazinessDetected,
            outcome,
            signal,
            evidence,
            failure_trace,
        };
        self.record_completion(&result).await?;
        Ok(result)
    }

    async fn record_completion(&self, result: &AuditResult) -> DomainResult<()> {
        self.audit
            .record(AuditEvent::AuditCompleted {
                task_id: result.task_id,
                outcome: result.outcome,
            })
            .await?;
        Ok(())
    }

    pub fn stats(&self) -> AuditorStats {
        let audited = self.audited.load(Ordering::Relaxed);
        let triggered = self.triggered.load(Ordering::Relaxed);
        AuditorStats {
            audited,
            triggered,
            trigger_rate: if audited == 0 {
                0.0
            } else {
                triggered as f64 / audited as f64
            },
        }
    }
}

fn compile(what: &str, patterns: &[String]) -> DomainResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| DomainError::configuration(format!("invalid {what} '{p}': {e}")))
        })
        .collect()
}

fn laziness_trace(task: &AuditTask, response: &AgentResponse, location: Option<&str>) -> FailureTrace {
    let context = context_text(&task.context);
    let prompt = if context.is_empty() {
        task.prompt.clone()
    } else {
        format!("{}\n{}", task.prompt, context)
    };

    let reasoning = match &response.reasoning {
        Some(reasoning) => format!("{reasoning}\nResponse: {}", response.body()),
        None => format!("Response: {}", response.body()),
    };

    let severity = if task.critical {
        Severity::Critical
    } else {
        Severity::NonCritical
    };

    let mut trace = FailureTrace::new(
        prompt,
        reasoning,
        FailureKind::OmissionLaziness,
        severity,
        TraceSource::Audit { task_id: task.id },
    );
    if let Some(call) = &response.tool_call {
        trace = trace.with_tool_call(call.clone());
    }
    if let Some(location) = location {
        trace = trace.with_evidence(location);
    }
    trace
}
