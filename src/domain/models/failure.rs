//! Failure trace model: evidence of an agent misbehaviour.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::lesson::tokenize;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent gave up before exhausting reasonable alternatives.
    OmissionLaziness,
    /// The agent did something unsafe.
    CommissionSafety,
    /// The agent asserted something the evidence does not support.
    Hallucination,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OmissionLaziness => "omission_laziness",
            Self::CommissionSafety => "commission_safety",
            Self::Hallucination => "hallucination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    NonCritical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::NonCritical => "non_critical",
        }
    }
}

/// A tool invocation made by the agent, with its output if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: String,
    pub output: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Which component produced a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "component", rename_all = "snake_case")]
pub enum TraceSource {
    Consensus { decision_id: Uuid },
    Audit { task_id: Uuid },
}

/// Evidence of an agent misbehaviour. Read-only once created; downstream
/// patch requests share it rather than copy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTrace {
    pub trace_id: Uuid,
    pub prompt: String,
    pub reasoning_trace: String,
    pub tool_call: Option<ToolCall>,
    pub failure_kind: FailureKind,
    pub severity: Severity,
    /// Supporting evidence, e.g. where the shadow verifier found the data.
    pub evidence: Option<String>,
    pub source: TraceSource,
    pub created_at: DateTime<Utc>,
}

impl FailureTrace {
    pub fn new(
        prompt: impl Into<String>,
        reasoning_trace: impl Into<String>,
        failure_kind: FailureKind,
        severity: Severity,
        source: TraceSource,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            prompt: prompt.into(),
            reasoning_trace: reasoning_trace.into(),
            tool_call: None,
            failure_kind,
            severity,
            evidence: None,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_call = Some(tool_call);
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Every token that appears anywhere in the trace.
    ///
    /// A lesson trigger is derivable from this trace only if all of its
    /// terms are members of this set.
    pub fn evidence_tokens(&self) -> BTreeSet<String> {
        let mut tokens = tokenize(&self.prompt);
        tokens.extend(tokenize(&self.reasoning_trace));
        if let Some(call) = &self.tool_call {
            tokens.extend(tokenize(&call.name));
            tokens.extend(tokenize(&call.input));
            if let Some(output) = &call.output {
                tokens.extend(tokenize(output));
            }
        }
        if let Some(evidence) = &self.evidence {
            tokens.extend(tokenize(evidence));
        }
        tokens
    }
}
