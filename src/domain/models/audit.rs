//! Completeness audit models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::claim::ContextMap;
use super::failure::{FailureTrace, ToolCall};

/// A task handed to an agent, as seen by the auditor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTask {
    pub id: Uuid,
    pub prompt: String,
    pub context: ContextMap,
    /// Laziness on a critical task is patched synchronously.
    pub critical: bool,
}

impl AuditTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            context: ContextMap::new(),
            critical: false,
        }
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<super::claim::ContextValue>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// An agent's answer to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Final answer text; `None` when the agent returned nothing.
    pub text: Option<String>,
    /// The agent's reasoning trace, if exposed.
    pub reasoning: Option<String>,
    pub tool_call: Option<ToolCall>,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_call = Some(tool_call);
        self
    }

    /// Text the auditor classifies: the answer, or nothing.
    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Result of the pure give-up classification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum GiveUpSignal {
    None,
    /// Empty or missing responses always count as giving up.
    Empty,
    Matched { pattern: String },
}

impl GiveUpSignal {
    pub fn is_triggered(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// What the elevated-capability verifier concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowVerdict {
    Found,
    NotFound,
}

/// Expanded re-attempt of a task sent to the shadow verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowRequest {
    pub task: AuditTask,
    pub original_response: String,
    /// Broader search instructions, e.g. check archival or rename history.
    pub search_hints: Vec<String>,
}

impl ShadowRequest {
    /// Render the request as a single prompt for a model-backed adapter.
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!(
            "Task: {}\nA previous attempt answered: {:?}\nSearch more broadly before concluding:",
            self.task.prompt, self.original_response
        );
        for hint in &self.search_hints {
            prompt.push_str("\n- ");
            prompt.push_str(hint);
        }
        prompt
    }
}

/// The shadow verifier's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowFinding {
    pub verdict: ShadowVerdict,
    /// Where the data was found, when it was.
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl ShadowFinding {
    pub fn found(location: impl Into<String>) -> Self {
        Self {
            verdict: ShadowVerdict::Found,
            location: Some(location.into()),
            notes: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            verdict: ShadowVerdict::NotFound,
            location: None,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Outcome of one audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// No give-up signal; nothing was escalated.
    NotTriggered,
    /// The shadow verifier also came up empty: the failure was genuine.
    GenuineFailure,
    /// The shadow verifier found what the agent gave up on.
    LazinessDetected,
    /// The shadow verifier was unavailable; no conclusion is drawn.
    Inconclusive,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotTriggered => "not_triggered",
            Self::GenuineFailure => "genuine_failure",
            Self::LazinessDetected => "laziness_detected",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Result of auditing one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub task_id: Uuid,
    pub triggered: bool,
    /// The elevated verifier found the data the agent reported missing.
    pub teacher_found_data: bool,
    pub outcome: AuditOutcome,
    pub signal: GiveUpSignal,
    pub evidence: Option<ShadowFinding>,
    /// Emitted only when laziness was detected.
    pub failure_trace: Option<FailureTrace>,
}

/// Proof that an audit may escalate to shadow verification.
///
/// Issued once per triggered audit and consumed by value, so a second
/// shadow call for the same audited response cannot be expressed.
#[derive(Debug)]
pub struct AuditTicket {
    task_id: Uuid,
}

impl AuditTicket {
    pub(crate) fn issue(task_id: Uuid) -> Self {
        Self { task_id }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}
