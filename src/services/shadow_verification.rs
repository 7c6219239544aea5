//! Shadow verification.
//!
//! A single elevated-capability re-attempt of an audited task, used to
//! confirm or refute the auditor's suspicion that the agent gave up early.
//! Each call consumes the [`AuditTicket`] issued for the audit, so one
//! audit can reach the shadow verifier at most once.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{
    AgentResponse, AuditTask, AuditTicket, AuditorConfig, ShadowFinding, ShadowRequest,
    ShadowVerdict,
};
use crate::domain::ports::ShadowAdapter;

/// What the shadow verifier concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowOutcome {
    /// The data exists; the finding carries its location.
    Found(ShadowFinding),
    /// The shadow verifier could not find it either.
    NotFound(ShadowFinding),
    /// Timed out or failed; nothing can be concluded.
    Unavailable { reason: String },
}

/// Bounded, single-shot access to the shadow adapter.
pub struct ShadowVerifier {
    adapter: Arc<dyn ShadowAdapter>,
    timeout: Duration,
    search_hints: Vec<String>,
}

impl ShadowVerifier {
    pub fn new(adapter: Arc<dyn ShadowAdapter>, config: &AuditorConfig) -> Self {
        Self {
            adapter,
            timeout: config.shadow_timeout(),
            search_hints: config.search_hints.clone(),
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Re-attempt `task` with an expanded search context.
    pub async fn verify(
        &self,
        ticket: AuditTicket,
        task: &AuditTask,
        response: &AgentResponse,
    ) -> ShadowOutcome {
        if ticket.task_id() != task.id {
            tracing::warn!(
                ticket_task = %ticket.task_id(),
                task_id = %task.id,
                "Audit ticket does not belong to this task"
            );
            return ShadowOutcome::Unavailable {
                reason: "audit ticket issued for another task".to_string(),
            };
        }

        let request = ShadowRequest {
            task: task.clone(),
            original_response: response.body().to_string(),
            search_hints: self.search_hints.clone(),
        };

        tracing::debug!(
            task_id = %task.id,
            shadow = self.adapter.name(),
            "Invoking shadow verifier"
        );

        match tokio::time::timeout(self.timeout, self.adapter.investigate(&request)).await {
            Ok(Ok(finding)) => match finding.verdict {
                ShadowVerdict::Found => ShadowOutcome::Found(finding),
                ShadowVerdict::NotFound => ShadowOutcome::NotFound(finding),
            },
            Ok(Err(e)) => {
                tracing::warn!(
                    task_id = %task.id,
                    shadow = self.adapter.name(),
                    error = %e,
                    "Shadow verifier failed"
                );
                ShadowOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %task.id,
                    shadow = self.adapter.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Shadow verifier timed out"
                );
                ShadowOutcome::Unavailable {
                    reason: "shadow verifier timed out".to_string(),
                }
            }
        }
    }
}
