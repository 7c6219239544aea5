//! Consensus decision model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::claim::ClaimFingerprint;
use super::verdict::Verdict;

/// Final decision for one claim evaluation.
///
/// `Flag` and `Inconclusive` both leave escalation to the caller; the
/// kernel never turns either into a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Pass,
    Flag,
    Fail,
    Inconclusive,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Flag => "FLAG",
            Self::Fail => "FAIL",
            Self::Inconclusive => "INCONCLUSIVE",
        }
    }

    /// Flag or Fail: the claim needs a failure trace.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Flag | Self::Fail)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reduction of a set of verdicts for one claim. Immutable; this is the
/// unit written to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub fingerprint: ClaimFingerprint,
    /// Distance between the claim and the aggregate observation.
    /// Absent when no ok verdict was available.
    pub drift: Option<f64>,
    pub decision: Decision,
    pub threshold: f64,
    /// Every verdict collected before the deadline, in arrival order.
    pub verdicts: Vec<Verdict>,
    /// Ok verdicts that took part in the reduction.
    pub contributing: Vec<Uuid>,
    /// Ok verdicts whose own drift exceeded the threshold.
    pub refuting: Vec<Uuid>,
    /// Results that raced the deadline and were discarded.
    pub late_verdicts: usize,
    pub decided_at: DateTime<Utc>,
}

impl ConsensusDecision {
    pub fn ok_count(&self) -> usize {
        self.contributing.len()
    }
}
