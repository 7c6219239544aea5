//! Verdict domain model: one verifier's typed output for a claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::claim::{ClaimFingerprint, ClaimVector};

/// Outcome status of a single verifier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Ok,
    Timeout,
    Error,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Result payload carried by a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "vector", rename_all = "snake_case")]
pub enum VerdictPayload {
    /// What the verifier observed, in the claim's own representation.
    Observation(ClaimVector),
    Empty,
}

/// One verifier's output for a claim. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub id: Uuid,
    pub verifier: String,
    pub fingerprint: ClaimFingerprint,
    pub payload: VerdictPayload,
    /// Confidence in `[0, 1]`; always 0 for non-ok verdicts.
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub status: VerdictStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Verdict {
    fn base(verifier: impl Into<String>, fingerprint: ClaimFingerprint, elapsed_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            verifier: verifier.into(),
            fingerprint,
            payload: VerdictPayload::Empty,
            confidence: 0.0,
            elapsed_ms,
            status: VerdictStatus::Error,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn ok(
        verifier: impl Into<String>,
        fingerprint: ClaimFingerprint,
        observation: ClaimVector,
        confidence: f64,
        elapsed_ms: u64,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            payload: VerdictPayload::Observation(observation),
            confidence,
            status: VerdictStatus::Ok,
            ..Self::base(verifier, fingerprint, elapsed_ms)
        }
    }

    pub fn timeout(verifier: impl Into<String>, fingerprint: ClaimFingerprint, elapsed_ms: u64) -> Self {
        Self {
            status: VerdictStatus::Timeout,
            error: Some("deadline elapsed".to_string()),
            ..Self::base(verifier, fingerprint, elapsed_ms)
        }
    }

    pub fn error(
        verifier: impl Into<String>,
        fingerprint: ClaimFingerprint,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            status: VerdictStatus::Error,
            error: Some(message.into()),
            ..Self::base(verifier, fingerprint, elapsed_ms)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == VerdictStatus::Ok
    }

    /// The observation, for ok verdicts only.
    pub fn observation(&self) -> Option<&ClaimVector> {
        match (&self.status, &self.payload) {
            (VerdictStatus::Ok, VerdictPayload::Observation(v)) => Some(v),
            _ => None,
        }
    }

    /// Downgrade an ok verdict whose observation cannot be compared with
    /// the claim (wrong kind, wrong dimension, or out of range).
    pub fn conform_to(self, claim_vector: &ClaimVector) -> Self {
        if !self.is_ok() {
            return self;
        }

        let problem = match &self.payload {
            VerdictPayload::Empty => Some("ok verdict carried no observation".to_string()),
            VerdictPayload::Observation(observed) if !observed.is_compatible(claim_vector) => {
                Some(format!(
                    "observation shape {}[{}] does not match claim {}[{}]",
                    observed.kind().as_str(),
                    observed.dimension(),
                    claim_vector.kind().as_str(),
                    claim_vector.dimension()
                ))
            }
            VerdictPayload::Observation(observed) => {
                observed.validate().err().map(|e| e.to_string())
            }
        };

        match problem {
            Some(message) => Self::error(self.verifier, self.fingerprint, message, self.elapsed_ms),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> ClaimFingerprint {
        ClaimFingerprint::compute("s", &ClaimVector::Numeric(vec![0.5]))
    }

    #[test]
    fn test_non_ok_verdicts_have_zero_confidence() {
        let t = Verdict::timeout("slow", fp(), 500);
        let e = Verdict::error("broken", fp(), "boom", 3);
        assert_eq!(t.confidence, 0.0);
        assert_eq!(e.confidence, 0.0);
        assert!(t.observation().is_none());
        assert_eq!(e.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_ok_confidence_is_clamped() {
        let v = Verdict::ok("m", fp(), ClaimVector::Numeric(vec![0.4]), 1.7, 10);
        assert_eq!(v.confidence, 1.0);
        let v = Verdict::ok("m", fp(), ClaimVector::Numeric(vec![0.4]), f64::NAN, 10);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn test_conform_downgrades_mismatched_shape() {
        let claim = ClaimVector::Numeric(vec![0.5, 0.5]);
        let v = Verdict::ok("m", fp(), ClaimVector::Numeric(vec![0.4]), 0.9, 10).conform_to(&claim);
        assert_eq!(v.status, VerdictStatus::Error);
        assert!(v.error.unwrap().contains("does not match"));
    }

    #[test]
    fn test_conform_downgrades_out_of_range_observation() {
        let claim = ClaimVector::Numeric(vec![0.5]);
        let v = Verdict::ok("m", fp(), ClaimVector::Numeric(vec![4.0]), 0.9, 10).conform_to(&claim);
        assert_eq!(v.status, VerdictStatus::Error);
    }

    #[test]
    fn test_conform_keeps_valid_observation() {
        let claim = ClaimVector::Numeric(vec![0.5]);
        let v = Verdict::ok("m", fp(), ClaimVector::Numeric(vec![0.4]), 0.9, 10).conform_to(&claim);
        assert!(v.is_ok());
    }
}
