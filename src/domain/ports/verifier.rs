//! Verifier port - uniform interface to one external reasoning worker.

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::models::{Claim, ClaimVector, Verdict};

/// Ordinary verifier failures. These never escape [`VerifierAdapter::submit`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifierError {
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed verifier response: {0}")]
    Malformed(String),

    #[error("Verifier internal error: {0}")]
    Internal(String),
}

/// What a verifier observed for a claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub vector: ClaimVector,
    pub confidence: f64,
}

impl Observation {
    pub fn new(vector: ClaimVector, confidence: f64) -> Self {
        Self { vector, confidence }
    }
}

/// A single external verifier (usually a model).
///
/// Implementations only provide [`verify`](Self::verify); the provided
/// [`submit`](Self::submit) bounds it by the caller's deadline and turns
/// every failure into a typed verdict.
#[async_trait]
pub trait VerifierAdapter: Send + Sync {
    /// Stable name used in verdicts and logs.
    fn name(&self) -> &str;

    /// Ask the backing worker about the claim.
    ///
    /// Must be cancel-safe: the future is dropped when the deadline passes,
    /// and anything it holds is released with it.
    async fn verify(&self, claim: &Claim) -> Result<Observation, VerifierError>;

    /// Submit the claim, bounded by `deadline`. Never fails.
    async fn submit(&self, claim: &Claim, deadline: Instant) -> Verdict {
        let started = Instant::now();
        let fingerprint = claim.fingerprint();
        let outcome = tokio::time::timeout_at(deadline, self.verify(claim)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(observation)) => Verdict::ok(
                self.name(),
                fingerprint,
                observation.vector,
                observation.confidence,
                elapsed_ms,
            )
            .conform_to(&claim.vector),
            Ok(Err(err)) => {
                tracing::warn!(
                    verifier = self.name(),
                    fingerprint = %fingerprint,
                    error = %err,
                    "Verifier failed; recording zero-weight verdict"
                );
                Verdict::error(self.name(), fingerprint, err.to_string(), elapsed_ms)
            }
            Err(_) => {
                tracing::warn!(
                    verifier = self.name(),
                    fingerprint = %fingerprint,
                    elapsed_ms,
                    "Verifier missed its deadline"
                );
                Verdict::timeout(self.name(), fingerprint, elapsed_ms)
            }
        }
    }
}
