//! Scripted verifier adapters.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::models::{Claim, ClaimVector, ShadowFinding, ShadowRequest};
use crate::domain::ports::{Observation, ShadowAdapter, VerifierAdapter, VerifierError};

/// What a [`ScriptedVerifier`] answers.
#[derive(Debug, Clone)]
pub enum VerifierScript {
    /// Echo the claim's own vector back.
    Agree,
    /// Always observe this vector.
    Observe(ClaimVector),
    /// Always fail with this error.
    Fail(VerifierError),
}

/// Verifier with a fixed answer, optional latency and a call counter.
pub struct ScriptedVerifier {
    name: String,
    script: VerifierScript,
    confidence: f64,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new(name: impl Into<String>, script: VerifierScript, confidence: f64) -> Self {
        Self {
            name: name.into(),
            script,
            confidence,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn agreeing(name: impl Into<String>, confidence: f64) -> Self {
        Self::new(name, VerifierScript::Agree, confidence)
    }

    pub fn observing(name: impl Into<String>, vector: ClaimVector, confidence: f64) -> Self {
        Self::new(name, VerifierScript::Observe(vector), confidence)
    }

    pub fn failing(name: impl Into<String>, error: VerifierError) -> Self {
        Self::new(name, VerifierScript::Fail(error), 0.0)
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `verify` has been entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerifierAdapter for ScriptedVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(&self, claim: &Claim) -> Result<Observation, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            VerifierScript::Agree => Ok(Observation::new(claim.vector.clone(), self.confidence)),
            VerifierScript::Observe(vector) => Ok(Observation::new(vector.clone(), self.confidence)),
            VerifierScript::Fail(error) => Err(error.clone()),
        }
    }
}

/// What a [`ScriptedShadow`] answers.
#[derive(Debug, Clone)]
pub enum ShadowScript {
    Found(String),
    NotFound,
    Fail(VerifierError),
}

/// Shadow verifier with a fixed answer and a call counter.
pub struct ScriptedShadow {
    script: ShadowScript,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedShadow {
    pub fn new(script: ShadowScript) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn finding(location: impl Into<String>) -> Self {
        Self::new(ShadowScript::Found(location.into()))
    }

    pub fn finding_nothing() -> Self {
        Self::new(ShadowScript::NotFound)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShadowAdapter for ScriptedShadow {
    fn name(&self) -> &str {
        "scripted-shadow"
    }

    async fn investigate(&self, _request: &ShadowRequest) -> Result<ShadowFinding, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            ShadowScript::Found(location) => Ok(ShadowFinding::found(location.clone())),
            ShadowScript::NotFound => Ok(ShadowFinding::not_found()),
            ShadowScript::Fail(error) => Err(error.clone()),
        }
    }
}
