//! Shadow verifier port - the single elevated-capability worker.

use async_trait::async_trait;

use super::verifier::VerifierError;
use crate::domain::models::{ShadowFinding, ShadowRequest};

/// An elevated-capability verifier invoked only when an audit triggers.
#[async_trait]
pub trait ShadowAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Re-attempt the task with broader search instructions.
    async fn investigate(&self, request: &ShadowRequest) -> Result<ShadowFinding, VerifierError>;
}
