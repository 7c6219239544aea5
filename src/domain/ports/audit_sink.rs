//! Audit sink port - durable, append-only storage for audit records.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::AuditRecord;

/// Durable destination for the audit trail.
///
/// Records are appended in sequence order and never rewritten.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    async fn append(&self, record: &AuditRecord) -> DomainResult<()>;

    /// Load every record in sequence order.
    async fn load(&self) -> DomainResult<Vec<AuditRecord>>;
}
