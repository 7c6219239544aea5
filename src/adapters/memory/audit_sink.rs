use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::AuditRecord;
use crate::domain::ports::AuditSink;

/// Audit sink that keeps every record in memory.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> DomainResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn load(&self) -> DomainResult<Vec<AuditRecord>> {
        Ok(self.records.read().await.clone())
    }
}
