//! SQLite implementation of the AuditSink.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::AuditRecord;
use crate::domain::ports::AuditSink;

#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, record: &AuditRecord) -> DomainResult<()> {
        let payload = serde_json::to_string(record)?;

        sqlx::query(
            r#"INSERT INTO audit_records (seq, kind, entity_id, recorded_at, payload)
               VALUES (?, ?, ?, ?, ?)"#
        )
        .bind(record.seq as i64)
        .bind(record.event.kind().as_str())
        .bind(record.event.entity_id().map(|id| id.to_string()))
        .bind(record.recorded_at.to_rfc3339())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self) -> DomainResult<Vec<AuditRecord>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM audit_records ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(Into::into))
            .collect()
    }
}
