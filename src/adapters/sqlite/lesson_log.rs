//! SQLite implementation of the LessonLog.
//!
//! Events go to `lesson_events`; the `active_lessons` table is kept in step
//! inside the same transaction and can be rebuilt from the log at any time.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Lesson, LessonType, TriggerPattern};
use crate::domain::ports::{LessonEvent, LessonLog};

#[derive(Clone)]
pub struct SqliteLessonLog {
    pool: SqlitePool,
}

impl SqliteLessonLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The materialized active set, highest confidence first.
    pub async fn active_lessons(&self) -> DomainResult<Vec<Lesson>> {
        let rows: Vec<LessonRow> = sqlx::query_as(
            r#"SELECT id, trigger_pattern, rule_text, lesson_type, confidence, source_trace_id, created_at
               FROM active_lessons ORDER BY confidence DESC, created_at ASC"#
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lesson::try_from).collect()
    }

    /// Recreate the active set by replaying the log.
    pub async fn rebuild_active_set(&self) -> DomainResult<usize> {
        let events = self.replay().await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM active_lessons").execute(&mut *tx).await?;
        for event in &events {
            materialize(&mut tx, event).await?;
        }
        let (active,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM active_lessons")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(events = events.len(), active, "Active lesson set rebuilt");
        Ok(active as usize)
    }
}

#[async_trait]
impl LessonLog for SqliteLessonLog {
    async fn append_all(&self, events: &[LessonEvent]) -> DomainResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let payloads = events
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let recorded_at = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for (event, payload) in events.iter().zip(&payloads) {
            let event_type = match event {
                LessonEvent::Added { .. } => "added",
                LessonEvent::Retired { .. } => "retired",
            };
            sqlx::query(
                r#"INSERT INTO lesson_events (event_type, lesson_id, payload, recorded_at)
                   VALUES (?, ?, ?, ?)"#
            )
            .bind(event_type)
            .bind(event.lesson_id().to_string())
            .bind(payload)
            .bind(&recorded_at)
            .execute(&mut *tx)
            .await?;
            materialize(&mut tx, event).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn replay(&self) -> DomainResult<Vec<LessonEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM lesson_events ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(Into::into))
            .collect()
    }
}

async fn materialize(tx: &mut Transaction<'_, Sqlite>, event: &LessonEvent) -> DomainResult<()> {
    match event {
        LessonEvent::Added { lesson } => {
            sqlx::query(
                r#"INSERT OR REPLACE INTO active_lessons
                   (id, trigger_pattern, rule_text, lesson_type, confidence, source_trace_id, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#
            )
            .bind(lesson.id.to_string())
            .bind(lesson.trigger_pattern.to_string())
            .bind(&lesson.rule_text)
            .bind(lesson.lesson_type.as_str())
            .bind(lesson.confidence)
            .bind(lesson.source_trace_id.to_string())
            .bind(lesson.created_at.to_rfc3339())
            .execute(&mut **tx)
            .await?;
        }
        LessonEvent::Retired { lesson_id, .. } => {
            sqlx::query("DELETE FROM active_lessons WHERE id = ?")
                .bind(lesson_id.to_string())
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct LessonRow {
    id: String,
    trigger_pattern: String,
    rule_text: String,
    lesson_type: String,
    confidence: f64,
    source_trace_id: String,
    created_at: String,
}

impl TryFrom<LessonRow> for Lesson {
    type Error = DomainError;

    fn try_from(row: LessonRow) -> Result<Self, Self::Error> {
        let lesson_type = LessonType::from_str(&row.lesson_type).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown lesson type: {}", row.lesson_type))
        })?;

        Ok(Lesson {
            id: parse_uuid(&row.id)?,
            trigger_pattern: TriggerPattern::parse(&row.trigger_pattern)?,
            rule_text: row.rule_text,
            lesson_type,
            confidence: row.confidence,
            source_trace_id: parse_uuid(&row.source_trace_id)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
