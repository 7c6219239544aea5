//! Lesson log port - the append-only history the active set is rebuilt from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Lesson;

/// Why a lesson left the active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RetireReason {
    /// A higher-confidence lesson with the same key replaced it.
    Superseded { by: Uuid },
    /// Purged by the decay policy on a capability upgrade.
    Decayed { to_model: String },
}

/// One entry of the lesson log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LessonEvent {
    Added {
        lesson: Lesson,
    },
    Retired {
        lesson_id: Uuid,
        reason: RetireReason,
        at: DateTime<Utc>,
    },
}

impl LessonEvent {
    pub fn lesson_id(&self) -> Uuid {
        match self {
            Self::Added { lesson } => lesson.id,
            Self::Retired { lesson_id, .. } => *lesson_id,
        }
    }
}

/// Append-only lesson history.
#[async_trait]
pub trait LessonLog: Send + Sync {
    /// Append events as one unit: either every event is stored or none is.
    async fn append_all(&self, events: &[LessonEvent]) -> DomainResult<()>;

    async fn append(&self, event: &LessonEvent) -> DomainResult<()> {
        self.append_all(std::slice::from_ref(event)).await
    }

    /// Every event in append order.
    async fn replay(&self) -> DomainResult<Vec<LessonEvent>>;
}
