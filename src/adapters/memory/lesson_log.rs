use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{LessonEvent, LessonLog};

/// Lesson log that keeps every event in memory.
#[derive(Default)]
pub struct InMemoryLessonLog {
    events: RwLock<Vec<LessonEvent>>,
}

impl InMemoryLessonLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl LessonLog for InMemoryLessonLog {
    async fn append_all(&self, events: &[LessonEvent]) -> DomainResult<()> {
        self.events.write().await.extend_from_slice(events);
        Ok(())
    }

    async fn replay(&self) -> DomainResult<Vec<LessonEvent>> {
        Ok(self.events.read().await.clone())
    }
}
