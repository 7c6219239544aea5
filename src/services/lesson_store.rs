//! Lesson store.
//!
//! The active lesson set is published as an immutable, versioned
//! [`LessonSnapshot`]. Readers clone an `Arc` under a read lock that is
//! held only for the pointer copy; writers serialise on a separate async
//! mutex, build the next snapshot off to the side and swap it in. A task
//! framed from a snapshot keeps seeing exactly that snapshot, whatever
//! patches or purges happen meanwhile.
//!
//! Every mutation is written to the optional [`LessonLog`] as one unit
//! before it is published, so [`LessonStore::open`] can rebuild the active
//! set by replay and a failed write leaves both sides unchanged.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    tokenize, AuditEvent, CapabilityUpgrade, DecayTrigger, Lesson, LessonKey, LessonType,
};
use crate::domain::ports::{LessonEvent, LessonLog, RetireReason};
use crate::services::audit_trail::AuditTrail;

/// Immutable view of the active lessons at one version.
#[derive(Debug, Default)]
pub struct LessonSnapshot {
    version: u64,
    lessons: Vec<Arc<Lesson>>,
    by_key: HashMap<LessonKey, usize>,
    // trigger term -> positions in `lessons`
    term_index: HashMap<String, Vec<usize>>,
}

impl LessonSnapshot {
    fn build(version: u64, lessons: Vec<Arc<Lesson>>) -> Self {
        let mut by_key = HashMap::with_capacity(lessons.len());
        let mut term_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, lesson) in lessons.iter().enumerate() {
            by_key.insert(lesson.key(), pos);
            for term in lesson.trigger_pattern.terms() {
                term_index.entry(term.clone()).or_default().push(pos);
            }
        }
        Self {
            version,
            lessons,
            by_key,
            term_index,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.lessons.iter().map(|l| &**l)
    }

    pub fn get(&self, key: &LessonKey) -> Option<&Lesson> {
        self.by_key.get(key).map(|&pos| &*self.lessons[pos])
    }

    pub fn contains(&self, lesson_id: Uuid) -> bool {
        self.lessons.iter().any(|l| l.id == lesson_id)
    }

    pub fn count_by_type(&self, lesson_type: LessonType) -> usize {
        self.lessons
            .iter()
            .filter(|l| l.lesson_type == lesson_type)
            .count()
    }

    /// Lessons whose trigger matches the tokens, highest confidence first.
    pub fn matching_tokens(&self, tokens: &BTreeSet<String>) -> Vec<&Lesson> {
        let candidates: BTreeSet<usize> = tokens
            .iter()
            .filter_map(|t| self.term_index.get(t))
            .flatten()
            .copied()
            .collect();

        let mut matched: Vec<&Lesson> = candidates
            .into_iter()
            .map(|pos| &*self.lessons[pos])
            .filter(|l| l.trigger_pattern.matches_tokens(tokens))
            .collect();
        matched.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        matched
    }

    /// Lessons whose trigger matches the task context.
    pub fn matching(&self, context: &str) -> Vec<&Lesson> {
        self.matching_tokens(&tokenize(context))
    }
}

/// One rule injected into a task's framing.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedRule {
    pub lesson_id: Uuid,
    pub lesson_type: LessonType,
    pub rule_text: String,
}

/// The lessons that apply to one task, pinned to the snapshot they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFraming {
    pub snapshot_version: u64,
    pub rules: Vec<FramedRule>,
}

impl TaskFraming {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Render the rules as a preamble for the agent prompt.
    pub fn render(&self) -> String {
        self.rules
            .iter()
            .map(|r| format!("- [{}] {}", r.lesson_type.as_str(), r.rule_text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of offering a lesson to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New key; the lesson is active.
    Inserted,
    /// A lesson from the same failure trace was already applied.
    AlreadyApplied,
    /// Same key and same rule text as the active lesson.
    Duplicate { existing: Uuid },
    /// Same key, different rule; the new lesson won on confidence.
    Superseded { retired: Uuid },
    /// Same key, different rule; the active lesson was kept.
    Rejected { kept: Uuid },
}

/// Result of applying the decay policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Whether the decay trigger fired for this upgrade.
    pub fired: bool,
    pub retired: Vec<Uuid>,
    pub version: u64,
}

struct WriterState {
    applied_traces: HashSet<Uuid>,
}

/// Holds the active lessons.
pub struct LessonStore {
    current: RwLock<Arc<LessonSnapshot>>,
    writer: Mutex<WriterState>,
    log: Option<Arc<dyn LessonLog>>,
    audit: Option<Arc<AuditTrail>>,
    decay: DecayTrigger,
}

impl LessonStore {
    /// Empty, non-durable store.
    pub fn new(decay: DecayTrigger) -> Self {
        Self {
            current: RwLock::new(Arc::new(LessonSnapshot::default())),
            writer: Mutex::new(WriterState {
                applied_traces: HashSet::new(),
            }),
            log: None,
            audit: None,
            decay,
        }
    }

    /// Rebuild the active set by replaying `log`; later mutations are
    /// appended to it.
    pub async fn open(log: Arc<dyn LessonLog>, decay: DecayTrigger) -> DomainResult<Self> {
        let events = log.replay().await?;

        let mut active: Vec<Arc<Lesson>> = Vec::new();
        let mut applied_traces = HashSet::new();
        for event in &events {
            match event {
                LessonEvent::Added { lesson } => {
                    applied_traces.insert(lesson.source_trace_id);
                    active.push(Arc::new(lesson.clone()));
                }
                LessonEvent::Retired { lesson_id, .. } => {
                    active.retain(|l| l.id != *lesson_id);
                }
            }
        }

        tracing::info!(
            events = events.len(),
            active = active.len(),
            "Lesson store rebuilt from log"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(LessonSnapshot::build(events.len() as u64, active))),
            writer: Mutex::new(WriterState { applied_traces }),
            log: Some(log),
            audit: None,
            decay,
        })
    }

    /// Record conflicts and purges to this trail.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn decay_trigger(&self) -> DecayTrigger {
        self.decay
    }

    /// The current active set.
    pub fn snapshot(&self) -> Arc<LessonSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lessons matching the context, from the current snapshot.
    pub fn matching(&self, context: &str) -> Vec<Lesson> {
        self.snapshot()
            .matching(context)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The rules to inject for a task with this context.
    pub fn framing(&self, context: &str) -> TaskFraming {
        let snapshot = self.snapshot();
        let rules = snapshot
            .matching(context)
            .into_iter()
            .map(|l| FramedRule {
                lesson_id: l.id,
                lesson_type: l.lesson_type,
                rule_text: l.rule_text.clone(),
            })
            .collect();
        TaskFraming {
            snapshot_version: snapshot.version(),
            rules,
        }
    }

    /// Whether a lesson derived from this trace has been applied.
    pub async fn is_applied(&self, trace_id: Uuid) -> bool {
        self.writer.lock().await.applied_traces.contains(&trace_id)
    }

    /// Offer a lesson to the store, deduplicating on trigger and type.
    pub async fn insert(&self, lesson: Lesson) -> DomainResult<InsertOutcome> {
        let mut writer = self.writer.lock().await;

        if writer.applied_traces.contains(&lesson.source_trace_id) {
            tracing::debug!(
                trace_id = %lesson.source_trace_id,
                "Lesson from this trace already applied"
            );
            return Ok(InsertOutcome::AlreadyApplied);
        }

        let current = self.snapshot();
        let key = lesson.key();

        let outcome = match current.get(&key) {
            None => {
                self.commit(&[LessonEvent::Added {
                    lesson: lesson.clone(),
                }])
                .await?;
                let mut lessons = current.lessons.clone();
                lessons.push(Arc::new(lesson.clone()));
                self.publish(&current, lessons);
                InsertOutcome::Inserted
            }
            Some(existing) if existing.rule_text == lesson.rule_text => {
                InsertOutcome::Duplicate {
                    existing: existing.id,
                }
            }
            Some(existing) => {
                let existing = existing.clone();
                self.resolve_conflict(&current, existing, &lesson).await?
            }
        };

        writer.applied_traces.insert(lesson.source_trace_id);

        tracing::info!(
            lesson_id = %lesson.id,
            trigger = %lesson.trigger_pattern,
            lesson_type = lesson.lesson_type.as_str(),
            outcome = ?outcome,
            "Lesson offered to store"
        );

        Ok(outcome)
    }

    async fn resolve_conflict(
        &self,
        current: &Arc<LessonSnapshot>,
        existing: Lesson,
        candidate: &Lesson,
    ) -> DomainResult<InsertOutcome> {
        // Ties keep the incumbent.
        let (kept, discarded, outcome) = if candidate.confidence > existing.confidence {
            self.commit(&[
                LessonEvent::Retired {
                    lesson_id: existing.id,
                    reason: RetireReason::Superseded { by: candidate.id },
                    at: Utc::now(),
                },
                LessonEvent::Added {
                    lesson: candidate.clone(),
                },
            ])
            .await?;

            let mut lessons: Vec<Arc<Lesson>> = current
                .lessons
                .iter()
                .filter(|l| l.id != existing.id)
                .cloned()
                .collect();
            lessons.push(Arc::new(candidate.clone()));
            self.publish(current, lessons);

            (
                candidate,
                &existing,
                InsertOutcome::Superseded {
                    retired: existing.id,
                },
            )
        } else {
            (
                &existing,
                candidate,
                InsertOutcome::Rejected { kept: existing.id },
            )
        };

        tracing::warn!(
            trigger = %candidate.trigger_pattern,
            lesson_type = candidate.lesson_type.as_str(),
            kept = %kept.id,
            discarded = %discarded.id,
            kept_confidence = kept.confidence,
            discarded_confidence = discarded.confidence,
            "Patch conflict resolved on confidence"
        );

        if let Some(audit) = &self.audit {
            audit
                .record(AuditEvent::PatchConflict {
                    trigger: candidate.trigger_pattern.clone(),
                    lesson_type: candidate.lesson_type,
                    kept: kept.id,
                    discarded: discarded.id,
                    kept_confidence: kept.confidence,
                    discarded_confidence: discarded.confidence,
                })
                .await?;
        }

        Ok(outcome)
    }

    /// Apply the decay policy for a capability upgrade.
    ///
    /// When the configured trigger fires every syntax lesson is retired;
    /// business and security lessons are never touched.
    pub async fn purge(&self, upgrade: &CapabilityUpgrade) -> DomainResult<PurgeReport> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();

        if !self.decay.fires(upgrade) {
            tracing::debug!(
                from = %upgrade.from_model,
                to = %upgrade.to_model,
                trigger = ?self.decay,
                "Decay trigger did not fire"
            );
            return Ok(PurgeReport {
                fired: false,
                retired: Vec::new(),
                version: current.version(),
            });
        }

        let (decayed, kept): (Vec<Arc<Lesson>>, Vec<Arc<Lesson>>) = current
            .lessons
            .iter()
            .cloned()
            .partition(|l| l.lesson_type.is_decay_eligible());

        let now = Utc::now();
        let events: Vec<LessonEvent> = decayed
            .iter()
            .map(|lesson| LessonEvent::Retired {
                lesson_id: lesson.id,
                reason: RetireReason::Decayed {
                    to_model: upgrade.to_model.clone(),
                },
                at: now,
            })
            .collect();
        self.commit(&events).await?;

        let retired: Vec<Uuid> = decayed.iter().map(|l| l.id).collect();
        let version = if retired.is_empty() {
            current.version()
        } else {
            self.publish(&current, kept)
        };

        tracing::info!(
            from = %upgrade.from_model,
            to = %upgrade.to_model,
            retired = retired.len(),
            remaining = current.len() - retired.len(),
            "Semantic purge applied"
        );

        if let Some(audit) = &self.audit {
            audit
                .record(AuditEvent::LessonsPurged {
                    upgrade: upgrade.clone(),
                    retired: retired.clone(),
                })
                .await?;
        }

        Ok(PurgeReport {
            fired: true,
            retired,
            version,
        })
    }

    async fn commit(&self, events: &[LessonEvent]) -> DomainResult<()> {
        match &self.log {
            Some(log) if !events.is_empty() => log.append_all(events).await,
            _ => Ok(()),
        }
    }

    /// Swap in the next snapshot. Callers hold the writer lock.
    fn publish(&self, previous: &LessonSnapshot, lessons: Vec<Arc<Lesson>>) -> u64 {
        let version = previous.version + 1;
        let next = Arc::new(LessonSnapshot::build(version, lessons));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        version
    }
}
