//! Lesson domain model.
//!
//! A lesson is an atomic, reusable correction: when a task's context
//! matches its trigger pattern, its rule text is injected into the task's
//! framing. Lessons are append-only; the decay policy retires them, it
//! never edits them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Split text into lower-cased identifier tokens.
///
/// Letters, digits and underscores form tokens; everything else separates
/// them, so `archive.orders_2023` yields `archive` and `orders_2023`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Classification that decides whether a lesson may decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    /// Tool/language usage corrections; obsolete once a stronger model lands.
    Syntax,
    /// Domain knowledge; never auto-purged.
    Business,
    /// Safety corrections; never auto-purged.
    Security,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Business => "business",
            Self::Security => "security",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "syntax" => Some(Self::Syntax),
            "business" => Some(Self::Business),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    /// Only syntax lessons are purged on capability upgrade.
    pub fn is_decay_eligible(&self) -> bool {
        matches!(self, Self::Syntax)
    }
}

/// Canonical set of context terms that should invoke a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TriggerPattern {
    terms: Vec<String>,
}

impl TriggerPattern {
    /// Shorter terms are too generic to identify a context.
    pub const MIN_TERM_LEN: usize = 3;

    pub fn new<I, S>(terms: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical = BTreeSet::new();
        for term in terms {
            let raw = term.as_ref().trim().to_lowercase();
            let tokens = tokenize(&raw);
            if tokens.len() != 1 || !tokens.contains(&raw) {
                return Err(DomainError::validation(format!(
                    "trigger term '{raw}' is not a single token"
                )));
            }
            if raw.chars().count() < Self::MIN_TERM_LEN {
                return Err(DomainError::validation(format!(
                    "trigger term '{raw}' is shorter than {} characters",
                    Self::MIN_TERM_LEN
                )));
            }
            canonical.insert(raw);
        }

        if canonical.is_empty() {
            return Err(DomainError::validation("trigger pattern needs at least one term"));
        }

        Ok(Self {
            terms: canonical.into_iter().collect(),
        })
    }

    /// Build a pattern from free text, keeping tokens long enough to use.
    pub fn parse(text: &str) -> DomainResult<Self> {
        Self::new(
            tokenize(text)
                .into_iter()
                .filter(|t| t.chars().count() >= Self::MIN_TERM_LEN),
        )
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn matches_tokens(&self, tokens: &BTreeSet<String>) -> bool {
        self.terms.iter().all(|t| tokens.contains(t))
    }

    pub fn matches(&self, context: &str) -> bool {
        self.matches_tokens(&tokenize(context))
    }

    /// Terms that do not occur in `tokens`.
    pub fn unmatched_in(&self, tokens: &BTreeSet<String>) -> Vec<String> {
        self.terms
            .iter()
            .filter(|t| !tokens.contains(*t))
            .cloned()
            .collect()
    }

    /// Jaccard similarity of the two term sets.
    pub fn similarity(&self, other: &TriggerPattern) -> f64 {
        let a: BTreeSet<&String> = self.terms.iter().collect();
        let b: BTreeSet<&String> = other.terms.iter().collect();
        let union = a.union(&b).count();
        if union == 0 {
            return 0.0;
        }
        a.intersection(&b).count() as f64 / union as f64
    }
}

impl TryFrom<Vec<String>> for TriggerPattern {
    type Error = DomainError;

    fn try_from(terms: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(terms)
    }
}

impl From<TriggerPattern> for Vec<String> {
    fn from(pattern: TriggerPattern) -> Self {
        pattern.terms
    }
}

impl fmt::Display for TriggerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.terms.join(" "))
    }
}

/// Dedup key of the lesson store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LessonKey {
    pub trigger: TriggerPattern,
    pub lesson_type: LessonType,
}

/// An atomic, reusable behavioural correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub trigger_pattern: TriggerPattern,
    /// Instruction injected into future task framing.
    pub rule_text: String,
    pub lesson_type: LessonType,
    pub confidence: f64,
    /// The failure trace this lesson was derived from.
    pub source_trace_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Lesson {
    pub fn new(
        trigger_pattern: TriggerPattern,
        rule_text: impl Into<String>,
        lesson_type: LessonType,
        confidence: f64,
        source_trace_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_pattern,
            rule_text: rule_text.into(),
            lesson_type,
            confidence: confidence.clamp(0.0, 1.0),
            source_trace_id,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> LessonKey {
        LessonKey {
            trigger: self.trigger_pattern.clone(),
            lesson_type: self.lesson_type,
        }
    }
}

/// Event announcing that the underlying agent model became more capable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityUpgrade {
    pub from_model: String,
    pub to_model: String,
    pub from_tier: u32,
    pub to_tier: u32,
    pub occurred_at: DateTime<Utc>,
}

impl CapabilityUpgrade {
    pub fn new(
        from_model: impl Into<String>,
        to_model: impl Into<String>,
        from_tier: u32,
        to_tier: u32,
    ) -> Self {
        Self {
            from_model: from_model.into(),
            to_model: to_model.into(),
            from_tier,
            to_tier,
            occurred_at: Utc::now(),
        }
    }
}

/// When a capability upgrade should purge decay-eligible lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayTrigger {
    /// Every upgrade event purges.
    #[default]
    AnyUpgrade,
    /// Only upgrades that raise the capability tier purge.
    TierIncrease,
    /// Never purge automatically.
    Disabled,
}

impl DecayTrigger {
    pub fn fires(&self, upgrade: &CapabilityUpgrade) -> bool {
        match self {
            Self::AnyUpgrade => true,
            Self::TierIncrease => upgrade.to_tier > upgrade.from_tier,
            Self::Disabled => false,
        }
    }
}
