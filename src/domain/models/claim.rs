//! Claim domain model.
//!
//! A claim is an assertion (or an agent's task output) submitted for
//! verification. It carries a structured representation, the *claim
//! vector*, which is the only part the consensus reduction ever looks at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Context keys reserved for first-class fields.
///
/// Dedup and trigger matching read these from typed fields only, so an
/// open context map may never smuggle them in.
pub const RESERVED_CONTEXT_KEYS: &[&str] = &[
    "fingerprint",
    "trace_id",
    "trigger_pattern",
    "lesson_type",
];

/// A scalar or blob value stored in an open context map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Blob(Vec<u8>),
}

impl ContextValue {
    /// Text form used when a context is scanned for trigger terms.
    ///
    /// Blobs are opaque and contribute nothing.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Flag(b) => Some(b.to_string()),
            Self::Blob(_) => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Explicitly typed open map of string keys to scalar/blob values.
pub type ContextMap = BTreeMap<String, ContextValue>;

/// Reject context maps that carry reserved keys.
pub fn validate_context(context: &ContextMap) -> DomainResult<()> {
    for key in context.keys() {
        if RESERVED_CONTEXT_KEYS.contains(&key.as_str()) {
            return Err(DomainError::validation(format!(
                "context key '{key}' is reserved"
            )));
        }
    }
    Ok(())
}

/// Flatten the textual values of a context map into one string.
pub fn context_text(context: &ContextMap) -> String {
    context
        .values()
        .filter_map(ContextValue::as_text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Kind of a claim vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Numeric,
    Categorical,
}

impl VectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Categorical => "categorical",
        }
    }
}

/// Structured representation of a claim or an observation.
///
/// Numeric components are normalised at the boundary: every component
/// must be finite and lie in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ClaimVector {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ClaimVector {
    /// Build a validated numeric vector.
    pub fn numeric(values: impl Into<Vec<f64>>) -> DomainResult<Self> {
        let vector = Self::Numeric(values.into());
        vector.validate()?;
        Ok(vector)
    }

    /// Build a validated categorical vector.
    pub fn categorical<I, S>(labels: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vector = Self::Categorical(labels.into_iter().map(Into::into).collect());
        vector.validate()?;
        Ok(vector)
    }

    pub fn kind(&self) -> VectorKind {
        match self {
            Self::Numeric(_) => VectorKind::Numeric,
            Self::Categorical(_) => VectorKind::Categorical,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Categorical(labels) => labels.len(),
        }
    }

    /// Same kind and same dimension.
    pub fn is_compatible(&self, other: &ClaimVector) -> bool {
        self.kind() == other.kind() && self.dimension() == other.dimension()
    }

    /// Check the boundary invariants for this vector.
    pub fn validate(&self) -> DomainResult<()> {
        if self.dimension() == 0 {
            return Err(DomainError::validation("claim vector must not be empty"));
        }

        match self {
            Self::Numeric(values) => {
                for (i, v) in values.iter().enumerate() {
                    if !v.is_finite() {
                        return Err(DomainError::validation(format!(
                            "component {i} is not finite"
                        )));
                    }
                    if !(0.0..=1.0).contains(v) {
                        return Err(DomainError::validation(format!(
                            "component {i} = {v} is outside the normalised range [0, 1]"
                        )));
                    }
                }
            }
            Self::Categorical(labels) => {
                if let Some(i) = labels.iter().position(|l| l.trim().is_empty()) {
                    return Err(DomainError::validation(format!("label {i} is empty")));
                }
            }
        }

        Ok(())
    }
}

/// Stable identity of a claim's assertion, used to coalesce duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimFingerprint(String);

impl ClaimFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the subject and vector of a claim.
    ///
    /// Context does not participate: two submissions asserting the same
    /// thing are the same claim regardless of the metadata around them.
    pub fn compute(subject: &str, vector: &ClaimVector) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update([0u8]);
        hasher.update(vector.kind().as_str().as_bytes());
        hasher.update([0u8]);
        match vector {
            ClaimVector::Numeric(values) => {
                for v in values {
                    // -0.0 and 0.0 assert the same thing
                    let v = if *v == 0.0 { 0.0_f64 } else { *v };
                    hasher.update(v.to_bits().to_le_bytes());
                }
            }
            ClaimVector::Categorical(labels) => {
                for label in labels {
                    hasher.update(label.as_bytes());
                    hasher.update([0x1f]);
                }
            }
        }
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for ClaimFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// An assertion submitted for verification. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    /// What is being asserted, in free text.
    pub subject: String,
    pub vector: ClaimVector,
    pub context: ContextMap,
    /// Failures on critical claims are patched synchronously.
    pub critical: bool,
    pub submitted_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(subject: impl Into<String>, vector: ClaimVector) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            vector,
            context: ContextMap::new(),
            critical: false,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn fingerprint(&self) -> ClaimFingerprint {
        ClaimFingerprint::compute(&self.subject, &self.vector)
    }

    /// Validate the claim at the kernel boundary.
    pub fn validate(&self) -> DomainResult<()> {
        if self.subject.trim().is_empty() {
            return Err(DomainError::validation("claim subject must not be empty"));
        }
        self.vector.validate()?;
        validate_context(&self.context)
    }
}
