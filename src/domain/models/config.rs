//! Kernel configuration.
//!
//! Every tunable the kernel consumes is supplied from here; nothing in the
//! services hardcodes a threshold, timeout, signature set or decay trigger.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::lesson::DecayTrigger;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub consensus: ConsensusConfig,
    pub auditor: AuditorConfig,
    pub patcher: PatcherConfig,
    pub decay: DecayConfig,
    pub audit_trail: AuditTrailConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Consensus engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Drift threshold τ, exclusive range (0, 1).
    pub threshold: f64,
    /// Per-call deadline for the whole fan-out.
    pub timeout_ms: u64,
    /// Minimum ok verdicts before a majority may declare FAIL.
    pub min_fail_quorum: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            timeout_ms: 30_000,
            min_fail_quorum: 2,
        }
    }
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Completeness auditor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// Regular expressions (case-insensitive) that signal giving up.
    pub give_up_signatures: Vec<String>,
    /// Regular expressions that introduce a list of alternatives tried.
    pub exhaustive_indicators: Vec<String>,
    /// Alternatives a response must list to count as exhaustive.
    pub min_alternatives: usize,
    pub shadow_timeout_ms: u64,
    /// Extra instructions for the shadow verifier's re-attempt.
    pub search_hints: Vec<String>,
    /// Trigger rate above which a selectivity warning is logged.
    pub max_trigger_rate: f64,
    /// Responses audited before the trigger rate is checked.
    pub warmup_responses: u64,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            give_up_signatures: [
                r"\bnot found\b",
                r"\bno (?:data|results?|records?|matches)\b",
                r"\b(?:cannot|can't|could not|couldn't|unable to) (?:access|find|locate|retrieve)\b",
                r"\bdoes(?: not|n't) exist\b",
                r"\bI (?:cannot|can't|am unable to) (?:help|do|complete)\b",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            exhaustive_indicators: [
                r"\b(?:i )?(?:tried|checked|searched|looked (?:in|at)|also (?:checked|searched))\b",
                r"\balternatives?\b",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            min_alternatives: 2,
            shadow_timeout_ms: 60_000,
            search_hints: vec![
                "Check archival and historical locations for the requested data".to_string(),
                "Check rename and migration history of the referenced resources".to_string(),
            ],
            max_trigger_rate: 0.10,
            warmup_responses: 100,
        }
    }
}

impl AuditorConfig {
    pub fn shadow_timeout(&self) -> Duration {
        Duration::from_millis(self.shadow_timeout_ms)
    }
}

/// Patcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    pub max_trigger_terms: usize,
    /// Jaccard similarity at which two queued lessons are merged.
    pub near_duplicate_similarity: f64,
    /// Route FLAG decisions into the correction pipeline, not just FAIL.
    pub patch_on_flag: bool,
    pub batch_interval_secs: u64,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            max_trigger_terms: 3,
            near_duplicate_similarity: 0.8,
            patch_on_flag: false,
            batch_interval_secs: 300,
        }
    }
}

impl PatcherConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
}

/// Lesson decay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DecayConfig {
    pub trigger: DecayTrigger,
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditTrailConfig {
    /// Records kept in the in-memory window; the durable sink keeps all.
    pub max_entries: usize,
    /// Scrub secrets from exported records.
    pub redact_sensitive: bool,
}

impl Default for AuditTrailConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            redact_sensitive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".veritor/veritor.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling JSON log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,
    pub enable_stdout: bool,
    pub rotation: RotationPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::Daily,
        }
    }
}
