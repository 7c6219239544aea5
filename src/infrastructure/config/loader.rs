use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use regex::RegexBuilder;
use thiserror::Error;

use crate::domain::models::KernelConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid consensus threshold: {0}. Must be strictly between 0 and 1")]
    InvalidThreshold(f64),

    #[error("Invalid {field}: must be greater than 0")]
    ZeroDuration { field: &'static str },

    #[error("Invalid min_fail_quorum: {0}. Must be at least 1")]
    InvalidQuorum(usize),

    #[error("Invalid {field} pattern '{pattern}': {reason}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("Auditor needs at least one give-up signature")]
    NoGiveUpSignatures,

    #[error("Invalid near_duplicate_similarity: {0}. Must be within (0, 1]")]
    InvalidSimilarity(f64),

    #[error("Invalid max_trigger_rate: {0}. Must be within (0, 1]")]
    InvalidTriggerRate(f64),

    #[error("Invalid max_trigger_terms: must be at least 1")]
    InvalidTriggerTerms,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid audit_trail.max_entries: must be at least 1")]
    InvalidMaxEntries,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .veritor/config.yaml (project config)
    /// 3. .veritor/local.yaml (local overrides, optional)
    /// 4. Environment variables (VERITOR_* prefix, `__` nests sections)
    pub fn load() -> Result<KernelConfig> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(".veritor/config.yaml"))
            .merge(Yaml::file(".veritor/local.yaml"))
            .merge(Env::prefixed("VERITOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<KernelConfig> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &KernelConfig) -> Result<(), ConfigError> {
        let consensus = &config.consensus;
        if !(consensus.threshold > 0.0 && consensus.threshold < 1.0) {
            return Err(ConfigError::InvalidThreshold(consensus.threshold));
        }
        if consensus.timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "consensus.timeout_ms",
            });
        }
        if consensus.min_fail_quorum == 0 {
            return Err(ConfigError::InvalidQuorum(consensus.min_fail_quorum));
        }

        let auditor = &config.auditor;
        if auditor.give_up_signatures.is_empty() {
            return Err(ConfigError::NoGiveUpSignatures);
        }
        check_patterns("auditor.give_up_signatures", &auditor.give_up_signatures)?;
        check_patterns("auditor.exhaustive_indicators", &auditor.exhaustive_indicators)?;
        if auditor.shadow_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "auditor.shadow_timeout_ms",
            });
        }
        if !(auditor.max_trigger_rate > 0.0 && auditor.max_trigger_rate <= 1.0) {
            return Err(ConfigError::InvalidTriggerRate(auditor.max_trigger_rate));
        }

        let patcher = &config.patcher;
        if patcher.max_trigger_terms == 0 {
            return Err(ConfigError::InvalidTriggerTerms);
        }
        if !(patcher.near_duplicate_similarity > 0.0 && patcher.near_duplicate_similarity <= 1.0) {
            return Err(ConfigError::InvalidSimilarity(patcher.near_duplicate_similarity));
        }
        if patcher.batch_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "patcher.batch_interval_secs",
            });
        }

        if config.audit_trail.max_entries == 0 {
            return Err(ConfigError::InvalidMaxEntries);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

fn check_patterns(field: &'static str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                field,
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}
