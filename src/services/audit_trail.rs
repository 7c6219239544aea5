//! Audit trail service.
//!
//! Every consensus decision, failure trace, late verdict and lesson store
//! mutation is recorded here as a sequenced, timestamped record. A bounded
//! window is kept in memory for querying; when a durable [`AuditSink`] is
//! attached every record is written through to it before it becomes
//! visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEvent, AuditEventKind, AuditRecord, AuditTrailConfig};
use crate::domain::ports::AuditSink;
use crate::infrastructure::logging::SecretScrubber;

/// Filter for querying the audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by event kind.
    pub kind: Option<AuditEventKind>,
    /// Filter by primary entity id.
    pub entity_id: Option<Uuid>,
    /// Only records with `seq` greater than this.
    pub after_seq: Option<u64>,
    /// Filter by time range start.
    pub from: Option<DateTime<Utc>>,
    /// Filter by time range end.
    pub to: Option<DateTime<Utc>>,
    /// Keep at most this many of the newest matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: AuditEventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_entity(mut self, id: Uuid) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn after_seq(mut self, seq: u64) -> Self {
        self.after_seq = Some(seq);
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.event.kind() != kind {
                return false;
            }
        }

        if let Some(entity_id) = self.entity_id {
            if record.event.entity_id() != Some(entity_id) {
                return false;
            }
        }

        if let Some(after) = self.after_seq {
            if record.seq <= after {
                return false;
            }
        }

        if let Some(from) = self.from {
            if record.recorded_at < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if record.recorded_at > to {
                return false;
            }
        }

        true
    }
}

/// Statistics about the in-memory window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_entries: usize,
    pub by_kind: HashMap<String, usize>,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Append-only audit trail.
pub struct AuditTrail {
    config: AuditTrailConfig,
    sink: Option<Arc<dyn AuditSink>>,
    // Held across the sink write so sequence numbers reach the sink in order.
    next_seq: Mutex<u64>,
    entries: RwLock<VecDeque<AuditRecord>>,
    scrubber: SecretScrubber,
}

impl AuditTrail {
    /// In-memory trail with no durable sink.
    pub fn new(config: AuditTrailConfig) -> Self {
        Self {
            config,
            sink: None,
            next_seq: Mutex::new(1),
            entries: RwLock::new(VecDeque::new()),
            scrubber: SecretScrubber::new(),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(AuditTrailConfig::default())
    }

    /// Open a trail backed by `sink`, resuming after the last stored record.
    pub async fn open(config: AuditTrailConfig, sink: Arc<dyn AuditSink>) -> DomainResult<Self> {
        let stored = sink.load().await?;
        let next_seq = stored.last().map_or(1, |r| r.seq + 1);

        let skip = stored.len().saturating_sub(config.max_entries);
        let window: VecDeque<AuditRecord> = stored.into_iter().skip(skip).collect();

        tracing::info!(
            next_seq,
            restored = window.len(),
            "Audit trail opened"
        );

        Ok(Self {
            config,
            sink: Some(sink),
            next_seq: Mutex::new(next_seq),
            entries: RwLock::new(window),
            scrubber: SecretScrubber::new(),
        })
    }

    /// Append one event and return the stored record.
    ///
    /// The record is written to the sink first; if that fails nothing is
    /// recorded and the sequence number is not consumed.
    pub async fn record(&self, event: AuditEvent) -> DomainResult<AuditRecord> {
        let mut next_seq = self.next_seq.lock().await;

        let record = AuditRecord {
            seq: *next_seq,
            recorded_at: Utc::now(),
            event,
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&record).await {
                tracing::error!(
                    seq = record.seq,
                    kind = record.event.kind().as_str(),
                    error = %e,
                    "Failed to persist audit record"
                );
                return Err(e);
            }
        }
        *next_seq += 1;

        // A zero-sized window keeps nothing in memory; the sink still has it.
        if self.config.max_entries > 0 {
            let mut entries = self.entries.write().await;
            while entries.len() >= self.config.max_entries {
                entries.pop_front();
            }
            entries.push_back(record.clone());
        }

        tracing::debug!(
            seq = record.seq,
            kind = record.event.kind().as_str(),
            "Audit record appended"
        );

        Ok(record)
    }

    /// Query the in-memory window in sequence order.
    pub async fn query(&self, filter: AuditFilter) -> Vec<AuditRecord> {
        let entries = self.entries.read().await;
        let mut results: Vec<AuditRecord> = entries
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            let skip = results.len().saturating_sub(limit);
            results.drain(..skip);
        }

        results
    }

    /// Every record about one entity (decision, trace, task).
    pub async fn entity_history(&self, entity_id: Uuid) -> Vec<AuditRecord> {
        self.query(AuditFilter::new().with_entity(entity_id)).await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get statistics.
    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.read().await;

        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for record in entries.iter() {
            *by_kind
                .entry(record.event.kind().as_str().to_string())
                .or_default() += 1;
        }

        AuditStats {
            total_entries: entries.len(),
            by_kind,
            first_seq: entries.front().map(|r| r.seq),
            last_seq: entries.back().map(|r| r.seq),
            oldest_entry: entries.front().map(|r| r.recorded_at),
            newest_entry: entries.back().map(|r| r.recorded_at),
        }
    }

    /// Export matching records as JSON lines, one record per line.
    pub async fn export_jsonl(&self, filter: AuditFilter) -> DomainResult<String> {
        let records = self.query(filter).await;
        let mut out = String::new();
        for record in &records {
            let line = serde_json::to_string(record)?;
            if self.config.redact_sensitive {
                out.push_str(&self.scrubber.scrub(&line));
            } else {
                out.push_str(&line);
            }
            out.push('\n');
        }
        Ok(out)
    }
}
