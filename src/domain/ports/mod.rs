//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces adapters must implement:
//! - VerifierAdapter: one external reasoning worker
//! - ShadowAdapter: the elevated-capability worker used by audits
//! - AuditSink: durable audit trail storage
//! - LessonLog: append-only lesson history
//!
//! The kernel assumes nothing about the technology behind these seams.

pub mod audit_sink;
pub mod lesson_log;
pub mod shadow;
pub mod verifier;

pub use audit_sink::AuditSink;
pub use lesson_log::{LessonEvent, LessonLog, RetireReason};
pub use shadow::ShadowAdapter;
pub use verifier::{Observation, VerifierAdapter, VerifierError};
