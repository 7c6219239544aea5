//! In-process adapters.
//!
//! Storage ports backed by plain collections, and scripted verifiers that
//! stand in for model clients. Used by tests, benchmarks and embedders that
//! do not need durability.

mod audit_sink;
mod lesson_log;
mod verifiers;

pub use audit_sink::InMemoryAuditSink;
pub use lesson_log::InMemoryLessonLog;
pub use verifiers::{ScriptedShadow, ScriptedVerifier, ShadowScript, VerifierScript};
