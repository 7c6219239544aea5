//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use veritor::adapters::memory::{ScriptedShadow, ScriptedVerifier};
use veritor::domain::models::{AgentResponse, AuditTask, ClaimVector, ToolCall};
use veritor::services::AuditTrail;
use veritor::VerifierAdapter;

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
/// The TempDir must be kept alive for the duration of the test.
#[allow(dead_code)]
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("veritor.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Numeric claim vector; panics on invalid input.
#[allow(dead_code)]
pub fn numeric(values: &[f64]) -> ClaimVector {
    ClaimVector::numeric(values.to_vec()).expect("valid numeric vector")
}

/// Scripted verifiers that all observe `values` with the given confidence.
#[allow(dead_code)]
pub fn observing_panel(count: usize, values: &[f64], confidence: f64) -> Vec<Arc<ScriptedVerifier>> {
    (0..count)
        .map(|i| {
            Arc::new(ScriptedVerifier::observing(
                format!("verifier-{i}"),
                numeric(values),
                confidence,
            ))
        })
        .collect()
}

/// Upcast scripted verifiers for the engine.
#[allow(dead_code)]
pub fn as_adapters(panel: &[Arc<ScriptedVerifier>]) -> Vec<Arc<dyn VerifierAdapter>> {
    panel
        .iter()
        .map(|v| Arc::clone(v) as Arc<dyn VerifierAdapter>)
        .collect()
}

#[allow(dead_code)]
pub fn audit_trail() -> Arc<AuditTrail> {
    Arc::new(AuditTrail::with_defaults())
}

/// The March orders task an agent gave up on.
#[allow(dead_code)]
pub fn march_orders_task() -> AuditTask {
    AuditTask::new("How many orders shipped in March 2023?")
}

/// "No data found" after querying only the live orders table.
#[allow(dead_code)]
pub fn gave_up_response() -> AgentResponse {
    AgentResponse::text("No data found").with_tool_call(ToolCall::new(
        "sql",
        "SELECT count(*) FROM sales.orders WHERE shipped_at >= '2023-03-01'",
    ))
}

/// Shadow verifier that locates the data in the archive.
#[allow(dead_code)]
pub fn archive_shadow() -> Arc<ScriptedShadow> {
    Arc::new(ScriptedShadow::finding("archive.orders_2023"))
}
