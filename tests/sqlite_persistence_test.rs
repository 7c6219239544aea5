//! Durability tests: the kernel backed by the SQLite audit sink and lesson
//! log survives a restart.

mod common;

use std::sync::Arc;

use common::{archive_shadow, numeric, setup_test_logging, temp_db_path};
use sqlx::SqlitePool;
use veritor::adapters::sqlite::{
    create_migrated_test_pool, initialize_database, SqliteAuditSink, SqliteLessonLog,
};
use veritor::adapters::memory::ScriptedVerifier;
use veritor::domain::models::{AuditEventKind, DatabaseConfig};
use veritor::services::{AuditFilter, AuditTrail, LessonStore};
use veritor::{CapabilityUpgrade, Claim, Decision, DecayTrigger, Kernel, KernelConfig, LessonType};

async fn durable_kernel(pool: &SqlitePool) -> Kernel {
    Kernel::builder(KernelConfig::default())
        .verifier(Arc::new(ScriptedVerifier::observing("a", numeric(&[0.45, 0.52]), 0.9)))
        .verifier(Arc::new(ScriptedVerifier::observing("b", numeric(&[0.45, 0.52]), 0.9)))
        .shadow(archive_shadow())
        .audit_sink(Arc::new(SqliteAuditSink::new(pool.clone())))
        .lesson_log(Arc::new(SqliteLessonLog::new(pool.clone())))
        .build()
        .await
        .expect("kernel builds")
}

fn failing_claim() -> Claim {
    Claim::new("uplift for campaign_spring", numeric(&[0.82, 0.95])).critical()
}

#[tokio::test]
async fn test_hotfix_is_persisted_to_lesson_log() {
    let pool = create_migrated_test_pool().await.unwrap();
    let kernel = durable_kernel(&pool).await;

    let decision = kernel.evaluate(&failing_claim()).await.unwrap();
    assert_eq!(decision.decision, Decision::Fail);
    kernel.shutdown().await;

    let log = SqliteLessonLog::new(pool.clone());
    let active = log.active_lessons().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].lesson_type, LessonType::Business);

    let reopened = LessonStore::open(Arc::new(log), DecayTrigger::AnyUpgrade)
        .await
        .unwrap();
    let snapshot = reopened.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains(active[0].id));
}

#[tokio::test]
async fn test_purge_survives_replay() {
    let pool = create_migrated_test_pool().await.unwrap();
    let kernel = durable_kernel(&pool).await;
    kernel.evaluate(&failing_claim()).await.unwrap();

    // Business lessons are kept across upgrades.
    let report = kernel
        .capability_upgrade(&CapabilityUpgrade::new("model-a", "model-b", 1, 2))
        .await
        .unwrap();
    assert!(report.fired);
    assert!(report.retired.is_empty());
    kernel.shutdown().await;

    let log = Arc::new(SqliteLessonLog::new(pool.clone()));
    let reopened = LessonStore::open(log.clone(), DecayTrigger::AnyUpgrade)
        .await
        .unwrap();
    assert_eq!(reopened.snapshot().count_by_type(LessonType::Business), 1);
    assert_eq!(log.rebuild_active_set().await.unwrap(), 1);
}

#[tokio::test]
async fn test_audit_trail_resumes_sequence() {
    let pool = create_migrated_test_pool().await.unwrap();
    let sink = Arc::new(SqliteAuditSink::new(pool.clone()));

    let kernel = durable_kernel(&pool).await;
    kernel.evaluate(&failing_claim()).await.unwrap();
    kernel.shutdown().await;

    let stored = sink.count().await.unwrap();
    assert!(stored >= 3, "decision, trace and patch records expected, got {stored}");

    let trail = AuditTrail::open(KernelConfig::default().audit_trail, sink.clone())
        .await
        .unwrap();
    let decisions = trail
        .query(AuditFilter::new().with_kind(AuditEventKind::Decision))
        .await;
    assert_eq!(decisions.len(), 1);

    let stats = trail.stats().await;
    assert_eq!(stats.last_seq, Some(stored));
}

#[tokio::test]
async fn test_file_database_survives_restart() {
    setup_test_logging();
    let (_dir, db_path) = temp_db_path();
    let config = DatabaseConfig {
        path: db_path.to_string_lossy().into_owned(),
        ..DatabaseConfig::default()
    };

    let pool = initialize_database(&config).await.unwrap();
    let kernel = durable_kernel(&pool).await;
    kernel.evaluate(&failing_claim()).await.unwrap();
    let lessons_before = kernel.lesson_store().snapshot().len();
    kernel.shutdown().await;
    pool.close().await;
    assert!(db_path.exists());

    let pool = initialize_database(&config).await.unwrap();
    let kernel = durable_kernel(&pool).await;

    assert_eq!(lessons_before, 1);
    assert_eq!(kernel.lesson_store().snapshot().len(), lessons_before);
    let framing = kernel.frame("forecast uplift for campaign_spring");
    assert_eq!(framing.rules.len(), 1);

    // The lesson's source trace is remembered, so a repeat is not re-applied.
    kernel.evaluate(&failing_claim()).await.unwrap();
    assert_eq!(kernel.lesson_store().snapshot().len(), 1);
    kernel.shutdown().await;
    pool.close().await;
}
