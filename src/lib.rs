//! Veritor - Self-Correcting Verification Kernel
//!
//! Veritor runs claims past several independent verifiers in parallel,
//! reduces their verdicts to one deterministic decision, audits agent
//! responses for premature give-ups, and turns confirmed failures into
//! durable lessons that shape future task framing.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Data contracts, errors and ports
//! - **Service Layer** (`services`): Consensus, auditing, patching and the lesson lifecycle
//! - **Adapters** (`adapters`): In-memory and SQLite implementations of the ports
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use veritor::{ConfigLoader, Kernel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let kernel = Kernel::builder(config)
//!         .verifier(Arc::new(my_verifier))
//!         .shadow(Arc::new(my_shadow))
//!         .build()
//!         .await?;
//!     let decision = kernel.evaluate(&claim).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AgentResponse, ApplyStrategy, AuditOutcome, AuditResult, AuditTask, CapabilityUpgrade, Claim,
    ClaimVector, ConsensusDecision, Decision, DecayTrigger, FailureKind, FailureTrace,
    KernelConfig, Lesson, LessonType, PatchOutcome, PatchRequest, Severity, TriggerPattern,
    Verdict, VerdictStatus,
};
pub use domain::ports::{
    AuditSink, LessonLog, Observation, ShadowAdapter, VerifierAdapter, VerifierError,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::LoggerImpl;
pub use services::{
    ConsensusEngine, CorrectionPipeline, Kernel, KernelBuilder, LessonStore, PipelineOutcome,
    TaskFraming,
};
