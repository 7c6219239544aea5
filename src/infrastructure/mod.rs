//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Storage adapters that satisfy
//! the domain ports live under `crate::adapters`.

pub mod config;
pub mod logging;
