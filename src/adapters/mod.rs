//! Adapters behind the kernel's ports.

pub mod memory;
pub mod sqlite;
