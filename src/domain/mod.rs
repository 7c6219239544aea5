//! Domain layer: data contracts, errors and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;
