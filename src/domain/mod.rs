//! Domain layer for the hubbard-scf orchestrator
//!
//! This module contains core models, errors and the port traits adapters
//! implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
