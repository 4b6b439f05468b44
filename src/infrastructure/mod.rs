//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Persistence, runners and output
//! parsers live under `adapters`.

pub mod config;
pub mod logging;
