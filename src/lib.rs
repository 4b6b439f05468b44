//! hubbard-scf - self-consistent Hubbard parameter orchestrator
//!
//! Drives an outer loop of ground-state and linear-response calculations
//! until the Hubbard parameters stop changing, optionally relaxing the
//! structure between cycles. Every job runs under a restart policy that
//! classifies failures and resubmits with adjusted resources, and parameter
//! extraction is split into independent per-site tasks run in parallel.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits
//! - **Service Layer** (`services`): restart handling, decomposition and the loop
//! - **Adapters** (`adapters`): job runners, output parsers and journals
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubbard_scf::adapters::{InMemoryJournal, JsonOutputParser, LocalProcessRunner};
//! use hubbard_scf::{Config, ExtractionSettings, SelfConsistencyLoop};
//!
//! let config = Config::default();
//! let scf = SelfConsistencyLoop::new(
//!     config.clone(),
//!     Arc::new(LocalProcessRunner::new(config.runner)),
//!     Arc::new(JsonOutputParser::new()),
//!     Arc::new(InMemoryJournal::new()),
//!     ExtractionSettings::default(),
//! );
//! let report = scf.start(structure, None).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, ExtractionSettings, HubbardKey, HubbardParameterSet, JobOutcome, LoopTermination,
    Site, Structure,
};
pub use domain::ports::{IterationJournal, JobRunner, OutputParser};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{LoopReport, ParallelDecomposition, RestartableJob, SelfConsistencyLoop};
