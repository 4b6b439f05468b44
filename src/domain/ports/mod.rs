//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces that adapters must implement:
//! - JobRunner: submission and polling of external jobs
//! - OutputParser: decoding of raw job output
//! - IterationJournal: persistence of loop progress
//!
//! These traits keep the orchestration independent of any particular
//! scheduler, output format or database.

pub mod iteration_journal;
pub mod job_runner;
pub mod output_parser;

pub use iteration_journal::IterationJournal;
pub use job_runner::JobRunner;
pub use output_parser::{OutputParser, ParseError};
