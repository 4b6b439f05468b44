//! Adapters implementing the domain ports.

pub mod memory_journal;
pub mod parsers;
pub mod runners;
pub mod sqlite;

pub use memory_journal::InMemoryJournal;
pub use parsers::JsonOutputParser;
pub use runners::{LocalProcessRunner, MockJobRunner, ThrottledRunner};
pub use sqlite::{open_journal, SqliteJournal};
