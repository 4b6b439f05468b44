//! Output parser adapters.

pub mod json;

pub use json::JsonOutputParser;
