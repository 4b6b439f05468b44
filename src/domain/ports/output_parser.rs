//! Output parser port - turns raw job output into domain values.

use thiserror::Error;

use crate::domain::models::{ElectronicState, HubbardParameterSet, RawOutput, Structure};

/// Reasons raw output could not be turned into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing field '{0}' in output")]
    MissingField(String),

    #[error("invalid output: {0}")]
    Invalid(String),

    /// The output is well formed but reports that the solver did not converge.
    #[error("solver did not converge: {0}")]
    NotConverged(String),
}

/// Parses the output of each job kind.
pub trait OutputParser: Send + Sync {
    fn parse_hubbard(&self, output: &RawOutput) -> Result<HubbardParameterSet, ParseError>;

    fn parse_ground_state(&self, output: &RawOutput) -> Result<ElectronicState, ParseError>;

    fn parse_structure(&self, output: &RawOutput) -> Result<Structure, ParseError>;
}
