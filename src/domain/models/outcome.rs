//! Job outcomes and the failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of why a job or stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Scheduler or hardware trouble; retry, possibly with new resources.
    TransientResource,
    /// The code ran but its solver did not converge.
    DomainNonConvergence,
    /// The code finished but its output could not be understood.
    MalformedOutput,
    InvalidInput,
    CodeFatal,
    /// The runner reported a status nobody knows how to handle.
    UnknownStatus,
    /// The orchestrator itself broke an invariant.
    InternalConsistency,
}

impl FailureKind {
    /// Whether a retry can plausibly fix this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientResource | Self::DomainNonConvergence)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientResource => "transient_resource",
            Self::DomainNonConvergence => "domain_non_convergence",
            Self::MalformedOutput => "malformed_output",
            Self::InvalidInput => "invalid_input",
            Self::CodeFatal => "code_fatal",
            Self::UnknownStatus => "unknown_status",
            Self::InternalConsistency => "internal_consistency",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one job or one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome<T> {
    Success(T),
    RecoverableFailure(FailureReason),
    FatalFailure(FailureReason),
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Success(_) => None,
            Self::RecoverableFailure(reason) | Self::FatalFailure(reason) => Some(reason),
        }
    }

    /// Drop the payload, keeping only the shape of the outcome.
    pub fn status(&self) -> JobOutcome<()> {
        match self {
            Self::Success(_) => JobOutcome::Success(()),
            Self::RecoverableFailure(reason) => JobOutcome::RecoverableFailure(reason.clone()),
            Self::FatalFailure(reason) => JobOutcome::FatalFailure(reason.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> JobOutcome<U> {
        match self {
            Self::Success(value) => JobOutcome::Success(f(value)),
            Self::RecoverableFailure(reason) => JobOutcome::RecoverableFailure(reason),
            Self::FatalFailure(reason) => JobOutcome::FatalFailure(reason),
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> fmt::Display for JobOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("success"),
            Self::RecoverableFailure(reason) => write!(f, "recoverable ({reason})"),
            Self::FatalFailure(reason) => write!(f, "fatal ({reason})"),
        }
    }
}
