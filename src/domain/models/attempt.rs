//! Attempt log entries written by restartable jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::job::{ResourceRequest, SolverControls};
use crate::domain::models::outcome::JobOutcome;

/// One actual execution attempt. Never edited after it is pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub job_label: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub resources: ResourceRequest,
    pub solver: SolverControls,
    pub outcome: JobOutcome<()>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
