//! Append-only journal records of the self-consistency loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::config::RelaxationConfig;
use crate::domain::models::hubbard::HubbardParameterSet;
use crate::domain::models::outcome::{FailureReason, JobOutcome};
use crate::domain::models::structure::Structure;

/// What the loop decided at the end of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopDecision {
    Continue,
    Converged,
    MaxIterationsExceeded,
    Failed,
}

impl LoopDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Converged => "converged",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::Failed => "failed",
        }
    }
}

/// Condensed view of one stage's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub outcome: JobOutcome<()>,
    /// Attempts across all jobs of the stage.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_energy: Option<f64>,
    /// Number of decomposition tasks, for extraction stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_count: Option<usize>,
}

/// One completed iteration of the inner loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Relaxation cycle, 0 for the first structure.
    pub cycle: u32,
    /// Iteration index within the cycle, starting at 0.
    pub iteration: u32,
    pub input: HubbardParameterSet,
    #[serde(default)]
    pub output: Option<HubbardParameterSet>,
    #[serde(default)]
    pub max_delta: Option<f64>,
    pub ground_state: StageSummary,
    #[serde(default)]
    pub extraction: Option<StageSummary>,
    pub decision: LoopDecision,
    /// Why the iteration failed, when `decision` is `Failed`.
    #[serde(default)]
    pub failure: Option<FailureReason>,
    pub recorded_at: DateTime<Utc>,
}

/// One relaxation step closing an outer cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaxationRecord {
    /// The cycle this relaxation closes.
    pub cycle: u32,
    pub summary: StageSummary,
    #[serde(default)]
    pub max_displacement: Option<f64>,
    /// Whether the structure moved beyond the displacement tolerance.
    pub structure_changed: bool,
    /// Relaxed structure, when the job succeeded.
    #[serde(default)]
    pub structure: Option<Structure>,
    /// Parameters the next cycle starts from.
    #[serde(default)]
    pub carried_parameters: Option<HubbardParameterSet>,
    #[serde(default)]
    pub failure: Option<FailureReason>,
    pub recorded_at: DateTime<Utc>,
}

/// A journal line: either an iteration or a relaxation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Iteration(IterationRecord),
    Relaxation(RelaxationRecord),
}

impl JournalEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Iteration(_) => "iteration",
            Self::Relaxation(_) => "relaxation",
        }
    }

    pub fn cycle(&self) -> u32 {
        match self {
            Self::Iteration(record) => record.cycle,
            Self::Relaxation(record) => record.cycle,
        }
    }

    /// Iteration index; relaxations sort under index 0 of their kind.
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Iteration(record) => record.iteration,
            Self::Relaxation(_) => 0,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Self::Iteration(record) => record.recorded_at,
            Self::Relaxation(record) => record.recorded_at,
        }
    }
}

/// Inputs a run was started with; enough to replay its journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub structure: Structure,
    pub starting_parameters: HubbardParameterSet,
    /// Relaxation settings the run was started with. Replay folds the
    /// journal against these, whatever the current configuration says.
    #[serde(default)]
    pub relaxation: RelaxationConfig,
    pub created_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new(structure: Structure, starting_parameters: HubbardParameterSet) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            structure,
            starting_parameters,
            relaxation: RelaxationConfig::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_relaxation(mut self, relaxation: RelaxationConfig) -> Self {
        self.relaxation = relaxation;
        self
    }
}
