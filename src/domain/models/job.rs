//! Job specifications and runner-facing status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::models::extraction_settings::ExtractionSettings;
use crate::domain::models::hubbard::HubbardParameterSet;
use crate::domain::models::structure::Structure;

/// Kind of external calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    GroundState,
    ParameterExtraction,
    Relaxation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroundState => "ground_state",
            Self::ParameterExtraction => "parameter_extraction",
            Self::Relaxation => "relaxation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute resources requested from the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceRequest {
    /// Parallel worker (MPI rank) count.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,

    /// Memory in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Wall-clock limit in seconds.
    #[serde(default = "default_walltime_secs")]
    pub walltime_secs: u64,
}

const fn default_num_workers() -> u32 {
    16
}

const fn default_memory_mb() -> u64 {
    4096
}

const fn default_walltime_secs() -> u64 {
    3600
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            memory_mb: default_memory_mb(),
            walltime_secs: default_walltime_secs(),
        }
    }
}

/// Inner-solver controls forwarded to the code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SolverControls {
    /// Convergence threshold of the inner solver.
    #[serde(default = "default_conv_threshold")]
    pub conv_threshold: f64,

    /// Cap on inner solver iterations.
    #[serde(default = "default_max_inner_iterations")]
    pub max_inner_iterations: u32,

    /// Density mixing factor.
    #[serde(default = "default_mixing_beta")]
    pub mixing_beta: f64,
}

const fn default_conv_threshold() -> f64 {
    1e-8
}

const fn default_max_inner_iterations() -> u32 {
    100
}

const fn default_mixing_beta() -> f64 {
    0.7
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            conv_threshold: default_conv_threshold(),
            max_inner_iterations: default_max_inner_iterations(),
            mixing_beta: default_mixing_beta(),
        }
    }
}

/// Handle to a converged electronic state left behind by a ground-state job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicState {
    /// Location of the saved state (a remote folder, a path, an opaque id).
    pub handle: String,

    /// Total energy in eV, when reported.
    #[serde(default)]
    pub total_energy: Option<f64>,

    /// Whether the electronic minimization converged.
    pub converged: bool,
}

/// Stage-specific job inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobPayload {
    GroundState {
        structure: Structure,
        parameters: HubbardParameterSet,
    },
    ParameterExtraction {
        structure: Structure,
        parent: ElectronicState,
        sites: Vec<usize>,
        settings: ExtractionSettings,
    },
    Relaxation {
        structure: Structure,
        parameters: HubbardParameterSet,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::GroundState { .. } => JobKind::GroundState,
            Self::ParameterExtraction { .. } => JobKind::ParameterExtraction,
            Self::Relaxation { .. } => JobKind::Relaxation,
        }
    }
}

/// Full description of one job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: Uuid,
    pub label: String,
    pub payload: JobPayload,
    pub resources: ResourceRequest,
    pub solver: SolverControls,
    /// Files the runner should retrieve after completion.
    #[serde(default)]
    pub retrieve: Vec<String>,
}

impl JobSpec {
    pub fn new(label: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            payload,
            resources: ResourceRequest::default(),
            solver: SolverControls::default(),
            retrieve: Vec::new(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_solver(mut self, solver: SolverControls) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_retrieve(mut self, files: Vec<String>) -> Self {
        self.retrieve = files;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Copy for a resubmission: fresh id, adjusted controls.
    pub fn resubmission(&self, resources: ResourceRequest, solver: SolverControls) -> Self {
        Self {
            id: Uuid::new_v4(),
            resources,
            solver,
            ..self.clone()
        }
    }
}

/// Reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            submitted_at: Utc::now(),
        }
    }
}

/// Unparsed output of a finished job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawOutput {
    pub stdout: String,
    /// Retrieved files by name.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl RawOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            files: BTreeMap::new(),
        }
    }
}

/// Status codes reported by the runner for failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The scheduler could not allocate resources in time.
    AllocationTimeout,
    WalltimeExceeded,
    OutOfMemory,
    /// A compute node died under the job.
    NodeFailure,
    SchedulerUnavailable,
    /// The electronic or inner solver did not converge.
    SolverNotConverged,
    /// The linear-response (chi) solver did not converge.
    ResponseNotConverged,
    InvalidInput,
    MissingOutput,
    CodeFatal,
    Unknown(i32),
}

impl FailureCode {
    /// Map a raw exit/status code to a failure code.
    pub fn from_code(code: i32) -> Self {
        match code {
            100 => Self::AllocationTimeout,
            110 => Self::WalltimeExceeded,
            120 => Self::OutOfMemory,
            130 => Self::NodeFailure,
            140 => Self::SchedulerUnavailable,
            300 => Self::SolverNotConverged,
            310 => Self::ResponseNotConverged,
            400 => Self::InvalidInput,
            410 => Self::MissingOutput,
            420 => Self::CodeFatal,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::AllocationTimeout => 100,
            Self::WalltimeExceeded => 110,
            Self::OutOfMemory => 120,
            Self::NodeFailure => 130,
            Self::SchedulerUnavailable => 140,
            Self::SolverNotConverged => 300,
            Self::ResponseNotConverged => 310,
            Self::InvalidInput => 400,
            Self::MissingOutput => 410,
            Self::CodeFatal => 420,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown status {code}"),
            other => write!(f, "{other:?} ({})", other.code()),
        }
    }
}

/// Runner-reported job status.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(RawOutput),
    Failed(FailureCode),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_code_round_trip_known_codes() {
        for code in [100, 110, 120, 130, 140, 300, 310, 400, 410, 420] {
            assert_eq!(FailureCode::from_code(code).code(), code);
            assert!(!matches!(FailureCode::from_code(code), FailureCode::Unknown(_)));
        }
    }

    #[test]
    fn test_unmapped_code_is_unknown() {
        assert_eq!(FailureCode::from_code(1), FailureCode::Unknown(1));
        assert_eq!(FailureCode::from_code(-9), FailureCode::Unknown(-9));
    }

    #[test]
    fn test_resubmission_gets_new_id() {
        let structure = Structure::new(
            [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]],
            vec![crate::domain::models::structure::Site::new("Fe", [0.0; 3])],
        )
        .unwrap();
        let spec = JobSpec::new(
            "scf",
            JobPayload::GroundState {
                structure,
                parameters: HubbardParameterSet::new(),
            },
        );
        let resources = ResourceRequest {
            num_workers: 8,
            ..spec.resources.clone()
        };
        let next = spec.resubmission(resources, spec.solver.clone());
        assert_ne!(next.id, spec.id);
        assert_eq!(next.label, spec.label);
        assert_eq!(next.resources.num_workers, 8);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Failed(FailureCode::CodeFatal).is_terminal());
    }
}
