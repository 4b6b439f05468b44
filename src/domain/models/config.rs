use serde::{Deserialize, Serialize};

use crate::domain::models::job::{ResourceRequest, SolverControls};

/// Main configuration structure for hubbard-scf
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Outer-loop convergence criteria
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Structural relaxation between self-consistency cycles
    #[serde(default)]
    pub relaxation: RelaxationConfig,

    /// Splitting of parameter extraction into parallel tasks
    #[serde(default)]
    pub decomposition: DecompositionConfig,

    /// Hubbard key derivation and starting values
    #[serde(default)]
    pub hubbard: HubbardConfig,

    /// Ground-state stage jobs
    #[serde(default)]
    pub ground_state: StageConfig,

    /// Parameter-extraction stage jobs
    #[serde(default)]
    pub extraction: StageConfig,

    /// Relaxation stage jobs
    #[serde(default)]
    pub relax: StageConfig,

    /// How failed jobs are adjusted before resubmission
    #[serde(default)]
    pub adjustment: AdjustmentConfig,

    /// Job status polling
    #[serde(default)]
    pub polling: PollingConfig,

    /// Local job runner
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Convergence criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// Largest parameter change (eV) still counted as converged, exclusive
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Iteration budget per relaxation cycle
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

const fn default_tolerance() -> f64 {
    0.01
}

const fn default_max_iterations() -> u32 {
    10
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Relaxation cycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelaxationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of relaxations in one run
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    /// Displacement (angstrom) above which the structure counts as changed
    #[serde(default = "default_displacement_tolerance")]
    pub displacement_tolerance: f64,
}

const fn default_max_cycles() -> u32 {
    3
}

const fn default_displacement_tolerance() -> f64 {
    1e-3
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cycles: default_max_cycles(),
            displacement_tolerance: default_displacement_tolerance(),
        }
    }
}

/// Unit of work for parallel parameter extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One task per Hubbard site
    #[default]
    PerSite,
    /// One task per group of symmetry-equivalent sites
    PerGroup,
}

/// Decomposition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DecompositionConfig {
    #[serde(default)]
    pub granularity: Granularity,

    /// Maximum number of extraction tasks running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

const fn default_max_concurrency() -> usize {
    4
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Hubbard key settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HubbardConfig {
    /// Value (eV) given to every key without a user-supplied start
    #[serde(default)]
    pub starting_value: f64,

    /// Whether to derive inter-site V keys
    #[serde(default)]
    pub include_intersite: bool,

    /// Pair distance (angstrom) below which a V key is derived
    #[serde(default = "default_intersite_cutoff")]
    pub intersite_cutoff: f64,
}

const fn default_intersite_cutoff() -> f64 {
    3.0
}

impl HubbardConfig {
    pub fn cutoff(&self) -> Option<f64> {
        self.include_intersite.then_some(self.intersite_cutoff)
    }
}

impl Default for HubbardConfig {
    fn default() -> Self {
        Self {
            starting_value: 0.0,
            include_intersite: false,
            intersite_cutoff: default_intersite_cutoff(),
        }
    }
}

/// Per-stage job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StageConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub resources: ResourceRequest,

    #[serde(default)]
    pub solver: SolverControls,
}

const fn default_max_attempts() -> u32 {
    5
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            resources: ResourceRequest::default(),
            solver: SolverControls::default(),
        }
    }
}

/// Factors applied to a job when it is resubmitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdjustmentConfig {
    /// Multiplier on worker count (between 0 and 1)
    #[serde(default = "default_worker_factor")]
    pub worker_factor: f64,

    #[serde(default = "default_memory_factor")]
    pub memory_factor: f64,

    #[serde(default = "default_walltime_factor")]
    pub walltime_factor: f64,

    /// Multiplier loosening the solver convergence threshold
    #[serde(default = "default_threshold_factor")]
    pub threshold_factor: f64,

    #[serde(default = "default_inner_iteration_factor")]
    pub inner_iteration_factor: f64,

    /// Multiplier damping the mixing factor
    #[serde(default = "default_mixing_factor")]
    pub mixing_factor: f64,
}

const fn default_worker_factor() -> f64 {
    0.5
}

const fn default_memory_factor() -> f64 {
    2.0
}

const fn default_walltime_factor() -> f64 {
    2.0
}

const fn default_threshold_factor() -> f64 {
    10.0
}

const fn default_inner_iteration_factor() -> f64 {
    2.0
}

const fn default_mixing_factor() -> f64 {
    0.5
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        Self {
            worker_factor: default_worker_factor(),
            memory_factor: default_memory_factor(),
            walltime_factor: default_walltime_factor(),
            threshold_factor: default_threshold_factor(),
            inner_iteration_factor: default_inner_iteration_factor(),
            mixing_factor: default_mixing_factor(),
        }
    }
}

/// Job status polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    /// First delay between polls in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Cap on the delay between polls in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

const fn default_initial_interval_ms() -> u64 {
    1000
}

const fn default_max_interval_ms() -> u64 {
    60_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

/// Local process runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Directory under which each job gets its own folder
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Command (argv) running a ground-state job
    #[serde(default)]
    pub ground_state_command: Vec<String>,

    /// Command (argv) running a parameter-extraction job
    #[serde(default)]
    pub extraction_command: Vec<String>,

    /// Command (argv) running a relaxation job
    #[serde(default)]
    pub relaxation_command: Vec<String>,

    /// Submission rate limit; 0 disables throttling
    #[serde(default)]
    pub submissions_per_second: u32,

    /// Burst size for the submission limiter
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

fn default_work_dir() -> String {
    ".hubbard-scf/jobs".to_string()
}

const fn default_burst_size() -> u32 {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            ground_state_command: vec![],
            extraction_command: vec![],
            relaxation_command: vec![],
            submissions_per_second: 0,
            burst_size: default_burst_size(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".hubbard-scf/journal.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
