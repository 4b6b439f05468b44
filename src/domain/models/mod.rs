pub mod attempt;
pub mod config;
pub mod extraction_settings;
pub mod hubbard;
pub mod iteration;
pub mod job;
pub mod loop_state;
pub mod outcome;
pub mod structure;

pub use attempt::AttemptRecord;
pub use config::{
    AdjustmentConfig, Config, ConvergenceConfig, DatabaseConfig, DecompositionConfig, Granularity,
    HubbardConfig, LoggingConfig, PollingConfig, RelaxationConfig, RunnerConfig, StageConfig,
};
pub use extraction_settings::ExtractionSettings;
pub use hubbard::{required_keys, HubbardEntry, HubbardKey, HubbardParameterSet};
pub use iteration::{
    IterationRecord, JournalEntry, LoopDecision, RelaxationRecord, RunManifest, StageSummary,
};
pub use job::{
    ElectronicState, FailureCode, JobHandle, JobKind, JobPayload, JobSpec, JobStatus, RawOutput,
    ResourceRequest, SolverControls,
};
pub use loop_state::{LoopPhase, LoopSnapshot, LoopState, LoopTermination, NextAction};
pub use outcome::{FailureKind, FailureReason, JobOutcome};
pub use structure::{Site, Structure};
