//! Service layer: restart handling, decomposition and the outer loop.

pub mod convergence;
pub mod decomposition;
pub mod failure_classifier;
pub mod restartable_job;
pub mod self_consistency;
pub mod stage_jobs;

pub use convergence::{decide, ConvergenceCheck};
pub use decomposition::{
    partition, verify_partition, DecompositionReport, ExtractionRequest, ParallelDecomposition,
    SiteTask, TaskReport,
};
pub use failure_classifier::{
    adjust, classify, classify_parse_error, classify_runner_error, ResourceAdjustment, RetryAction,
};
pub use restartable_job::{JobReport, RestartPolicy, RestartableJob};
pub use self_consistency::{LoopReport, SelfConsistencyLoop};
