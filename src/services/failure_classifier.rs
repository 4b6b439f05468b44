//! Failure classification for restartable jobs.
//!
//! Everything here is a pure function of its inputs, so each status code
//! can be tested without a runner.

use crate::domain::errors::DomainError;
use crate::domain::models::{
    AdjustmentConfig, FailureCode, FailureKind, ResourceRequest, SolverControls,
};
use crate::domain::ports::ParseError;

/// Which resource knob to turn before resubmitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAdjustment {
    /// Ask for fewer workers so the scheduler can place the job.
    ReduceWorkers,
    ExtendWalltime,
    /// More memory per worker: raise memory and spread fewer workers.
    IncreaseMemory,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetryAsIs,
    AdjustResources(ResourceAdjustment),
    AdjustSolver,
    Fatal(FailureKind),
}

impl RetryAction {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// The failure kind recorded for an attempt that ended this way.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RetryAsIs | Self::AdjustResources(_) => FailureKind::TransientResource,
            Self::AdjustSolver => FailureKind::DomainNonConvergence,
            Self::Fatal(kind) => *kind,
        }
    }
}

/// Map a runner status code to the next action.
pub fn classify(code: FailureCode) -> RetryAction {
    match code {
        FailureCode::AllocationTimeout => {
            RetryAction::AdjustResources(ResourceAdjustment::ReduceWorkers)
        }
        FailureCode::WalltimeExceeded => {
            RetryAction::AdjustResources(ResourceAdjustment::ExtendWalltime)
        }
        FailureCode::OutOfMemory => RetryAction::AdjustResources(ResourceAdjustment::IncreaseMemory),
        FailureCode::NodeFailure | FailureCode::SchedulerUnavailable => RetryAction::RetryAsIs,
        FailureCode::SolverNotConverged | FailureCode::ResponseNotConverged => {
            RetryAction::AdjustSolver
        }
        FailureCode::InvalidInput => RetryAction::Fatal(FailureKind::InvalidInput),
        FailureCode::MissingOutput => RetryAction::Fatal(FailureKind::MalformedOutput),
        FailureCode::CodeFatal => RetryAction::Fatal(FailureKind::CodeFatal),
        FailureCode::Unknown(_) => RetryAction::Fatal(FailureKind::UnknownStatus),
    }
}

/// Map a parse failure of successful output to the next action.
pub fn classify_parse_error(error: &ParseError) -> RetryAction {
    match error {
        ParseError::NotConverged(_) => RetryAction::AdjustSolver,
        ParseError::MissingField(_) | ParseError::Invalid(_) => {
            RetryAction::Fatal(FailureKind::MalformedOutput)
        }
    }
}

/// Map an error from `submit` or `poll` to the next action.
///
/// Errors that resubmitting cannot fix end the job; anything else is
/// treated as the runner being briefly unreachable.
pub fn classify_runner_error(error: &DomainError) -> RetryAction {
    match error {
        DomainError::InvalidInput(_) | DomainError::RunnerMisconfigured(_) => {
            RetryAction::Fatal(FailureKind::InvalidInput)
        }
        _ => RetryAction::RetryAsIs,
    }
}

/// Resources and solver controls for the next attempt.
pub fn adjust(
    action: RetryAction,
    resources: &ResourceRequest,
    solver: &SolverControls,
    factors: &AdjustmentConfig,
) -> (ResourceRequest, SolverControls) {
    let mut resources = resources.clone();
    let mut solver = solver.clone();

    match action {
        RetryAction::AdjustResources(ResourceAdjustment::ReduceWorkers) => {
            resources.num_workers = scale_workers(resources.num_workers, factors.worker_factor);
        }
        RetryAction::AdjustResources(ResourceAdjustment::ExtendWalltime) => {
            resources.walltime_secs = scale_up(resources.walltime_secs, factors.walltime_factor);
        }
        RetryAction::AdjustResources(ResourceAdjustment::IncreaseMemory) => {
            resources.memory_mb = scale_up(resources.memory_mb, factors.memory_factor);
            resources.num_workers = scale_workers(resources.num_workers, factors.worker_factor);
        }
        RetryAction::AdjustSolver => {
            solver.conv_threshold *= factors.threshold_factor;
            solver.max_inner_iterations = (f64::from(solver.max_inner_iterations)
                * factors.inner_iteration_factor)
                .ceil() as u32;
            solver.mixing_beta *= factors.mixing_factor;
        }
        RetryAction::RetryAsIs | RetryAction::Fatal(_) => {}
    }

    (resources, solver)
}

fn scale_workers(workers: u32, factor: f64) -> u32 {
    ((f64::from(workers) * factor).floor() as u32).max(1)
}

fn scale_up(value: u64, factor: f64) -> u64 {
    (value as f64 * factor).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_every_code() {
        use FailureCode::*;
        let cases = [
            (AllocationTimeout, RetryAction::AdjustResources(ResourceAdjustment::ReduceWorkers)),
            (WalltimeExceeded, RetryAction::AdjustResources(ResourceAdjustment::ExtendWalltime)),
            (OutOfMemory, RetryAction::AdjustResources(ResourceAdjustment::IncreaseMemory)),
            (NodeFailure, RetryAction::RetryAsIs),
            (SchedulerUnavailable, RetryAction::RetryAsIs),
            (SolverNotConverged, RetryAction::AdjustSolver),
            (ResponseNotConverged, RetryAction::AdjustSolver),
            (InvalidInput, RetryAction::Fatal(FailureKind::InvalidInput)),
            (MissingOutput, RetryAction::Fatal(FailureKind::MalformedOutput)),
            (CodeFatal, RetryAction::Fatal(FailureKind::CodeFatal)),
            (Unknown(255), RetryAction::Fatal(FailureKind::UnknownStatus)),
        ];
        for (code, expected) in cases {
            assert_eq!(classify(code), expected, "code {code}");
        }
    }

    #[test]
    fn test_failure_kinds_of_actions() {
        assert_eq!(
            classify(FailureCode::AllocationTimeout).failure_kind(),
            FailureKind::TransientResource
        );
        assert_eq!(
            classify(FailureCode::SolverNotConverged).failure_kind(),
            FailureKind::DomainNonConvergence
        );
        assert!(!classify(FailureCode::Unknown(7)).is_retryable());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            classify_parse_error(&ParseError::NotConverged("chi".into())),
            RetryAction::AdjustSolver
        );
        assert_eq!(
            classify_parse_error(&ParseError::Invalid("parse error".into())),
            RetryAction::Fatal(FailureKind::MalformedOutput)
        );
        assert_eq!(
            classify_parse_error(&ParseError::MissingField("hubbard".into())),
            RetryAction::Fatal(FailureKind::MalformedOutput)
        );
    }

    #[test]
    fn test_runner_errors() {
        assert_eq!(
            classify_runner_error(&DomainError::RunnerMisconfigured("no command".into())),
            RetryAction::Fatal(FailureKind::InvalidInput)
        );
        assert_eq!(
            classify_runner_error(&DomainError::InvalidInput("qpoint mesh".into())),
            RetryAction::Fatal(FailureKind::InvalidInput)
        );
        assert_eq!(
            classify_runner_error(&DomainError::Runner("connection refused".into())),
            RetryAction::RetryAsIs
        );
        assert_eq!(
            classify_runner_error(&DomainError::UnknownJob("lost".into())),
            RetryAction::RetryAsIs
        );
    }

    #[test]
    fn test_reduce_workers_floors_at_one() {
        let factors = AdjustmentConfig::default();
        let action = RetryAction::AdjustResources(ResourceAdjustment::ReduceWorkers);
        let mut resources = ResourceRequest {
            num_workers: 3,
            ..Default::default()
        };
        let solver = SolverControls::default();

        (resources, _) = adjust(action, &resources, &solver, &factors);
        assert_eq!(resources.num_workers, 1);
        (resources, _) = adjust(action, &resources, &solver, &factors);
        assert_eq!(resources.num_workers, 1);
    }

    #[test]
    fn test_out_of_memory_doubles_memory_and_halves_workers() {
        let (resources, solver) = adjust(
            RetryAction::AdjustResources(ResourceAdjustment::IncreaseMemory),
            &ResourceRequest::default(),
            &SolverControls::default(),
            &AdjustmentConfig::default(),
        );
        assert_eq!(resources.memory_mb, 8192);
        assert_eq!(resources.num_workers, 8);
        assert_eq!(solver, SolverControls::default());
    }

    #[test]
    fn test_walltime_extension() {
        let (resources, _) = adjust(
            RetryAction::AdjustResources(ResourceAdjustment::ExtendWalltime),
            &ResourceRequest::default(),
            &SolverControls::default(),
            &AdjustmentConfig::default(),
        );
        assert_eq!(resources.walltime_secs, 7200);
    }

    #[test]
    fn test_solver_adjustment() {
        let (resources, solver) = adjust(
            RetryAction::AdjustSolver,
            &ResourceRequest::default(),
            &SolverControls::default(),
            &AdjustmentConfig::default(),
        );
        assert_eq!(resources, ResourceRequest::default());
        assert!((solver.conv_threshold - 1e-7).abs() < 1e-20);
        assert_eq!(solver.max_inner_iterations, 200);
        assert!((solver.mixing_beta - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_retry_as_is_changes_nothing() {
        let (resources, solver) = adjust(
            RetryAction::RetryAsIs,
            &ResourceRequest::default(),
            &SolverControls::default(),
            &AdjustmentConfig::default(),
        );
        assert_eq!(resources, ResourceRequest::default());
        assert_eq!(solver, SolverControls::default());
    }
}
