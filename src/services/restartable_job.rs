//! Restart-capable wrapper around a single runner job.
//!
//! A job is submitted, polled until it reaches a terminal status and decoded.
//! Failures are classified and, when recoverable, the job is resubmitted with
//! adjusted resources or solver controls until the attempt budget runs out.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AdjustmentConfig, AttemptRecord, FailureCode, FailureKind, FailureReason, JobOutcome, JobSpec,
    JobStatus, PollingConfig, RawOutput, StageConfig,
};
use crate::domain::ports::{JobRunner, ParseError};
use crate::services::failure_classifier::{
    adjust, classify, classify_parse_error, classify_runner_error,
};

/// Retry budget and adjustment rules for one stage.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub adjustment: AdjustmentConfig,
    pub polling: PollingConfig,
}

impl RestartPolicy {
    pub fn new(max_attempts: u32, adjustment: AdjustmentConfig, polling: PollingConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            adjustment,
            polling,
        }
    }

    pub fn for_stage(stage: &StageConfig, adjustment: &AdjustmentConfig, polling: &PollingConfig) -> Self {
        Self::new(stage.max_attempts, adjustment.clone(), polling.clone())
    }

    fn poll_backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.polling.initial_interval_ms.max(1));
        let max = Duration::from_millis(self.polling.max_interval_ms).max(initial);
        ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_max_interval(max)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Final outcome of a restartable job plus its attempt log.
#[derive(Debug, Clone)]
pub struct JobReport<T> {
    pub outcome: JobOutcome<T>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> JobReport<T> {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Terminal result of one submission.
enum Terminal {
    Succeeded(RawOutput),
    Failed(FailureCode),
}

/// Runs jobs through a [`JobRunner`] with classification and retry.
#[derive(Clone)]
pub struct RestartableJob {
    runner: Arc<dyn JobRunner>,
    policy: RestartPolicy,
}

impl RestartableJob {
    pub fn new(runner: Arc<dyn JobRunner>, policy: RestartPolicy) -> Self {
        Self { runner, policy }
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Run `spec` until it succeeds, fails fatally or exhausts its attempts.
    ///
    /// `decode` turns successful raw output into the caller's value. A decode
    /// error is classified like any other failure.
    #[instrument(skip_all, fields(label = %spec.label, kind = %spec.kind()))]
    pub async fn run<T, F>(&self, spec: JobSpec, decode: F) -> JobReport<T>
    where
        F: Fn(&RawOutput) -> Result<T, ParseError>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempts = Vec::new();
        let mut current = spec;
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            let started_at = Utc::now();
            debug!(attempt, job_id = %current.id, "submitting job");

            let (action, message) = match self.execute_once(&current).await {
                Ok(Terminal::Succeeded(output)) => match decode(&output) {
                    Ok(value) => {
                        attempts.push(AttemptRecord {
                            job_label: current.label.clone(),
                            attempt,
                            resources: current.resources.clone(),
                            solver: current.solver.clone(),
                            outcome: JobOutcome::Success(()),
                            started_at,
                            finished_at: Utc::now(),
                        });
                        if attempt > 1 {
                            info!(attempt, "job succeeded after retries");
                        }
                        return JobReport {
                            outcome: JobOutcome::Success(value),
                            attempts,
                        };
                    }
                    Err(err) => (classify_parse_error(&err), err.to_string()),
                },
                Ok(Terminal::Failed(code)) => (classify(code), format!("job failed with {code}")),
                Err(err) => (classify_runner_error(&err), format!("runner error: {err}")),
            };

            let reason = FailureReason::new(action.failure_kind(), message);
            attempts.push(AttemptRecord {
                job_label: current.label.clone(),
                attempt,
                resources: current.resources.clone(),
                solver: current.solver.clone(),
                outcome: if action.is_retryable() {
                    JobOutcome::RecoverableFailure(reason.clone())
                } else {
                    JobOutcome::FatalFailure(reason.clone())
                },
                started_at,
                finished_at: Utc::now(),
            });

            if !action.is_retryable() {
                warn!(attempt, reason = %reason, "job failed fatally");
                return JobReport {
                    outcome: JobOutcome::FatalFailure(reason),
                    attempts,
                };
            }

            if attempt < max_attempts {
                let (resources, solver) =
                    adjust(action, &current.resources, &current.solver, &self.policy.adjustment);
                info!(
                    attempt,
                    reason = %reason,
                    ?action,
                    workers = resources.num_workers,
                    memory_mb = resources.memory_mb,
                    walltime_secs = resources.walltime_secs,
                    "resubmitting job"
                );
                current = current.resubmission(resources, solver);
            }
            last_failure = Some(reason);
        }

        let reason = match last_failure {
            Some(last) => FailureReason::new(
                last.kind,
                format!("gave up after {max_attempts} attempts: {}", last.message),
            ),
            None => FailureReason::new(
                FailureKind::InternalConsistency,
                "job loop ended without an attempt",
            ),
        };
        warn!(attempts = max_attempts, reason = %reason, "attempt budget exhausted");
        JobReport {
            outcome: JobOutcome::FatalFailure(reason),
            attempts,
        }
    }

    /// Submit once and poll until the job is terminal.
    async fn execute_once(&self, spec: &JobSpec) -> DomainResult<Terminal> {
        let handle = self.runner.submit(spec).await?;
        let mut backoff = self.policy.poll_backoff();
        let cap = Duration::from_millis(self.policy.polling.max_interval_ms);

        loop {
            match self.runner.poll(&handle).await? {
                JobStatus::Pending => {
                    let wait = backoff.next_backoff().unwrap_or(cap);
                    sleep(wait).await;
                }
                JobStatus::Succeeded(output) => return Ok(Terminal::Succeeded(output)),
                JobStatus::Failed(code) => return Ok(Terminal::Failed(code)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runners::mock::{MockJobRunner, MockStep};
    use crate::domain::models::{HubbardParameterSet, JobPayload, Site, Structure};

    fn fast_policy(max_attempts: u32) -> RestartPolicy {
        RestartPolicy::new(
            max_attempts,
            AdjustmentConfig::default(),
            PollingConfig {
                initial_interval_ms: 1,
                max_interval_ms: 2,
            },
        )
    }

    fn spec(label: &str) -> JobSpec {
        let structure = Structure::new(
            [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]],
            vec![Site::new("Fe", [0.0; 3]).with_hubbard("3d")],
        )
        .unwrap();
        JobSpec::new(
            label,
            JobPayload::GroundState {
                structure,
                parameters: HubbardParameterSet::new(),
            },
        )
    }

    fn decode_stdout(output: &RawOutput) -> Result<String, ParseError> {
        if output.stdout == "garbage" {
            Err(ParseError::Invalid("parse error".to_string()))
        } else if output.stdout == "unconverged" {
            Err(ParseError::NotConverged("scf".to_string()))
        } else {
            Ok(output.stdout.clone())
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script("scf", vec![MockStep::succeed(RawOutput::from_stdout("ok"))])
            .await;
        let job = RestartableJob::new(runner.clone(), fast_policy(3));

        let report = job.run(spec("scf"), decode_stdout).await;
        assert_eq!(report.outcome, JobOutcome::Success("ok".to_string()));
        assert_eq!(report.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_polls_are_tolerated() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script(
                "scf",
                vec![MockStep::succeed(RawOutput::from_stdout("ok")).after_pending(5)],
            )
            .await;
        let job = RestartableJob::new(runner.clone(), fast_policy(1));

        let report = job.run(spec("scf"), decode_stdout).await;
        assert!(report.outcome.is_success());
        assert_eq!(runner.poll_count().await, 6);
    }

    #[tokio::test]
    async fn test_fatal_code_is_not_retried() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script("scf", vec![MockStep::fail(FailureCode::CodeFatal)])
            .await;
        let job = RestartableJob::new(runner.clone(), fast_policy(5));

        let report = job.run(spec("scf"), decode_stdout).await;
        let reason = report.outcome.reason().unwrap();
        assert!(matches!(report.outcome, JobOutcome::FatalFailure(_)));
        assert_eq!(reason.kind, FailureKind::CodeFatal);
        assert_eq!(report.attempt_count(), 1);
        assert_eq!(runner.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_fatal() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script("scf", vec![MockStep::succeed(RawOutput::from_stdout("garbage"))])
            .await;
        let job = RestartableJob::new(runner, fast_policy(5));

        let report = job.run(spec("scf"), decode_stdout).await;
        let reason = report.outcome.reason().unwrap();
        assert_eq!(reason.kind, FailureKind::MalformedOutput);
        assert!(reason.message.contains("parse error"));
        assert_eq!(report.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_non_convergence_adjusts_solver() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script(
                "scf",
                vec![
                    MockStep::succeed(RawOutput::from_stdout("unconverged")),
                    MockStep::succeed(RawOutput::from_stdout("ok")),
                ],
            )
            .await;
        let job = RestartableJob::new(runner.clone(), fast_policy(3));

        let report = job.run(spec("scf"), decode_stdout).await;
        assert!(report.outcome.is_success());
        assert_eq!(report.attempt_count(), 2);
        let submissions = runner.submissions().await;
        assert!(submissions[1].solver.conv_threshold > submissions[0].solver.conv_threshold);
        assert_eq!(
            report.attempts[0].outcome.reason().unwrap().kind,
            FailureKind::DomainNonConvergence
        );
    }

    #[tokio::test]
    async fn test_attempt_budget_is_never_exceeded() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script(
                "scf",
                vec![MockStep::fail(FailureCode::NodeFailure); 10],
            )
            .await;
        let job = RestartableJob::new(runner.clone(), fast_policy(4));

        let report = job.run(spec("scf"), decode_stdout).await;
        assert!(matches!(report.outcome, JobOutcome::FatalFailure(_)));
        assert_eq!(report.outcome.reason().unwrap().kind, FailureKind::TransientResource);
        assert_eq!(report.attempt_count(), 4);
        assert_eq!(runner.submissions().await.len(), 4);
    }

    #[tokio::test]
    async fn test_runner_errors_are_retried() {
        let runner = Arc::new(MockJobRunner::new());
        runner
            .script(
                "scf",
                vec![
                    MockStep::submit_error("scheduler offline"),
                    MockStep::succeed(RawOutput::from_stdout("ok")),
                ],
            )
            .await;
        let job = RestartableJob::new(runner, fast_policy(2));

        let report = job.run(spec("scf"), decode_stdout).await;
        assert!(report.outcome.is_success());
        assert_eq!(report.attempt_count(), 2);
        assert!(report.attempts[0]
            .outcome
            .reason()
            .unwrap()
            .message
            .contains("scheduler offline"));
    }
}
