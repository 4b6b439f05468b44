//! Mock job runner for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FailureCode, JobHandle, JobSpec, JobStatus, RawOutput};
use crate::domain::ports::JobRunner;

/// How a scripted job ends.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResult {
    Succeed(RawOutput),
    Fail(FailureCode),
    /// `submit` itself returns a runner error.
    SubmitError(String),
}

/// One scripted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct MockStep {
    /// Polls answered with `Pending` before the result.
    pub pending_polls: u32,
    pub result: MockResult,
}

impl MockStep {
    pub fn succeed(output: RawOutput) -> Self {
        Self {
            pending_polls: 0,
            result: MockResult::Succeed(output),
        }
    }

    /// Success whose stdout is the given JSON document.
    pub fn succeed_json(value: &serde_json::Value) -> Self {
        Self::succeed(RawOutput::from_stdout(value.to_string()))
    }

    pub fn fail(code: FailureCode) -> Self {
        Self {
            pending_polls: 0,
            result: MockResult::Fail(code),
        }
    }

    pub fn submit_error(message: impl Into<String>) -> Self {
        Self {
            pending_polls: 0,
            result: MockResult::SubmitError(message.into()),
        }
    }

    pub fn after_pending(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }
}

/// Produces a step for a submission that has no scripted step.
pub type Responder = Arc<dyn Fn(&JobSpec) -> MockStep + Send + Sync>;

struct MockJob {
    remaining_pending: u32,
    status: JobStatus,
}

/// Scripted runner.
///
/// Steps scripted for a label are consumed in order, one per submission of
/// a spec with that label. Labels without script fall back to the
/// responder; with neither, `submit` fails.
pub struct MockJobRunner {
    scripts: Arc<RwLock<HashMap<String, VecDeque<MockStep>>>>,
    responder: Option<Responder>,
    jobs: Arc<RwLock<HashMap<Uuid, MockJob>>>,
    submissions: Arc<RwLock<Vec<JobSpec>>>,
    polls: Arc<RwLock<u64>>,
}

impl MockJobRunner {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(HashMap::new())),
            responder: None,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            submissions: Arc::new(RwLock::new(Vec::new())),
            polls: Arc::new(RwLock::new(0)),
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&JobSpec) -> MockStep + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::new()
        }
    }

    /// Queue steps for submissions labelled `label`.
    pub async fn script(&self, label: impl Into<String>, steps: Vec<MockStep>) {
        let mut scripts = self.scripts.write().await;
        scripts.entry(label.into()).or_default().extend(steps);
    }

    /// Every spec submitted so far, in order.
    pub async fn submissions(&self) -> Vec<JobSpec> {
        self.submissions.read().await.clone()
    }

    pub async fn poll_count(&self) -> u64 {
        *self.polls.read().await
    }

    async fn next_step(&self, spec: &JobSpec) -> Option<MockStep> {
        let mut scripts = self.scripts.write().await;
        if let Some(step) = scripts.get_mut(&spec.label).and_then(VecDeque::pop_front) {
            return Some(step);
        }
        drop(scripts);
        self.responder.as_ref().map(|responder| responder(spec))
    }
}

impl Default for MockJobRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn submit(&self, spec: &JobSpec) -> DomainResult<JobHandle> {
        self.submissions.write().await.push(spec.clone());

        let step = self.next_step(spec).await.ok_or_else(|| {
            DomainError::Runner(format!("no scripted response for job '{}'", spec.label))
        })?;

        let status = match step.result {
            MockResult::Succeed(output) => JobStatus::Succeeded(output),
            MockResult::Fail(code) => JobStatus::Failed(code),
            MockResult::SubmitError(message) => return Err(DomainError::Runner(message)),
        };

        let handle = JobHandle::new(spec.id);
        self.jobs.write().await.insert(
            spec.id,
            MockJob {
                remaining_pending: step.pending_polls,
                status,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> DomainResult<JobStatus> {
        *self.polls.write().await += 1;

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&handle.job_id)
            .ok_or_else(|| DomainError::UnknownJob(handle.job_id.to_string()))?;

        if job.remaining_pending > 0 {
            job.remaining_pending -= 1;
            return Ok(JobStatus::Pending);
        }
        jobs.remove(&handle.job_id)
            .map(|job| job.status)
            .ok_or_else(|| DomainError::UnknownJob(handle.job_id.to_string()))
    }
}
