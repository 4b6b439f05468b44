//! Job runner port - interface for the external job-execution runtime.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobHandle, JobSpec, JobStatus};

/// Executes opaque jobs on some backend (a scheduler, a local process, a mock).
///
/// `Err` from either method means the runner itself could not be reached or
/// did not understand the request. A job that ran and failed is reported as
/// `Ok(JobStatus::Failed(..))`.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Submit a job and return a handle for polling.
    async fn submit(&self, spec: &JobSpec) -> DomainResult<JobHandle>;

    /// Current status of a submitted job.
    ///
    /// A terminal status is returned once. The runner then forgets the job,
    /// and later polls of the same handle fail with `UnknownJob`.
    async fn poll(&self, handle: &JobHandle) -> DomainResult<JobStatus>;
}
