//! Submission rate limiting for any job runner.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobHandle, JobSpec, JobStatus};
use crate::domain::ports::JobRunner;

/// Wraps a runner so that submissions respect a per-second quota.
/// Polls pass through unthrottled.
pub struct ThrottledRunner {
    inner: Arc<dyn JobRunner>,
    limiter: DefaultDirectRateLimiter,
}

impl ThrottledRunner {
    pub fn new(inner: Arc<dyn JobRunner>, per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            inner,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wrap `inner` when `per_second` is non-zero, otherwise return it unchanged.
    pub fn maybe_wrap(inner: Arc<dyn JobRunner>, per_second: u32, burst: u32) -> Arc<dyn JobRunner> {
        match NonZeroU32::new(per_second) {
            Some(rate) => {
                let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
                Arc::new(Self::new(inner, rate, burst))
            }
            None => inner,
        }
    }
}

#[async_trait]
impl JobRunner for ThrottledRunner {
    async fn submit(&self, spec: &JobSpec) -> DomainResult<JobHandle> {
        self.limiter.until_ready().await;
        self.inner.submit(spec).await
    }

    async fn poll(&self, handle: &JobHandle) -> DomainResult<JobStatus> {
        self.inner.poll(handle).await
    }
}
