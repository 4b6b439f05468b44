//! Parallel decomposition of parameter extraction into per-site tasks.
//!
//! One extraction request is split into independent [`SiteTask`]s, each of
//! which runs as its own restartable job. Tasks are admitted through a
//! semaphore, all of them are awaited, and their partial parameter sets are
//! merged by key.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttemptRecord, DecompositionConfig, ElectronicState, ExtractionSettings,
    FailureReason, Granularity, HubbardKey, HubbardParameterSet, JobOutcome, StageConfig,
    Structure,
};
use crate::domain::ports::OutputParser;
use crate::services::restartable_job::{JobReport, RestartableJob};
use crate::services::stage_jobs::{extraction_label, extraction_spec};

/// One unit of parallel extraction work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTask {
    pub ordinal: usize,
    /// Sites computed by this task, ascending.
    pub sites: Vec<usize>,
    /// Keys this task is responsible for.
    pub keys: BTreeSet<HubbardKey>,
}

impl SiteTask {
    pub fn lowest_site(&self) -> usize {
        self.sites.first().copied().unwrap_or(usize::MAX)
    }
}

/// Split the required keys into tasks.
///
/// On-site keys belong to the task holding their site; inter-site keys to
/// the task holding `site_i`. A key whose owner site is in no task is an
/// internal consistency error.
pub fn partition(
    structure: &Structure,
    required: &BTreeSet<HubbardKey>,
    granularity: Granularity,
) -> DomainResult<Vec<SiteTask>> {
    let units: Vec<Vec<usize>> = match granularity {
        Granularity::PerSite => structure.hubbard_sites().map(|(i, _)| vec![i]).collect(),
        Granularity::PerGroup => structure.equivalence_groups(),
    };

    let mut tasks: Vec<SiteTask> = units
        .into_iter()
        .enumerate()
        .map(|(ordinal, sites)| SiteTask {
            ordinal,
            sites,
            keys: BTreeSet::new(),
        })
        .collect();

    for key in required {
        let owner = key.owner_site();
        let task = tasks
            .iter_mut()
            .find(|t| t.sites.contains(&owner))
            .ok_or_else(|| {
                DomainError::InternalConsistency(format!(
                    "key {key} belongs to site {owner}, which no decomposition task covers"
                ))
            })?;
        task.keys.insert(key.clone());
    }

    tasks.retain(|t| !t.keys.is_empty());
    for (ordinal, task) in tasks.iter_mut().enumerate() {
        task.ordinal = ordinal;
    }

    verify_partition(required, &tasks)?;
    Ok(tasks)
}

/// Check that the tasks cover `required` exactly and are pairwise disjoint.
pub fn verify_partition(required: &BTreeSet<HubbardKey>, tasks: &[SiteTask]) -> DomainResult<()> {
    let mut seen = BTreeSet::new();
    for task in tasks {
        for key in &task.keys {
            if !seen.insert(key.clone()) {
                return Err(DomainError::InternalConsistency(format!(
                    "key {key} assigned to more than one decomposition task"
                )));
            }
        }
    }
    if &seen != required {
        let missing: Vec<String> = required.difference(&seen).map(ToString::to_string).collect();
        let extra: Vec<String> = seen.difference(required).map(ToString::to_string).collect();
        return Err(DomainError::InternalConsistency(format!(
            "decomposition does not cover the required keys (missing: [{}], extra: [{}])",
            missing.join(", "),
            extra.join(", ")
        )));
    }
    Ok(())
}

/// Everything one extraction stage needs.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub cycle: u32,
    pub iteration: u32,
    pub structure: Arc<Structure>,
    pub parent: ElectronicState,
    pub required: BTreeSet<HubbardKey>,
    pub settings: Arc<ExtractionSettings>,
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: SiteTask,
    pub outcome: JobOutcome<()>,
    pub attempts: Vec<AttemptRecord>,
}

/// Merged outcome of a decomposition plus per-task reports.
#[derive(Debug, Clone)]
pub struct DecompositionReport {
    pub outcome: JobOutcome<HubbardParameterSet>,
    pub tasks: Vec<TaskReport>,
}

impl DecompositionReport {
    pub fn attempt_count(&self) -> u32 {
        self.tasks.iter().map(|t| t.attempts.len() as u32).sum()
    }
}

/// Fan-out/fan-in executor for parameter extraction.
#[derive(Clone)]
pub struct ParallelDecomposition {
    job: RestartableJob,
    parser: Arc<dyn OutputParser>,
    stage: StageConfig,
    config: DecompositionConfig,
}

impl ParallelDecomposition {
    pub fn new(
        job: RestartableJob,
        parser: Arc<dyn OutputParser>,
        stage: StageConfig,
        config: DecompositionConfig,
    ) -> Self {
        Self {
            job,
            parser,
            stage,
            config,
        }
    }

    /// Run every task of `request` and merge the results.
    ///
    /// Returns `Err` only for internal consistency violations. Sub-job
    /// failures come back as a fatal outcome carrying the reason of the
    /// failed task with the lowest site index.
    #[instrument(skip_all, fields(cycle = request.cycle, iteration = request.iteration))]
    pub async fn run(&self, request: ExtractionRequest) -> DomainResult<DecompositionReport> {
        let tasks = partition(&request.structure, &request.required, self.config.granularity)?;
        info!(
            tasks = tasks.len(),
            keys = request.required.len(),
            granularity = ?self.config.granularity,
            "starting parameter extraction"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in &tasks {
            let spec = extraction_spec(
                extraction_label(request.cycle, request.iteration, task.ordinal),
                &request.structure,
                &request.parent,
                &task.sites,
                &request.settings,
                &self.stage,
            )?;

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DomainError::InternalConsistency("semaphore closed".to_string()))?;

            let job = self.job.clone();
            let parser = self.parser.clone();
            debug!(task = task.ordinal, sites = ?task.sites, "spawning extraction task");

            let handle = tokio::spawn(async move {
                let _permit = permit;
                job.run(spec, move |output| parser.parse_hubbard(output)).await
            });
            handles.push(handle);
        }

        // Fan-in barrier: every task is awaited, failed or not.
        let joined = join_all(handles).await;
        let mut results: Vec<JobReport<HubbardParameterSet>> = Vec::with_capacity(joined.len());
        for (task, report) in tasks.iter().zip(joined) {
            let report = report.map_err(|e| {
                DomainError::InternalConsistency(format!(
                    "extraction task {} did not complete: {e}",
                    task.ordinal
                ))
            })?;
            results.push(report);
        }

        self.fan_in(tasks, results)
    }

    fn fan_in(
        &self,
        tasks: Vec<SiteTask>,
        results: Vec<JobReport<HubbardParameterSet>>,
    ) -> DomainResult<DecompositionReport> {
        let mut reports = Vec::with_capacity(tasks.len());
        let mut parts = Vec::with_capacity(tasks.len());
        let mut first_failure: Option<(usize, FailureReason)> = None;

        for (task, result) in tasks.into_iter().zip(results) {
            let outcome = result.outcome.status();
            match result.outcome {
                JobOutcome::Success(set) => {
                    let produced = set.keys();
                    if produced != task.keys {
                        error!(task = task.ordinal, "extraction task returned the wrong key set");
                        return Err(DomainError::InternalConsistency(format!(
                            "task {} (sites {:?}) returned keys {:?}, expected {:?}",
                            task.ordinal,
                            task.sites,
                            produced.iter().map(ToString::to_string).collect::<Vec<_>>(),
                            task.keys.iter().map(ToString::to_string).collect::<Vec<_>>()
                        )));
                    }
                    parts.push(set);
                }
                JobOutcome::RecoverableFailure(reason) | JobOutcome::FatalFailure(reason) => {
                    warn!(task = task.ordinal, sites = ?task.sites, reason = %reason, "extraction task failed");
                    let site = task.lowest_site();
                    if first_failure.as_ref().map_or(true, |(lowest, _)| site < *lowest) {
                        first_failure = Some((site, reason));
                    }
                }
            }
            reports.push(TaskReport {
                task,
                outcome,
                attempts: result.attempts,
            });
        }

        if let Some((site, reason)) = first_failure {
            let failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
            warn!(failed, lowest_site = site, "parameter extraction failed");
            return Ok(DecompositionReport {
                outcome: JobOutcome::FatalFailure(reason),
                tasks: reports,
            });
        }

        let merged = HubbardParameterSet::merge_disjoint(parts)?;
        info!(keys = merged.len(), "parameter extraction merged");
        Ok(DecompositionReport {
            outcome: JobOutcome::Success(merged),
            tasks: reports,
        })
    }
}
