//! Local process job runner.
//!
//! Each job runs the configured command for its kind inside its own folder,
//! `<work_dir>/<job id>`, next to a `job.json` describing the job. The
//! command's stdout becomes the job output; files listed in the job's
//! `retrieve` are read back from the folder after a successful exit.
//!
//! Exit status: a wrapper may write a numeric status code to `job.status`
//! in the job folder, which takes precedence over the process exit code.
//! Either is mapped through [`FailureCode::from_code`].

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::extraction_settings::Namelists;
use crate::domain::models::{
    FailureCode, JobHandle, JobKind, JobPayload, JobSpec, JobStatus, RawOutput, RunnerConfig,
};
use crate::domain::ports::JobRunner;

/// Name of the job description written into each job folder.
pub const JOB_FILE: &str = "job.json";

/// Optional status file a wrapper can leave behind.
pub const STATUS_FILE: &str = "job.status";

#[derive(Serialize)]
struct JobFile<'a> {
    spec: &'a JobSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    namelists: Option<Namelists>,
}

pub struct LocalProcessRunner {
    config: RunnerConfig,
    statuses: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
}

impl LocalProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn command_for(&self, kind: JobKind) -> &[String] {
        match kind {
            JobKind::GroundState => &self.config.ground_state_command,
            JobKind::ParameterExtraction => &self.config.extraction_command,
            JobKind::Relaxation => &self.config.relaxation_command,
        }
    }

    /// Folder of a job.
    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        Path::new(&self.config.work_dir).join(job_id.to_string())
    }

    async fn write_job_file(&self, dir: &Path, spec: &JobSpec) -> DomainResult<()> {
        let namelists = match &spec.payload {
            JobPayload::ParameterExtraction { settings, .. } => Some(settings.normalized(&spec.solver)?),
            _ => None,
        };
        let document = serde_json::to_string_pretty(&JobFile { spec, namelists })?;
        tokio::fs::write(dir.join(JOB_FILE), document).await?;
        Ok(())
    }

    fn build_command(&self, spec: &JobSpec, dir: &Path) -> DomainResult<Command> {
        let argv = self.command_for(spec.kind());
        let (program, args) = argv.split_first().ok_or_else(|| {
            DomainError::RunnerMisconfigured(format!("no command configured for {} jobs", spec.kind()))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("HUBBARD_SCF_JOB_FILE", dir.join(JOB_FILE))
            .env("HUBBARD_SCF_JOB_LABEL", &spec.label)
            .env("HUBBARD_SCF_NUM_WORKERS", spec.resources.num_workers.to_string())
            .env("HUBBARD_SCF_MEMORY_MB", spec.resources.memory_mb.to_string());

        if let JobPayload::ParameterExtraction { settings, .. } = &spec.payload {
            cmd.args(&settings.cmdline);
        }
        Ok(cmd)
    }
}

/// Run a spawned job to completion and turn the result into a status.
async fn finish(mut cmd: Command, dir: PathBuf, walltime: Duration, retrieve: Vec<String>) -> JobStatus {
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to spawn job process");
            return JobStatus::Failed(FailureCode::SchedulerUnavailable);
        }
    };

    // Dropping the output future on timeout kills the child.
    let output = match tokio::time::timeout(walltime, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(dir = %dir.display(), error = %e, "Failed to wait for job process");
            return JobStatus::Failed(FailureCode::NodeFailure);
        }
        Err(_) => {
            warn!(dir = %dir.display(), walltime_secs = walltime.as_secs(), "Job exceeded walltime, killed");
            return JobStatus::Failed(FailureCode::WalltimeExceeded);
        }
    };

    if let Some(code) = read_status_file(&dir).await {
        if code != 0 {
            return JobStatus::Failed(FailureCode::from_code(code));
        }
    } else if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(dir = %dir.display(), status = ?output.status.code(), stderr = %stderr.trim(), "Job process failed");
        // Killed by a signal: no exit code.
        return JobStatus::Failed(output.status.code().map_or(FailureCode::NodeFailure, FailureCode::from_code));
    }

    let mut files = BTreeMap::new();
    for name in retrieve {
        match tokio::fs::read_to_string(dir.join(&name)).await {
            Ok(content) => {
                files.insert(name, content);
            }
            Err(e) => {
                warn!(dir = %dir.display(), file = %name, error = %e, "Retrieved file missing");
                return JobStatus::Failed(FailureCode::MissingOutput);
            }
        }
    }

    JobStatus::Succeeded(RawOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        files,
    })
}

async fn read_status_file(dir: &Path) -> Option<i32> {
    let content = tokio::fs::read_to_string(dir.join(STATUS_FILE)).await.ok()?;
    content.trim().parse().ok()
}

#[async_trait]
impl JobRunner for LocalProcessRunner {
    async fn submit(&self, spec: &JobSpec) -> DomainResult<JobHandle> {
        let dir = self.job_dir(spec.id);
        tokio::fs::create_dir_all(&dir).await?;
        self.write_job_file(&dir, spec).await?;
        let cmd = self.build_command(spec, &dir)?;

        self.statuses.write().await.insert(spec.id, JobStatus::Pending);

        let statuses = Arc::clone(&self.statuses);
        let job_id = spec.id;
        let walltime = Duration::from_secs(spec.resources.walltime_secs);
        let retrieve = spec.retrieve.clone();
        tokio::spawn(async move {
            let status = finish(cmd, dir, walltime, retrieve).await;
            statuses.write().await.insert(job_id, status);
        });

        debug!(job_id = %spec.id, label = %spec.label, "Job submitted");
        Ok(JobHandle::new(spec.id))
    }

    async fn poll(&self, handle: &JobHandle) -> DomainResult<JobStatus> {
        let unknown = || DomainError::UnknownJob(handle.job_id.to_string());
        let mut statuses = self.statuses.write().await;
        let terminal = statuses
            .get(&handle.job_id)
            .map(JobStatus::is_terminal)
            .ok_or_else(unknown)?;
        if !terminal {
            return Ok(JobStatus::Pending);
        }
        // Handed over once; the output is not kept around.
        statuses.remove(&handle.job_id).ok_or_else(unknown)
    }
}
