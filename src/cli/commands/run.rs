//! `run` command: start or resume a self-consistent run.

use anyhow::{Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::parsers::JsonOutputParser;
use crate::adapters::runners::{LocalProcessRunner, ThrottledRunner};
use crate::adapters::sqlite::open_journal;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{
    Config, ExtractionSettings, HubbardParameterSet, LoopTermination, Structure,
};
use crate::domain::ports::JobRunner;
use crate::services::self_consistency::{LoopReport, SelfConsistencyLoop};

#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("source").required(true).args(["structure", "resume"]))]
pub struct RunArgs {
    /// Structure file (JSON or YAML)
    #[arg(short, long)]
    pub structure: Option<PathBuf>,

    /// Starting Hubbard parameters (JSON or YAML list of entries)
    #[arg(short, long, requires = "structure")]
    pub parameters: Option<PathBuf>,

    /// Linear-response settings for the extraction stage (JSON or YAML)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Resume a previously started run
    #[arg(short, long)]
    pub resume: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub cycles: u32,
    pub termination: LoopTermination,
}

impl From<&LoopReport> for RunOutput {
    fn from(report: &LoopReport) -> Self {
        Self {
            run_id: report.run_id,
            cycles: report.cycles,
            termination: report.termination.clone(),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Run: {}", self.run_id)];
        match &self.termination {
            LoopTermination::Converged {
                parameters,
                iterations,
                max_delta,
                ..
            } => {
                lines.push(format!(
                    "Converged after {iterations} iteration(s) in {} relaxation cycle(s)",
                    self.cycles
                ));
                if let Some(delta) = max_delta {
                    lines.push(format!("Last change: {delta:.6} eV"));
                }
                lines.push(parameter_table(parameters));
            }
            LoopTermination::MaxIterationsExceeded {
                parameters,
                iterations,
                max_delta,
                ..
            } => {
                lines.push(format!(
                    "Not converged: iteration budget of {iterations} exhausted (last change {max_delta:.6} eV)"
                ));
                lines.push(parameter_table(parameters));
            }
            LoopTermination::Failed {
                reason,
                cycle,
                iteration,
            } => {
                lines.push(format!(
                    "Failed at cycle {cycle}, iteration {iteration}: {reason}"
                ));
            }
        }
        lines.join("\n")
    }
}

fn parameter_table(parameters: &HubbardParameterSet) -> String {
    let mut table = list_table(&["parameter", "value (eV)"]);
    for (key, value) in parameters.iter() {
        table.add_row(vec![key.to_string(), format!("{value:.4}")]);
    }
    table.to_string()
}

/// Read a JSON or YAML document, chosen by file extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let settings: ExtractionSettings = match &args.settings {
        Some(path) => read_document(path)?,
        None => ExtractionSettings::default(),
    };

    let journal = open_journal(&config.database)
        .await
        .context("Failed to open the iteration journal")?;

    let runner: Arc<dyn JobRunner> = ThrottledRunner::maybe_wrap(
        Arc::new(LocalProcessRunner::new(config.runner.clone())),
        config.runner.submissions_per_second,
        config.runner.burst_size,
    );

    let scf = SelfConsistencyLoop::new(
        config,
        runner,
        Arc::new(JsonOutputParser::new()),
        Arc::new(journal),
        settings,
    );

    let report = match (args.resume, args.structure) {
        (Some(run_id), _) => scf
            .resume(run_id)
            .await
            .with_context(|| format!("Failed to resume run {run_id}"))?,
        (None, Some(path)) => {
            let structure: Structure = read_document(&path)?;
            let parameters: Option<HubbardParameterSet> =
                args.parameters.as_deref().map(read_document).transpose()?;
            scf.start(structure, parameters)
                .await
                .context("Self-consistent run aborted")?
        }
        (None, None) => anyhow::bail!("either --structure or --resume is required"),
    };

    output(&RunOutput::from(&report), json_mode);
    Ok(())
}
