//! `history` command: list runs or show one run's journal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::sqlite::open_journal;
use crate::cli::output::{fmt_optional, list_table, output, CommandOutput};
use crate::domain::models::{Config, JournalEntry, LoopPhase};
use crate::domain::ports::IterationJournal;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Run to show in detail; lists all runs when omitted
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sites: usize,
    pub parameters: usize,
    pub phase: Option<LoopPhase>,
    pub cycle: u32,
    pub iteration: u32,
}

#[derive(Debug, Serialize)]
pub struct RunListOutput {
    pub runs: Vec<RunSummary>,
    pub total: usize,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        if self.runs.is_empty() {
            return "No runs found.".to_string();
        }
        let mut table = list_table(&["run", "started", "sites", "params", "phase", "cycle", "iteration"]);
        for run in &self.runs {
            table.add_row(vec![
                run.run_id.to_string(),
                run.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                run.sites.to_string(),
                run.parameters.to_string(),
                run.phase.map_or_else(|| "-".to_string(), |p| p.to_string()),
                run.cycle.to_string(),
                run.iteration.to_string(),
            ]);
        }
        format!("{} run(s):\n{table}", self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct RunDetailOutput {
    pub run_id: Uuid,
    pub phase: Option<LoopPhase>,
    pub entries: Vec<JournalEntry>,
}

impl CommandOutput for RunDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Run: {}", self.run_id)];
        if let Some(phase) = self.phase {
            lines.push(format!("Phase: {phase}"));
        }
        if self.entries.is_empty() {
            lines.push("No journal entries.".to_string());
            return lines.join("\n");
        }

        let mut table = list_table(&["cycle", "step", "outcome", "attempts", "max delta", "energy"]);
        for entry in &self.entries {
            match entry {
                JournalEntry::Iteration(record) => {
                    let attempts = record.ground_state.attempts
                        + record.extraction.as_ref().map_or(0, |s| s.attempts);
                    table.add_row(vec![
                        record.cycle.to_string(),
                        format!("iteration {}", record.iteration),
                        record.decision.as_str().to_string(),
                        attempts.to_string(),
                        fmt_optional(record.max_delta, 6),
                        fmt_optional(record.ground_state.total_energy, 4),
                    ]);
                }
                JournalEntry::Relaxation(record) => {
                    let outcome = if record.failure.is_some() {
                        "failed"
                    } else if record.structure_changed {
                        "structure changed"
                    } else {
                        "structure unchanged"
                    };
                    table.add_row(vec![
                        record.cycle.to_string(),
                        "relaxation".to_string(),
                        outcome.to_string(),
                        record.summary.attempts.to_string(),
                        fmt_optional(record.max_displacement, 6),
                        fmt_optional(record.summary.total_energy, 4),
                    ]);
                }
            }
        }
        lines.push(table.to_string());

        let failure = self.entries.iter().rev().find_map(|entry| match entry {
            JournalEntry::Iteration(record) => record.failure.as_ref(),
            JournalEntry::Relaxation(record) => record.failure.as_ref(),
        });
        if let Some(reason) = failure {
            lines.push(format!("Failure: {reason}"));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: HistoryArgs, config: Config, json_mode: bool) -> Result<()> {
    let journal = open_journal(&config.database)
        .await
        .context("Failed to open the iteration journal")?;

    match args.run_id {
        Some(run_id) => {
            journal
                .manifest(run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Run not found: {run_id}"))?;
            let entries = journal.entries(run_id).await?;
            let phase = journal.snapshot(run_id).await?.map(|s| s.phase);
            output(&RunDetailOutput { run_id, phase, entries }, json_mode);
        }
        None => {
            let mut runs = Vec::new();
            for manifest in journal.runs().await? {
                let snapshot = journal.snapshot(manifest.run_id).await?;
                runs.push(RunSummary {
                    run_id: manifest.run_id,
                    created_at: manifest.created_at,
                    sites: manifest.structure.len(),
                    parameters: manifest.starting_parameters.len(),
                    phase: snapshot.as_ref().map(|s| s.phase),
                    cycle: snapshot.as_ref().map_or(0, |s| s.cycle),
                    iteration: snapshot.as_ref().map_or(0, |s| s.iteration),
                });
            }
            output(&RunListOutput { total: runs.len(), runs }, json_mode);
        }
    }
    Ok(())
}
