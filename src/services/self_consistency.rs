//! SelfConsistencyLoop - the outer Hubbard self-consistency cycle.
//!
//! Alternates ground-state and parameter-extraction stages until the
//! parameters stop changing, optionally relaxing the structure between
//! cycles. Every finished iteration or relaxation is appended to the
//! journal together with a snapshot before the in-memory state moves on,
//! so a crashed run resumes from its last recorded step.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    required_keys, Config, ExtractionSettings, FailureKind, FailureReason, HubbardKey,
    HubbardParameterSet, IterationRecord, JobOutcome, JournalEntry, LoopDecision, LoopPhase,
    LoopState, LoopTermination, NextAction, RelaxationConfig, RelaxationRecord, RunManifest,
    StageConfig, StageSummary, Structure,
};
use crate::domain::ports::{IterationJournal, JobRunner, OutputParser};
use crate::services::convergence::decide;
use crate::services::decomposition::{ExtractionRequest, ParallelDecomposition};
use crate::services::restartable_job::{RestartPolicy, RestartableJob};
use crate::services::stage_jobs::{
    decode_ground_state, ground_state_spec, relaxation_spec, starting_parameters,
};

/// How a run ended, with the structure it ended on.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub run_id: Uuid,
    pub termination: LoopTermination,
    pub structure: Structure,
    /// Relaxation cycles completed.
    pub cycles: u32,
}

/// Top-level orchestrator.
pub struct SelfConsistencyLoop {
    config: Config,
    ground_state: RestartableJob,
    relax: RestartableJob,
    decomposition: ParallelDecomposition,
    parser: Arc<dyn OutputParser>,
    journal: Arc<dyn IterationJournal>,
    settings: Arc<ExtractionSettings>,
}

impl SelfConsistencyLoop {
    pub fn new(
        config: Config,
        runner: Arc<dyn JobRunner>,
        parser: Arc<dyn OutputParser>,
        journal: Arc<dyn IterationJournal>,
        settings: ExtractionSettings,
    ) -> Self {
        let policy = |stage: &StageConfig| RestartPolicy::for_stage(stage, &config.adjustment, &config.polling);
        let ground_state = RestartableJob::new(runner.clone(), policy(&config.ground_state));
        let relax = RestartableJob::new(runner.clone(), policy(&config.relax));
        let decomposition = ParallelDecomposition::new(
            RestartableJob::new(runner, policy(&config.extraction)),
            parser.clone(),
            config.extraction.clone(),
            config.decomposition.clone(),
        );

        Self {
            config,
            ground_state,
            relax,
            decomposition,
            parser,
            journal,
            settings: Arc::new(settings),
        }
    }

    fn required_keys(&self, structure: &Structure) -> DomainResult<BTreeSet<HubbardKey>> {
        let keys = required_keys(structure, self.config.hubbard.cutoff());
        if keys.is_empty() {
            return Err(DomainError::InvalidInput(
                "structure has no sites with a Hubbard manifold".to_string(),
            ));
        }
        Ok(keys)
    }

    /// Start a new run.
    ///
    /// Invalid structures, settings and starting parameters are rejected
    /// before anything is submitted or journaled.
    pub async fn start(
        &self,
        structure: Structure,
        user_parameters: Option<HubbardParameterSet>,
    ) -> DomainResult<LoopReport> {
        structure.validate()?;
        self.settings.validate()?;
        let required = self.required_keys(&structure)?;
        let starting = starting_parameters(
            &required,
            user_parameters.as_ref(),
            self.config.hubbard.starting_value,
        )?;

        let manifest =
            RunManifest::new(structure, starting).with_relaxation(self.config.relaxation.clone());
        self.journal.begin_run(&manifest).await?;
        info!(
            run_id = %manifest.run_id,
            keys = required.len(),
            parameters = %manifest.starting_parameters,
            "starting self-consistent run"
        );

        let state = LoopState::start(&manifest)?;
        self.drive(state, &manifest.relaxation).await
    }

    /// Continue a run from its journal.
    pub async fn resume(&self, run_id: Uuid) -> DomainResult<LoopReport> {
        self.settings.validate()?;
        let manifest = self
            .journal
            .manifest(run_id)
            .await?
            .ok_or_else(|| DomainError::RunNotFound(run_id.to_string()))?;
        let entries = self.journal.entries(run_id).await?;
        let state = LoopState::replay(&manifest, &entries, &manifest.relaxation)?;
        if manifest.relaxation != self.config.relaxation {
            warn!(
                %run_id,
                "relaxation settings differ from the ones the run started with; keeping the run's"
            );
        }

        if let Some(snapshot) = self.journal.snapshot(run_id).await? {
            if (snapshot.phase, snapshot.cycle, snapshot.iteration)
                != (state.phase, state.cycle, state.iteration)
            {
                return Err(DomainError::InternalConsistency(format!(
                    "snapshot of run {run_id} is at {} (cycle {}, iteration {}) but its journal replays to {} (cycle {}, iteration {})",
                    snapshot.phase, snapshot.cycle, snapshot.iteration,
                    state.phase, state.cycle, state.iteration
                )));
            }
        }

        info!(
            %run_id,
            entries = entries.len(),
            phase = %state.phase,
            cycle = state.cycle,
            iteration = state.iteration,
            "resuming run"
        );
        self.drive(state, &manifest.relaxation).await
    }

    #[instrument(skip_all, fields(run_id = %state.run_id))]
    async fn drive(
        &self,
        mut state: LoopState,
        relaxation: &RelaxationConfig,
    ) -> DomainResult<LoopReport> {
        loop {
            match state.next_action() {
                NextAction::Stop(termination) => {
                    self.log_termination(&state, &termination, relaxation);
                    return Ok(LoopReport {
                        run_id: state.run_id,
                        termination,
                        structure: state.structure,
                        cycles: state.cycle,
                    });
                }
                NextAction::RunGroundState => {
                    let (record, abort) = self.run_iteration(&mut state).await?;
                    self.commit(&mut state, JournalEntry::Iteration(record), relaxation)
                        .await?;
                    if let Some(err) = abort {
                        error!(error = %err, "aborting run");
                        return Err(err);
                    }
                }
                NextAction::Relax => {
                    let record = self.run_relaxation(&state, relaxation).await?;
                    self.commit(&mut state, JournalEntry::Relaxation(record), relaxation)
                        .await?;
                }
            }
        }
    }

    /// Persist `entry` with the resulting snapshot, then adopt the new state.
    async fn commit(
        &self,
        state: &mut LoopState,
        entry: JournalEntry,
        relaxation: &RelaxationConfig,
    ) -> DomainResult<()> {
        let mut next = state.clone();
        next.apply(&entry, relaxation)?;
        self.journal
            .append(state.run_id, &entry, &next.snapshot())
            .await?;
        *state = next;
        Ok(())
    }

    /// One ground-state plus extraction round.
    ///
    /// The returned error, if any, aborts the run after the record is saved.
    async fn run_iteration(
        &self,
        state: &mut LoopState,
    ) -> DomainResult<(IterationRecord, Option<DomainError>)> {
        let (cycle, iteration) = (state.cycle, state.iteration);
        info!(cycle, iteration, parameters = %state.current, "starting iteration");

        let parser = self.parser.clone();
        let spec = ground_state_spec(
            cycle,
            iteration,
            &state.structure,
            &state.current,
            &self.config.ground_state,
        );
        let report = self
            .ground_state
            .run(spec, move |output| decode_ground_state(parser.as_ref(), output))
            .await;

        let ground_summary = StageSummary {
            outcome: report.outcome.status(),
            attempts: report.attempt_count(),
            total_energy: match &report.outcome {
                JobOutcome::Success(electronic) => electronic.total_energy,
                _ => None,
            },
            task_count: None,
        };
        let electronic = match report.outcome {
            JobOutcome::Success(electronic) => electronic,
            JobOutcome::RecoverableFailure(reason) | JobOutcome::FatalFailure(reason) => {
                warn!(cycle, iteration, reason = %reason, "ground-state stage failed");
                return Ok((
                    failed_record(state, ground_summary, None, reason),
                    None,
                ));
            }
        };

        state.enter(LoopPhase::RunningParameterExtraction)?;
        let request = ExtractionRequest {
            cycle,
            iteration,
            structure: Arc::new(state.structure.clone()),
            parent: electronic,
            required: self.required_keys(&state.structure)?,
            settings: self.settings.clone(),
        };

        let report = match self.decomposition.run(request).await {
            Ok(report) => report,
            Err(err) => {
                let kind = match err {
                    DomainError::InternalConsistency(_) => FailureKind::InternalConsistency,
                    _ => FailureKind::InvalidInput,
                };
                let extraction = StageSummary {
                    outcome: JobOutcome::FatalFailure(FailureReason::new(kind, err.to_string())),
                    attempts: 0,
                    total_energy: None,
                    task_count: None,
                };
                let reason = FailureReason::new(kind, err.to_string());
                let record = failed_record(state, ground_summary, Some(extraction), reason);
                let abort = (kind == FailureKind::InternalConsistency).then_some(err);
                return Ok((record, abort));
            }
        };

        let extraction_summary = StageSummary {
            outcome: report.outcome.status(),
            attempts: report.attempt_count(),
            total_energy: None,
            task_count: Some(report.tasks.len()),
        };
        let output = match report.outcome {
            JobOutcome::Success(set) => set,
            JobOutcome::RecoverableFailure(reason) | JobOutcome::FatalFailure(reason) => {
                warn!(cycle, iteration, reason = %reason, "parameter-extraction stage failed");
                return Ok((
                    failed_record(state, ground_summary, Some(extraction_summary), reason),
                    None,
                ));
            }
        };

        state.enter(LoopPhase::CheckingConvergence)?;
        let check = decide(&state.current, &output, iteration, &self.config.convergence);
        info!(
            cycle,
            iteration,
            max_delta = check.max_delta,
            tolerance = self.config.convergence.tolerance,
            decision = check.decision.as_str(),
            parameters = %output,
            "iteration finished"
        );

        Ok((
            IterationRecord {
                cycle,
                iteration,
                input: state.current.clone(),
                output: Some(output),
                max_delta: Some(check.max_delta),
                ground_state: ground_summary,
                extraction: Some(extraction_summary),
                decision: check.decision,
                failure: None,
                recorded_at: Utc::now(),
            },
            None,
        ))
    }

    /// Relax the structure with the converged parameters.
    async fn run_relaxation(
        &self,
        state: &LoopState,
        relaxation: &RelaxationConfig,
    ) -> DomainResult<RelaxationRecord> {
        let cycle = state.cycle;
        info!(cycle, "relaxing structure");

        let parser = self.parser.clone();
        let spec = relaxation_spec(cycle, &state.structure, &state.current, &self.config.relax);
        let report = self
            .relax
            .run(spec, move |output| parser.parse_structure(output))
            .await;
        let summary = StageSummary {
            outcome: report.outcome.status(),
            attempts: report.attempt_count(),
            total_energy: None,
            task_count: None,
        };

        let failed = |summary: StageSummary, reason: FailureReason| RelaxationRecord {
            cycle,
            summary,
            max_displacement: None,
            structure_changed: false,
            structure: None,
            carried_parameters: None,
            failure: Some(reason),
            recorded_at: Utc::now(),
        };

        let relaxed = match report.outcome {
            JobOutcome::Success(relaxed) => relaxed,
            JobOutcome::RecoverableFailure(reason) | JobOutcome::FatalFailure(reason) => {
                warn!(cycle, reason = %reason, "relaxation failed");
                return Ok(failed(summary, reason));
            }
        };

        let adopted = match state.structure.relaxed_to(&relaxed) {
            Ok(adopted) => adopted,
            Err(err) => {
                let reason = FailureReason::new(FailureKind::MalformedOutput, err.to_string());
                warn!(cycle, reason = %reason, "relaxed structure does not match the input");
                return Ok(failed(summary, reason));
            }
        };
        let displacement = state.structure.max_displacement(&adopted)?;
        let changed = displacement > relaxation.displacement_tolerance;

        let carried = if changed {
            let keys = self.required_keys(&adopted)?;
            Some(
                state
                    .current
                    .carried_over(&keys, self.config.hubbard.starting_value),
            )
        } else {
            None
        };
        info!(
            cycle,
            max_displacement = displacement,
            tolerance = relaxation.displacement_tolerance,
            structure_changed = changed,
            "relaxation finished"
        );

        Ok(RelaxationRecord {
            cycle,
            summary,
            max_displacement: Some(displacement),
            structure_changed: changed,
            structure: changed.then_some(adopted),
            carried_parameters: carried,
            failure: None,
            recorded_at: Utc::now(),
        })
    }

    fn log_termination(
        &self,
        state: &LoopState,
        termination: &LoopTermination,
        relaxation: &RelaxationConfig,
    ) {
        match termination {
            LoopTermination::Converged {
                parameters,
                cycle,
                iterations,
                ..
            } => {
                if state.last_relaxation_changed && relaxation.enabled {
                    warn!(
                        cycles = cycle,
                        "relaxation budget exhausted while the structure was still changing"
                    );
                }
                info!(cycle, iterations, parameters = %parameters, "run converged");
            }
            LoopTermination::MaxIterationsExceeded {
                iterations,
                max_delta,
                ..
            } => {
                warn!(iterations, max_delta, "run did not converge within the iteration budget");
            }
            LoopTermination::Failed {
                reason,
                cycle,
                iteration,
            } => {
                warn!(cycle, iteration, reason = %reason, "run failed");
            }
        }
    }
}

fn failed_record(
    state: &LoopState,
    ground_state: StageSummary,
    extraction: Option<StageSummary>,
    reason: FailureReason,
) -> IterationRecord {
    IterationRecord {
        cycle: state.cycle,
        iteration: state.iteration,
        input: state.current.clone(),
        output: None,
        max_delta: None,
        ground_state,
        extraction,
        decision: LoopDecision::Failed,
        failure: Some(reason),
        recorded_at: Utc::now(),
    }
}
