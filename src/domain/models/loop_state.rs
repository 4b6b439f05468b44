//! Self-consistency loop state machine.
//!
//! [`LoopState::apply`] is the only way journal entries move the state
//! forward. The live loop and resume both go through it, so a replayed
//! journal always lands on the same phase as the run that wrote it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::RelaxationConfig;
use crate::domain::models::hubbard::HubbardParameterSet;
use crate::domain::models::iteration::{
    IterationRecord, JournalEntry, LoopDecision, RelaxationRecord, RunManifest,
};
use crate::domain::models::outcome::{FailureKind, FailureReason};
use crate::domain::models::structure::Structure;

/// Phase of the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Initializing,
    RunningGroundState,
    RunningParameterExtraction,
    CheckingConvergence,
    Relaxing,
    Converged,
    Failed,
    MaxIterationsExceeded,
}

impl LoopPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::RunningGroundState => "running_ground_state",
            Self::RunningParameterExtraction => "running_parameter_extraction",
            Self::CheckingConvergence => "checking_convergence",
            Self::Relaxing => "relaxing",
            Self::Converged => "converged",
            Self::Failed => "failed",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Failed | Self::MaxIterationsExceeded
        )
    }

    fn can_transition_to(&self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        matches!(
            (self, next),
            (Initializing, RunningGroundState)
                | (Initializing, Failed)
                | (RunningGroundState, RunningParameterExtraction)
                | (RunningGroundState, Failed)
                | (RunningParameterExtraction, CheckingConvergence)
                | (RunningParameterExtraction, Failed)
                | (CheckingConvergence, RunningGroundState)
                | (CheckingConvergence, Relaxing)
                | (CheckingConvergence, Converged)
                | (CheckingConvergence, MaxIterationsExceeded)
                | (Relaxing, RunningGroundState)
                | (Relaxing, Converged)
                | (Relaxing, Failed)
        )
    }

    /// Validate and perform a transition.
    pub fn transition_to(self, next: LoopPhase) -> DomainResult<LoopPhase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
                reason: if self.is_terminal() {
                    "phase is terminal".to_string()
                } else {
                    "transition not allowed".to_string()
                },
            })
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopTermination {
    Converged {
        parameters: HubbardParameterSet,
        cycle: u32,
        iterations: u32,
        #[serde(default)]
        max_delta: Option<f64>,
    },
    /// The iteration budget ran out before the parameters settled.
    MaxIterationsExceeded {
        parameters: HubbardParameterSet,
        cycle: u32,
        iterations: u32,
        max_delta: f64,
    },
    Failed {
        reason: FailureReason,
        cycle: u32,
        iteration: u32,
    },
}

impl LoopTermination {
    pub fn phase(&self) -> LoopPhase {
        match self {
            Self::Converged { .. } => LoopPhase::Converged,
            Self::MaxIterationsExceeded { .. } => LoopPhase::MaxIterationsExceeded,
            Self::Failed { .. } => LoopPhase::Failed,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

/// What the loop must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    RunGroundState,
    Relax,
    Stop(LoopTermination),
}

/// Persisted alongside every journal append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub run_id: Uuid,
    pub phase: LoopPhase,
    pub cycle: u32,
    pub iteration: u32,
    pub structure: Structure,
    pub current: HubbardParameterSet,
    #[serde(default)]
    pub termination: Option<LoopTermination>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory state of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopState {
    pub run_id: Uuid,
    pub phase: LoopPhase,
    pub cycle: u32,
    /// Iteration counter within the current cycle.
    pub iteration: u32,
    pub structure: Structure,
    /// Parameters fed to the next ground-state stage.
    pub current: HubbardParameterSet,
    pub termination: Option<LoopTermination>,
    /// Whether the last relaxation still moved the structure.
    pub last_relaxation_changed: bool,
}

impl LoopState {
    /// Fresh state for a manifest, already past initialization.
    pub fn start(manifest: &RunManifest) -> DomainResult<Self> {
        let phase = LoopPhase::Initializing.transition_to(LoopPhase::RunningGroundState)?;
        Ok(Self {
            run_id: manifest.run_id,
            phase,
            cycle: 0,
            iteration: 0,
            structure: manifest.structure.clone(),
            current: manifest.starting_parameters.clone(),
            termination: None,
            last_relaxation_changed: false,
        })
    }

    /// Rebuild the state of a run from its journal.
    pub fn replay(
        manifest: &RunManifest,
        entries: &[JournalEntry],
        relaxation: &RelaxationConfig,
    ) -> DomainResult<Self> {
        let mut state = Self::start(manifest)?;
        for entry in entries {
            state.apply(entry, relaxation)?;
        }
        Ok(state)
    }

    /// Move the phase forward, validating the transition.
    pub fn enter(&mut self, next: LoopPhase) -> DomainResult<()> {
        self.phase = self.phase.transition_to(next)?;
        Ok(())
    }

    pub fn next_action(&self) -> NextAction {
        match (&self.termination, self.phase) {
            (Some(termination), _) => NextAction::Stop(termination.clone()),
            (None, LoopPhase::Relaxing) => NextAction::Relax,
            (None, _) => NextAction::RunGroundState,
        }
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            run_id: self.run_id,
            phase: self.phase,
            cycle: self.cycle,
            iteration: self.iteration,
            structure: self.structure.clone(),
            current: self.current.clone(),
            termination: self.termination.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Whether the relaxation budget allows another relaxation now.
    pub fn should_relax(&self, relaxation: &RelaxationConfig) -> bool {
        relaxation.enabled && self.cycle < relaxation.max_cycles
    }

    /// Fold one journal entry into the state.
    pub fn apply(&mut self, entry: &JournalEntry, relaxation: &RelaxationConfig) -> DomainResult<()> {
        if self.phase.is_terminal() {
            return Err(DomainError::JournalOrdering(format!(
                "{} entry for cycle {} after the run ended as {}",
                entry.kind(),
                entry.cycle(),
                self.phase
            )));
        }
        match entry {
            JournalEntry::Iteration(record) => self.apply_iteration(record, relaxation),
            JournalEntry::Relaxation(record) => self.apply_relaxation(record),
        }
    }

    fn apply_iteration(
        &mut self,
        record: &IterationRecord,
        relaxation: &RelaxationConfig,
    ) -> DomainResult<()> {
        if self.phase == LoopPhase::Relaxing {
            return Err(DomainError::JournalOrdering(format!(
                "iteration {} of cycle {} recorded while relaxing",
                record.iteration, record.cycle
            )));
        }
        if record.cycle != self.cycle || record.iteration != self.iteration {
            return Err(DomainError::JournalOrdering(format!(
                "expected iteration {} of cycle {}, found iteration {} of cycle {}",
                self.iteration, self.cycle, record.iteration, record.cycle
            )));
        }

        if record.decision == LoopDecision::Failed {
            let reason = record.failure.clone().unwrap_or_else(|| {
                FailureReason::new(FailureKind::UnknownStatus, "iteration failed")
            });
            self.enter(LoopPhase::Failed)?;
            self.termination = Some(LoopTermination::Failed {
                reason,
                cycle: self.cycle,
                iteration: self.iteration,
            });
            return Ok(());
        }

        let output = record.output.clone().ok_or_else(|| {
            DomainError::InternalConsistency(format!(
                "iteration {} of cycle {} has decision {} but no output",
                record.iteration,
                record.cycle,
                record.decision.as_str()
            ))
        })?;
        self.walk_to_checking()?;

        match record.decision {
            LoopDecision::Continue => {
                self.enter(LoopPhase::RunningGroundState)?;
                self.current = output;
                self.iteration += 1;
            }
            LoopDecision::Converged => {
                self.current = output.clone();
                if self.should_relax(relaxation) {
                    self.enter(LoopPhase::Relaxing)?;
                } else {
                    self.enter(LoopPhase::Converged)?;
                    self.termination = Some(LoopTermination::Converged {
                        parameters: output,
                        cycle: self.cycle,
                        iterations: self.iteration + 1,
                        max_delta: record.max_delta,
                    });
                }
            }
            LoopDecision::MaxIterationsExceeded => {
                self.enter(LoopPhase::MaxIterationsExceeded)?;
                self.current = output.clone();
                self.termination = Some(LoopTermination::MaxIterationsExceeded {
                    parameters: output,
                    cycle: self.cycle,
                    iterations: self.iteration + 1,
                    max_delta: record.max_delta.unwrap_or(f64::INFINITY),
                });
            }
            LoopDecision::Failed => {
                return Err(DomainError::InternalConsistency(
                    "failed iteration reached convergence checking".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn apply_relaxation(&mut self, record: &RelaxationRecord) -> DomainResult<()> {
        if self.phase != LoopPhase::Relaxing || record.cycle != self.cycle {
            return Err(DomainError::JournalOrdering(format!(
                "relaxation for cycle {} recorded in phase {} of cycle {}",
                record.cycle, self.phase, self.cycle
            )));
        }

        if let Some(reason) = &record.failure {
            self.enter(LoopPhase::Failed)?;
            self.termination = Some(LoopTermination::Failed {
                reason: reason.clone(),
                cycle: self.cycle,
                iteration: self.iteration,
            });
            return Ok(());
        }

        self.last_relaxation_changed = record.structure_changed;
        if record.structure_changed {
            let (Some(structure), Some(carried)) =
                (record.structure.clone(), record.carried_parameters.clone())
            else {
                return Err(DomainError::InternalConsistency(format!(
                    "relaxation of cycle {} changed the structure but recorded no new structure",
                    record.cycle
                )));
            };
            self.enter(LoopPhase::RunningGroundState)?;
            self.structure = structure;
            self.current = carried;
            self.cycle += 1;
            self.iteration = 0;
        } else {
            self.enter(LoopPhase::Converged)?;
            self.termination = Some(LoopTermination::Converged {
                parameters: self.current.clone(),
                cycle: self.cycle,
                iterations: self.iteration + 1,
                max_delta: None,
            });
        }
        Ok(())
    }

    /// Step through the extraction phase into convergence checking.
    fn walk_to_checking(&mut self) -> DomainResult<()> {
        if self.phase == LoopPhase::RunningGroundState {
            self.enter(LoopPhase::RunningParameterExtraction)?;
        }
        if self.phase == LoopPhase::RunningParameterExtraction {
            self.enter(LoopPhase::CheckingConvergence)?;
        }
        if self.phase != LoopPhase::CheckingConvergence {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: LoopPhase::CheckingConvergence.to_string(),
                reason: "iteration result outside an iteration".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::hubbard::HubbardKey;
    use crate::domain::models::iteration::StageSummary;
    use crate::domain::models::outcome::JobOutcome;
    use crate::domain::models::structure::Site;

    fn manifest() -> RunManifest {
        let structure = Structure::new(
            [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]],
            vec![Site::new("Ni", [0.0; 3]).with_hubbard("3d")],
        )
        .unwrap();
        let keys = [HubbardKey::on_site(0, "3d")];
        RunManifest::new(structure, HubbardParameterSet::uniform(&keys, 0.0))
    }

    fn params(value: f64) -> HubbardParameterSet {
        HubbardParameterSet::from_entries(vec![(HubbardKey::on_site(0, "3d"), value)]).unwrap()
    }

    fn ok_summary() -> StageSummary {
        StageSummary {
            outcome: JobOutcome::Success(()),
            attempts: 1,
            total_energy: None,
            task_count: None,
        }
    }

    fn iteration(cycle: u32, index: u32, output: f64, decision: LoopDecision) -> JournalEntry {
        JournalEntry::Iteration(IterationRecord {
            cycle,
            iteration: index,
            input: params(0.0),
            output: Some(params(output)),
            max_delta: Some(output),
            ground_state: ok_summary(),
            extraction: Some(ok_summary()),
            decision,
            failure: None,
            recorded_at: Utc::now(),
        })
    }

    #[test]
    fn test_transition_table() {
        assert!(LoopPhase::Initializing
            .transition_to(LoopPhase::RunningGroundState)
            .is_ok());
        assert!(LoopPhase::CheckingConvergence
            .transition_to(LoopPhase::Relaxing)
            .is_ok());
        assert!(LoopPhase::RunningGroundState
            .transition_to(LoopPhase::Converged)
            .is_err());
        assert!(LoopPhase::Relaxing
            .transition_to(LoopPhase::MaxIterationsExceeded)
            .is_err());
    }

    #[test]
    fn test_terminal_phases_reject_everything() {
        for phase in [
            LoopPhase::Converged,
            LoopPhase::Failed,
            LoopPhase::MaxIterationsExceeded,
        ] {
            let err = phase.transition_to(LoopPhase::RunningGroundState).unwrap_err();
            assert!(err.to_string().contains("terminal"));
        }
    }

    #[test]
    fn test_replay_empty_journal_starts_ground_state() {
        let state = LoopState::replay(&manifest(), &[], &RelaxationConfig::default()).unwrap();
        assert_eq!(state.next_action(), NextAction::RunGroundState);
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn test_replay_continue_advances_counter_and_parameters() {
        let entries = vec![iteration(0, 0, 2.0, LoopDecision::Continue)];
        let state =
            LoopState::replay(&manifest(), &entries, &RelaxationConfig::default()).unwrap();
        assert_eq!(state.iteration, 1);
        assert_eq!(state.current, params(2.0));
        assert_eq!(state.phase, LoopPhase::RunningGroundState);
    }

    #[test]
    fn test_replay_converged_without_relaxation_stops() {
        let entries = vec![
            iteration(0, 0, 2.0, LoopDecision::Continue),
            iteration(0, 1, 2.05, LoopDecision::Converged),
        ];
        let state =
            LoopState::replay(&manifest(), &entries, &RelaxationConfig::default()).unwrap();
        match state.next_action() {
            NextAction::Stop(LoopTermination::Converged {
                parameters,
                iterations,
                ..
            }) => {
                assert_eq!(parameters, params(2.05));
                assert_eq!(iterations, 2);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_replay_converged_with_relaxation_relaxes() {
        let relaxation = RelaxationConfig {
            enabled: true,
            ..Default::default()
        };
        let entries = vec![iteration(0, 0, 2.0, LoopDecision::Converged)];
        let state = LoopState::replay(&manifest(), &entries, &relaxation).unwrap();
        assert_eq!(state.next_action(), NextAction::Relax);
    }

    #[test]
    fn test_replay_rejects_out_of_order_iteration() {
        let entries = vec![iteration(0, 1, 2.0, LoopDecision::Continue)];
        let result = LoopState::replay(&manifest(), &entries, &RelaxationConfig::default());
        assert!(matches!(result, Err(DomainError::JournalOrdering(_))));
    }

    #[test]
    fn test_replay_rejects_entry_after_termination() {
        let entries = vec![
            iteration(0, 0, 2.0, LoopDecision::Converged),
            iteration(0, 1, 2.0, LoopDecision::Continue),
        ];
        let result = LoopState::replay(&manifest(), &entries, &RelaxationConfig::default());
        assert!(matches!(result, Err(DomainError::JournalOrdering(_))));
    }

    #[test]
    fn test_changed_relaxation_opens_new_cycle() {
        let relaxation = RelaxationConfig {
            enabled: true,
            ..Default::default()
        };
        let mut moved = manifest().structure;
        moved.sites[0].position = [0.1, 0.0, 0.0];
        let entries = vec![
            iteration(0, 0, 2.0, LoopDecision::Continue),
            iteration(0, 1, 2.01, LoopDecision::Converged),
            JournalEntry::Relaxation(RelaxationRecord {
                cycle: 0,
                summary: ok_summary(),
                max_displacement: Some(0.1),
                structure_changed: true,
                structure: Some(moved.clone()),
                carried_parameters: Some(params(2.01)),
                failure: None,
                recorded_at: Utc::now(),
            }),
        ];
        let state = LoopState::replay(&manifest(), &entries, &relaxation).unwrap();
        assert_eq!(state.cycle, 1);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.structure, moved);
        assert_eq!(state.current, params(2.01));
        assert_eq!(state.next_action(), NextAction::RunGroundState);
    }
}
