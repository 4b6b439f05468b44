//! Job specs and decoders for each loop stage.

use std::collections::BTreeSet;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::extraction_settings::retrieved_files;
use crate::domain::models::{
    ElectronicState, ExtractionSettings, HubbardKey, HubbardParameterSet, JobPayload, JobSpec,
    RawOutput, StageConfig, Structure,
};
use crate::domain::ports::{OutputParser, ParseError};

pub fn ground_state_label(cycle: u32, iteration: u32) -> String {
    format!("c{cycle}.i{iteration}.ground_state")
}

pub fn extraction_label(cycle: u32, iteration: u32, ordinal: usize) -> String {
    format!("c{cycle}.i{iteration}.extraction.t{ordinal}")
}

pub fn relaxation_label(cycle: u32) -> String {
    format!("c{cycle}.relaxation")
}

pub fn ground_state_spec(
    cycle: u32,
    iteration: u32,
    structure: &Structure,
    parameters: &HubbardParameterSet,
    stage: &StageConfig,
) -> JobSpec {
    JobSpec::new(
        ground_state_label(cycle, iteration),
        JobPayload::GroundState {
            structure: structure.clone(),
            parameters: parameters.clone(),
        },
    )
    .with_resources(stage.resources.clone())
    .with_solver(stage.solver.clone())
}

/// Extraction job for one decomposition task.
///
/// The parent electronic state must have converged; extracting parameters
/// from an unconverged state is invalid input.
pub fn extraction_spec(
    label: String,
    structure: &Structure,
    parent: &ElectronicState,
    sites: &[usize],
    settings: &ExtractionSettings,
    stage: &StageConfig,
) -> DomainResult<JobSpec> {
    if !parent.converged || parent.handle.is_empty() {
        return Err(DomainError::InvalidInput(
            "parameter extraction requires a converged parent electronic state".to_string(),
        ));
    }
    Ok(JobSpec::new(
        label,
        JobPayload::ParameterExtraction {
            structure: structure.clone(),
            parent: parent.clone(),
            sites: sites.to_vec(),
            settings: settings.clone(),
        },
    )
    .with_resources(stage.resources.clone())
    .with_solver(stage.solver.clone())
    .with_retrieve(retrieved_files()))
}

pub fn relaxation_spec(
    cycle: u32,
    structure: &Structure,
    parameters: &HubbardParameterSet,
    stage: &StageConfig,
) -> JobSpec {
    JobSpec::new(
        relaxation_label(cycle),
        JobPayload::Relaxation {
            structure: structure.clone(),
            parameters: parameters.clone(),
        },
    )
    .with_resources(stage.resources.clone())
    .with_solver(stage.solver.clone())
}

/// Decode a ground-state result, treating an unconverged state as non-convergence.
pub fn decode_ground_state(
    parser: &dyn OutputParser,
    output: &RawOutput,
) -> Result<ElectronicState, ParseError> {
    let state = parser.parse_ground_state(output)?;
    if !state.converged {
        return Err(ParseError::NotConverged(
            "electronic minimization".to_string(),
        ));
    }
    Ok(state)
}

/// Build the starting parameter set for a structure.
///
/// Every required key gets `default` unless `user` supplies a value. User
/// keys outside the required set are rejected.
pub fn starting_parameters(
    required: &BTreeSet<HubbardKey>,
    user: Option<&HubbardParameterSet>,
    default: f64,
) -> DomainResult<HubbardParameterSet> {
    let Some(user) = user else {
        return Ok(HubbardParameterSet::uniform(required, default));
    };
    let unknown: Vec<String> = user
        .keys()
        .difference(required)
        .map(ToString::to_string)
        .collect();
    if !unknown.is_empty() {
        return Err(DomainError::InvalidInput(format!(
            "starting parameters contain keys not derived from the structure: {}",
            unknown.join(", ")
        )));
    }
    Ok(user.carried_over(required, default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{JobKind, Site};

    fn structure() -> Structure {
        Structure::new(
            [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]],
            vec![
                Site::new("Ni", [0.0; 3]).with_hubbard("3d"),
                Site::new("Ni", [2.0, 2.0, 0.0]).with_hubbard("3d"),
            ],
        )
        .unwrap()
    }

    fn required() -> BTreeSet<HubbardKey> {
        [HubbardKey::on_site(0, "3d"), HubbardKey::on_site(1, "3d")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_starting_parameters_default() {
        let set = starting_parameters(&required(), None, 0.5).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&HubbardKey::on_site(1, "3d")), Some(0.5));
    }

    #[test]
    fn test_starting_parameters_fill_missing_keys() {
        let user =
            HubbardParameterSet::from_entries(vec![(HubbardKey::on_site(0, "3d"), 4.0)]).unwrap();
        let set = starting_parameters(&required(), Some(&user), 0.0).unwrap();
        assert_eq!(set.get(&HubbardKey::on_site(0, "3d")), Some(4.0));
        assert_eq!(set.get(&HubbardKey::on_site(1, "3d")), Some(0.0));
    }

    #[test]
    fn test_starting_parameters_reject_unknown_keys() {
        let user =
            HubbardParameterSet::from_entries(vec![(HubbardKey::on_site(7, "4f"), 4.0)]).unwrap();
        let err = starting_parameters(&required(), Some(&user), 0.0).unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
        assert!(err.to_string().contains("U(7, 4f)"));
    }

    #[test]
    fn test_extraction_spec_requires_converged_parent() {
        let parent = ElectronicState {
            handle: "/scratch/gs".to_string(),
            total_energy: None,
            converged: false,
        };
        let result = extraction_spec(
            extraction_label(0, 0, 0),
            &structure(),
            &parent,
            &[0],
            &ExtractionSettings::default(),
            &StageConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extraction_spec_retrieves_response_files() {
        let parent = ElectronicState {
            handle: "/scratch/gs".to_string(),
            total_energy: Some(-1.0),
            converged: true,
        };
        let spec = extraction_spec(
            extraction_label(1, 2, 3),
            &structure(),
            &parent,
            &[1],
            &ExtractionSettings::default(),
            &StageConfig::default(),
        )
        .unwrap();
        assert_eq!(spec.kind(), JobKind::ParameterExtraction);
        assert_eq!(spec.label, "c1.i2.extraction.t3");
        assert!(spec.retrieve.contains(&"aiida.chi.dat".to_string()));
    }
}
