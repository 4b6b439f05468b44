//! Linear-response settings forwarded to the parameter-extraction code.
//!
//! Users supply namelist parameters and a q-point mesh. Some keywords are
//! owned by the orchestrator and may not be set by hand; they are injected
//! by [`ExtractionSettings::normalized`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::job::SolverControls;

/// The namelist every extraction input must contain.
pub const COMPULSORY_NAMELIST: &str = "INPUTUSCF";

/// Output prefix used for every extraction job.
pub const OUTPUT_PREFIX: &str = "aiida";

/// Directory holding the parent ground-state data inside the job folder.
pub const OUTPUT_SUBFOLDER: &str = "./out/";

/// Keywords set by the orchestrator, per namelist.
pub const BLOCKED_KEYWORDS: &[(&str, &str)] = &[
    (COMPULSORY_NAMELIST, "iverbosity"),
    (COMPULSORY_NAMELIST, "prefix"),
    (COMPULSORY_NAMELIST, "outdir"),
    (COMPULSORY_NAMELIST, "nq1"),
    (COMPULSORY_NAMELIST, "nq2"),
    (COMPULSORY_NAMELIST, "nq3"),
    (COMPULSORY_NAMELIST, "conv_thr_chi"),
];

/// Files an extraction job must hand back.
pub fn retrieved_files() -> Vec<String> {
    vec![
        format!("{OUTPUT_PREFIX}.out"),
        format!("{OUTPUT_PREFIX}.chi.dat"),
        format!("{OUTPUT_PREFIX}.Hubbard_U.dat"),
    ]
}

pub type Namelists = BTreeMap<String, BTreeMap<String, Value>>;

/// User-facing extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionSettings {
    /// Namelist name to keyword/value map.
    #[serde(default = "default_namelists")]
    pub namelists: Namelists,

    /// Uniform q-point mesh.
    #[serde(default = "default_qpoint_mesh")]
    pub qpoint_mesh: [u32; 3],

    /// Mesh offset; only the unshifted mesh is supported.
    #[serde(default)]
    pub qpoint_offset: [f64; 3],

    /// Extra command-line arguments for the code.
    #[serde(default)]
    pub cmdline: Vec<String>,
}

fn default_namelists() -> Namelists {
    let mut namelists = BTreeMap::new();
    namelists.insert(COMPULSORY_NAMELIST.to_string(), BTreeMap::new());
    namelists
}

const fn default_qpoint_mesh() -> [u32; 3] {
    [1, 1, 1]
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            namelists: default_namelists(),
            qpoint_mesh: default_qpoint_mesh(),
            qpoint_offset: [0.0; 3],
            cmdline: Vec::new(),
        }
    }
}

impl ExtractionSettings {
    /// Upper-case namelist names and lower-case keywords.
    ///
    /// Two spellings of the same name collapsing onto one entry is an error.
    fn case_normalized(&self) -> DomainResult<Namelists> {
        let mut out = Namelists::new();
        for (name, keywords) in &self.namelists {
            let upper = name.to_uppercase();
            let mut lowered = BTreeMap::new();
            for (key, value) in keywords {
                if lowered.insert(key.to_lowercase(), value.clone()).is_some() {
                    return Err(DomainError::InvalidInput(format!(
                        "keyword '{key}' given more than once in namelist '{upper}'"
                    )));
                }
            }
            if out.insert(upper.clone(), lowered).is_some() {
                return Err(DomainError::InvalidInput(format!(
                    "namelist '{upper}' given more than once"
                )));
            }
        }
        Ok(out)
    }

    /// Validate the user-supplied settings.
    pub fn validate(&self) -> DomainResult<()> {
        let namelists = self.case_normalized()?;

        for (namelist, keyword) in BLOCKED_KEYWORDS {
            if namelists
                .get(*namelist)
                .is_some_and(|keys| keys.contains_key(*keyword))
            {
                return Err(DomainError::InvalidInput(format!(
                    "explicit definition of the '{keyword}' flag in the '{namelist}' namelist is not allowed"
                )));
            }
        }

        if !namelists.contains_key(COMPULSORY_NAMELIST) {
            return Err(DomainError::InvalidInput(format!(
                "no namelist {COMPULSORY_NAMELIST} found in input"
            )));
        }

        let unknown: Vec<&str> = namelists
            .keys()
            .map(String::as_str)
            .filter(|name| *name != COMPULSORY_NAMELIST)
            .collect();
        if !unknown.is_empty() {
            return Err(DomainError::InvalidInput(format!(
                "the following namelists are invalid: {}",
                unknown.join(",")
            )));
        }

        if self.qpoint_mesh.contains(&0) {
            return Err(DomainError::InvalidInput(format!(
                "q-point mesh entries must be positive, got {:?}",
                self.qpoint_mesh
            )));
        }

        if self.qpoint_offset.iter().any(|o| *o != 0.0) {
            return Err(DomainError::InvalidInput(
                "q-point meshes with non-zero offsets are not supported".to_string(),
            ));
        }

        Ok(())
    }

    /// Validated namelists with the orchestrator-owned keywords injected.
    pub fn normalized(&self, solver: &SolverControls) -> DomainResult<Namelists> {
        self.validate()?;
        let mut namelists = self.case_normalized()?;
        let input = namelists
            .entry(COMPULSORY_NAMELIST.to_string())
            .or_default();
        input.insert("outdir".to_string(), Value::from(OUTPUT_SUBFOLDER));
        input.insert("prefix".to_string(), Value::from(OUTPUT_PREFIX));
        input.insert("iverbosity".to_string(), Value::from(2));
        input.insert("nq1".to_string(), Value::from(self.qpoint_mesh[0]));
        input.insert("nq2".to_string(), Value::from(self.qpoint_mesh[1]));
        input.insert("nq3".to_string(), Value::from(self.qpoint_mesh[2]));
        input.insert(
            "conv_thr_chi".to_string(),
            Value::from(solver.conv_threshold),
        );
        Ok(namelists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_keyword(namelist: &str, key: &str, value: Value) -> ExtractionSettings {
        let mut settings = ExtractionSettings::default();
        settings.namelists.clear();
        settings
            .namelists
            .entry(namelist.to_string())
            .or_default()
            .insert(key.to_string(), value);
        settings
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(ExtractionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_blocked_keyword_rejected_case_insensitively() {
        let settings = with_keyword("inputuscf", "NQ1", json!(4));
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("nq1"));
    }

    #[test]
    fn test_conv_thr_chi_is_blocked() {
        let settings = with_keyword("INPUTUSCF", "conv_thr_chi", json!(1e-6));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_compulsory_namelist() {
        let mut settings = ExtractionSettings::default();
        settings.namelists.clear();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("INPUTUSCF"));
    }

    #[test]
    fn test_unknown_namelist_rejected() {
        let mut settings = ExtractionSettings::default();
        settings
            .namelists
            .insert("control".to_string(), BTreeMap::new());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("CONTROL"));
    }

    #[test]
    fn test_offset_mesh_rejected() {
        let settings = ExtractionSettings {
            qpoint_offset: [0.5, 0.0, 0.0],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_mesh_rejected() {
        let settings = ExtractionSettings {
            qpoint_mesh: [2, 0, 2],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_normalized_injects_owned_keywords() {
        let settings = ExtractionSettings {
            qpoint_mesh: [2, 3, 4],
            ..with_keyword("InputUscf", "Alpha_Mix(1)", json!(0.3))
        };
        let solver = SolverControls {
            conv_threshold: 1e-6,
            ..Default::default()
        };
        let namelists = settings.normalized(&solver).unwrap();
        let input = &namelists[COMPULSORY_NAMELIST];
        assert_eq!(input["alpha_mix(1)"], json!(0.3));
        assert_eq!(input["nq2"], json!(3));
        assert_eq!(input["iverbosity"], json!(2));
        assert_eq!(input["prefix"], json!("aiida"));
        assert_eq!(input["conv_thr_chi"], json!(1e-6));
    }

    #[test]
    fn test_retrieved_files() {
        let files = retrieved_files();
        assert!(files.contains(&"aiida.Hubbard_U.dat".to_string()));
        assert_eq!(files.len(), 3);
    }
}
