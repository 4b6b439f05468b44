//! Output parser for jobs that report their results as JSON on stdout.
//!
//! The document is either the whole stdout or its last line that starts
//! with `{`, so wrapper scripts may log freely before printing the result.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::models::{
    ElectronicState, HubbardEntry, HubbardParameterSet, RawOutput, Structure,
};
use crate::domain::ports::{OutputParser, ParseError};

#[derive(Debug, Deserialize)]
struct GroundStateDocument {
    #[serde(default = "default_true")]
    converged: bool,
    #[serde(default)]
    total_energy: Option<f64>,
    handle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubbardDocument {
    #[serde(default = "default_true")]
    converged: bool,
    hubbard: Option<Vec<HubbardEntry>>,
}

#[derive(Debug, Deserialize)]
struct StructureDocument {
    #[serde(default = "default_true")]
    converged: bool,
    structure: Option<Structure>,
}

const fn default_true() -> bool {
    true
}

/// Parses JSON result documents.
#[derive(Debug, Clone, Default)]
pub struct JsonOutputParser;

impl JsonOutputParser {
    pub fn new() -> Self {
        Self
    }

    fn document(output: &RawOutput) -> Result<Value, ParseError> {
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Err(ParseError::Invalid("empty output".to_string()));
        }
        if let Ok(value) = serde_json::from_str::<Value>(stdout) {
            return Ok(value);
        }
        let last = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.starts_with('{'))
            .ok_or_else(|| ParseError::Invalid("no JSON document in output".to_string()))?;
        serde_json::from_str(last).map_err(|e| ParseError::Invalid(format!("parse error: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(output: &RawOutput) -> Result<T, ParseError> {
        let value = Self::document(output)?;
        serde_json::from_value(value).map_err(|e| ParseError::Invalid(format!("parse error: {e}")))
    }
}

impl OutputParser for JsonOutputParser {
    fn parse_hubbard(&self, output: &RawOutput) -> Result<HubbardParameterSet, ParseError> {
        let doc: HubbardDocument = Self::decode(output)?;
        if !doc.converged {
            return Err(ParseError::NotConverged(
                "linear-response calculation".to_string(),
            ));
        }
        let entries = doc
            .hubbard
            .ok_or_else(|| ParseError::MissingField("hubbard".to_string()))?;
        HubbardParameterSet::from_entries(entries.into_iter().map(|e| (e.key, e.value)))
            .map_err(|e| ParseError::Invalid(e.to_string()))
    }

    fn parse_ground_state(&self, output: &RawOutput) -> Result<ElectronicState, ParseError> {
        let doc: GroundStateDocument = Self::decode(output)?;
        if !doc.converged {
            return Err(ParseError::NotConverged(
                "electronic minimization".to_string(),
            ));
        }
        let handle = doc
            .handle
            .ok_or_else(|| ParseError::MissingField("handle".to_string()))?;
        Ok(ElectronicState {
            handle,
            total_energy: doc.total_energy,
            converged: true,
        })
    }

    fn parse_structure(&self, output: &RawOutput) -> Result<Structure, ParseError> {
        let doc: StructureDocument = Self::decode(output)?;
        if !doc.converged {
            return Err(ParseError::NotConverged("ionic relaxation".to_string()));
        }
        let structure = doc
            .structure
            .ok_or_else(|| ParseError::MissingField("structure".to_string()))?;
        structure
            .validate()
            .map_err(|e| ParseError::Invalid(e.to_string()))?;
        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HubbardKey;
    use serde_json::json;

    fn stdout(text: &str) -> RawOutput {
        RawOutput::from_stdout(text)
    }

    #[test]
    fn test_ground_state() {
        let parser = JsonOutputParser::new();
        let state = parser
            .parse_ground_state(&stdout(
                r#"{"converged": true, "total_energy": -42.5, "handle": "/scratch/1"}"#,
            ))
            .unwrap();
        assert_eq!(state.handle, "/scratch/1");
        assert_eq!(state.total_energy, Some(-42.5));
    }

    #[test]
    fn test_ground_state_not_converged() {
        let parser = JsonOutputParser::new();
        let err = parser
            .parse_ground_state(&stdout(r#"{"converged": false, "handle": "x"}"#))
            .unwrap_err();
        assert!(matches!(err, ParseError::NotConverged(_)));
    }

    #[test]
    fn test_ground_state_missing_handle() {
        let parser = JsonOutputParser::new();
        let err = parser.parse_ground_state(&stdout("{}")).unwrap_err();
        assert_eq!(err, ParseError::MissingField("handle".to_string()));
    }

    #[test]
    fn test_hubbard_after_log_lines() {
        let parser = JsonOutputParser::new();
        let doc = json!({
            "hubbard": [
                {"key": {"type": "on_site", "site": 1, "manifold": "3d"}, "value": 4.25}
            ]
        });
        let text = format!("starting run\nchi converged\n{doc}\n");
        let set = parser.parse_hubbard(&stdout(&text)).unwrap();
        assert_eq!(set.get(&HubbardKey::on_site(1, "3d")), Some(4.25));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let parser = JsonOutputParser::new();
        let err = parser.parse_hubbard(&stdout("Segmentation fault")).unwrap_err();
        assert!(matches!(err, ParseError::Invalid(_)));
        assert!(matches!(
            parser.parse_hubbard(&stdout("")).unwrap_err(),
            ParseError::Invalid(_)
        ));
    }

    #[test]
    fn test_structure_round_trip() {
        let parser = JsonOutputParser::new();
        let structure = Structure::new(
            [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]],
            vec![crate::domain::models::Site::new("Fe", [0.0; 3])],
        )
        .unwrap();
        let doc = json!({ "structure": structure });
        let parsed = parser.parse_structure(&stdout(&doc.to_string())).unwrap();
        assert_eq!(parsed, structure);
    }
}
