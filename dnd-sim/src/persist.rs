//! Scenario documents and result export.
//!
//! A scenario is a versioned JSON document holding a party and an
//! adventuring day. Loading checks the version; turning a document into a
//! request validates it, so malformed creatures and actions surface as a
//! [`ValidationError`] before anything is simulated.

use crate::model::{validate_request, Creature, SimulationRequest, TimelineSegment, ValidationError};
use crate::orchestrator::SimulationResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid scenario: {0}")]
    Invalid(#[from] ValidationError),
}

/// Current scenario file version.
pub const SCENARIO_VERSION: u32 = 1;

fn default_iterations() -> u32 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDocument {
    /// Format version for compatibility checking.
    pub version: u32,
    #[serde(default)]
    pub name: String,
    pub party: Vec<Creature>,
    pub timeline: Vec<TimelineSegment>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_k: Option<u32>,
}

impl ScenarioDocument {
    pub fn new(name: impl Into<String>, party: Vec<Creature>, timeline: Vec<TimelineSegment>) -> Self {
        Self {
            version: SCENARIO_VERSION,
            name: name.into(),
            party,
            timeline,
            iterations: default_iterations(),
            seed: None,
            max_k: None,
        }
    }

    /// Capture a request as a document.
    pub fn from_request(name: impl Into<String>, request: &SimulationRequest) -> Self {
        Self {
            iterations: request.iterations,
            seed: request.seed,
            max_k: request.max_k,
            ..Self::new(name, request.party.clone(), request.timeline.clone())
        }
    }

    /// Validated simulation request.
    pub fn to_request(&self) -> Result<SimulationRequest, ValidationError> {
        let request = SimulationRequest {
            party: self.party.clone(),
            timeline: self.timeline.clone(),
            iterations: self.iterations,
            seed: self.seed,
            max_k: self.max_k,
        };
        validate_request(&request)?;
        Ok(request)
    }

    fn checked(self) -> Result<Self, PersistError> {
        if self.version != SCENARIO_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SCENARIO_VERSION,
                found: self.version,
            });
        }
        Ok(self)
    }

    pub fn from_json_str(content: &str) -> Result<Self, PersistError> {
        let document: Self = serde_json::from_str(content)?;
        document.checked()
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }
}

/// Write a result bundle as pretty JSON.
pub async fn save_result_json(
    result: &SimulationResult,
    path: impl AsRef<Path>,
) -> Result<(), PersistError> {
    let content = serde_json::to_string_pretty(result)?;
    fs::write(path, content).await?;
    Ok(())
}

/// Scenario files in a directory, sorted by path.
pub async fn list_scenarios(dir: impl AsRef<Path>) -> Result<Vec<std::path::PathBuf>, PersistError> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Generate a file path for a scenario name.
pub fn scenario_path(dir: impl AsRef<Path>, name: &str) -> std::path::PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    dir.as_ref().join(format!("{sanitized}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_day, sample_party};

    #[test]
    fn test_scenario_path() {
        let path = scenario_path("/scenarios", "Goblin Ambush!");
        assert!(path.to_string_lossy().ends_with("Goblin_Ambush_.json"));
    }

    #[test]
    fn test_version_checked() {
        let mut document = ScenarioDocument::new("Day", sample_party(), sample_day());
        document.version = 99;
        let json = serde_json::to_string(&document).unwrap();
        assert!(matches!(
            ScenarioDocument::from_json_str(&json),
            Err(PersistError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(matches!(
            ScenarioDocument::from_json_str("{\"version\": 1, \"party\": 3}"),
            Err(PersistError::Json(_))
        ));
    }

    #[test]
    fn test_invalid_request_rejected() {
        let document = ScenarioDocument::new("Empty", Vec::new(), sample_day());
        assert_eq!(document.to_request(), Err(ValidationError::EmptyParty));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut document = ScenarioDocument::new("Long Day", sample_party(), sample_day());
        document.seed = Some(7);
        let path = scenario_path(dir.path(), &document.name);
        document.save_json(&path).await.unwrap();

        let loaded = ScenarioDocument::load_json(&path).await.unwrap();
        assert_eq!(loaded, document);
        let request = loaded.to_request().unwrap();
        assert_eq!(request.seed, Some(7));
        assert_eq!(list_scenarios(dir.path()).await.unwrap(), vec![path]);
    }
}
