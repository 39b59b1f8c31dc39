use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ScorerError;

const DEFAULT_RUBRIC: &str = include_str!("../../rubrics/scorer.yaml");

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Scored by the AI when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Analyzer checks whose statuses compute the score when there is no prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<String>,
}

impl Criterion {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringRubric {
    pub criteria: Vec<Criterion>,
}

impl ScoringRubric {
    pub fn from_yaml(raw: &str) -> Result<Self, ScorerError> {
        let rubric: Self =
            serde_yaml::from_str(raw).map_err(|e| ScorerError::InvalidRubric(e.to_string()))?;
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn builtin() -> Result<Self, ScorerError> {
        Self::from_yaml(DEFAULT_RUBRIC)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read scoring rubric {}", path.display()))?;
                Ok(Self::from_yaml(&raw)?)
            }
            None => Ok(Self::builtin()?),
        }
    }

    pub fn validate(&self) -> Result<(), ScorerError> {
        if self.criteria.is_empty() {
            return Err(ScorerError::InvalidRubric("rubric has no criteria".into()));
        }
        let mut seen = HashSet::new();
        for c in &self.criteria {
            if c.id.trim().is_empty() {
                return Err(ScorerError::InvalidRubric("criterion with empty id".into()));
            }
            if !seen.insert(c.id.as_str()) {
                return Err(ScorerError::InvalidRubric(format!(
                    "duplicate criterion id '{}'",
                    c.id
                )));
            }
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(ScorerError::InvalidRubric(format!(
                    "criterion '{}' has invalid weight {}",
                    c.id, c.weight
                )));
            }
            if c.prompt.is_none() && c.checks.is_empty() {
                return Err(ScorerError::InvalidRubric(format!(
                    "criterion '{}' needs a prompt or a checks list",
                    c.id
                )));
            }
        }
        Ok(())
    }

    /// Weights scaled to sum to 1. All-zero weights become equal weights.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let total: f64 = self.criteria.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            let equal = 1.0 / self.criteria.len().max(1) as f64;
            return vec![equal; self.criteria.len()];
        }
        self.criteria.iter().map(|c| c.weight / total).collect()
    }
}

/// Criterion id → fixed score.
pub type Overrides = BTreeMap<String, f64>;

/// Read overrides from a JSON object file. A missing file means no overrides.
pub fn load_overrides(path: Option<&Path>) -> Result<Overrides> {
    let Some(path) = path else {
        return Ok(Overrides::new());
    };
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No overrides file");
        return Ok(Overrides::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read overrides {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid overrides JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rubric_is_valid() {
        let rubric = ScoringRubric::builtin().unwrap();
        assert!(rubric.criteria.len() >= 2);
    }

    #[test]
    fn weight_defaults_to_one_and_name_to_id() {
        let rubric = ScoringRubric::from_yaml(
            r#"
criteria:
  - id: docs
    prompt: "judge docs"
"#,
        )
        .unwrap();
        assert_eq!(rubric.criteria[0].weight, 1.0);
        assert_eq!(rubric.criteria[0].display_name(), "docs");
    }

    #[test]
    fn rejects_duplicate_ids_and_negative_weights() {
        let dup = r#"
criteria:
  - { id: a, prompt: x }
  - { id: a, prompt: y }
"#;
        assert!(ScoringRubric::from_yaml(dup).unwrap_err().to_string().contains("duplicate"));

        let negative = r#"
criteria:
  - { id: a, prompt: x, weight: -1 }
"#;
        assert!(ScoringRubric::from_yaml(negative).is_err());
    }

    #[test]
    fn rejects_criterion_without_scoring_source() {
        let err = ScoringRubric::from_yaml("criteria:\n  - { id: a }\n").unwrap_err();
        assert!(err.to_string().contains("prompt or a checks list"));
    }

    #[test]
    fn weights_normalize_to_one() {
        let rubric = ScoringRubric::from_yaml(
            r#"
criteria:
  - { id: a, prompt: x, weight: 2 }
  - { id: b, prompt: y, weight: 6 }
"#,
        )
        .unwrap();
        assert_eq!(rubric.normalized_weights(), vec![0.25, 0.75]);
    }

    #[test]
    fn zero_weights_become_equal() {
        let rubric = ScoringRubric::from_yaml(
            r#"
criteria:
  - { id: a, prompt: x, weight: 0 }
  - { id: b, prompt: y, weight: 0 }
"#,
        )
        .unwrap();
        assert_eq!(rubric.normalized_weights(), vec![0.5, 0.5]);
    }

    #[test]
    fn overrides_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        std::fs::write(&path, r#"{"docs": 0.7}"#).unwrap();

        let overrides = load_overrides(Some(&path)).unwrap();
        assert_eq!(overrides.get("docs"), Some(&0.7));
        assert!(load_overrides(Some(&dir.path().join("absent.json"))).unwrap().is_empty());
        assert!(load_overrides(None).unwrap().is_empty());
    }
}
