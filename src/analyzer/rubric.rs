use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::AnalyzerError;

const DEFAULT_RUBRIC: &str = include_str!("../../rubrics/analyzer.yaml");

/// Ordered list of checks evaluated against a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerRubric {
    pub checks: Vec<CheckSpec>,
}

/// A check as written in the rubric file.
///
/// Fields are kept loose so that a misconfigured check degrades to an `error`
/// result at run time instead of rejecting the whole rubric.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_commits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_analyze: Vec<String>,
}

/// Where an AI-backed check takes its repository context from.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextSource {
    /// The most recent commits reachable from HEAD.
    GitLog,
    /// First match of each filename anywhere in the tree.
    Files(Vec<String>),
}

/// A validated check, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    FileExists { candidates: Vec<String> },
    GitCommitCount { min_commits: u64 },
    AiCheck { prompt: String, context: ContextSource },
}

impl CheckSpec {
    /// Resolve the loose rubric entry into a dispatchable kind.
    pub fn kind(&self) -> Result<CheckKind, String> {
        match self.check_type.as_str() {
            "file_exists" => {
                let mut candidates: Vec<String> = self.path.iter().cloned().collect();
                candidates.extend(self.paths.iter().cloned());
                if candidates.is_empty() {
                    return Err("Check is misconfigured (needs 'path' or 'paths')".into());
                }
                Ok(CheckKind::FileExists { candidates })
            }
            "git_commit_count" => {
                let min_commits = self
                    .min_commits
                    .ok_or_else(|| "Check is misconfigured (needs 'min_commits')".to_string())?;
                Ok(CheckKind::GitCommitCount { min_commits })
            }
            "ai_check" => {
                let prompt = self
                    .prompt
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| "AI check is misconfigured (needs 'prompt')".to_string())?;
                let context = match self.context_source.as_deref() {
                    Some("git_log") => ContextSource::GitLog,
                    Some(other) => {
                        return Err(format!("AI check has unknown context_source '{}'", other));
                    }
                    None if !self.files_to_analyze.is_empty() => {
                        ContextSource::Files(self.files_to_analyze.clone())
                    }
                    None => {
                        return Err(
                            "AI check is misconfigured (needs 'context_source' or 'files_to_analyze')"
                                .into(),
                        );
                    }
                };
                Ok(CheckKind::AiCheck { prompt, context })
            }
            other => Err(format!("Unknown check type '{}'", other)),
        }
    }
}

impl AnalyzerRubric {
    pub fn from_yaml(raw: &str) -> Result<Self, AnalyzerError> {
        let rubric: Self =
            serde_yaml::from_str(raw).map_err(|e| AnalyzerError::InvalidRubric(e.to_string()))?;
        if rubric.checks.is_empty() {
            return Err(AnalyzerError::InvalidRubric("rubric has no checks".into()));
        }
        if let Some(unnamed) = rubric.checks.iter().position(|c| c.name.trim().is_empty()) {
            return Err(AnalyzerError::InvalidRubric(format!(
                "check #{} has no name",
                unnamed + 1
            )));
        }
        Ok(rubric)
    }

    /// The rubric compiled into the binary.
    pub fn builtin() -> Result<Self, AnalyzerError> {
        Self::from_yaml(DEFAULT_RUBRIC)
    }

    /// Load from `path`, or the built-in rubric when no path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read analyzer rubric {}", path.display()))?;
                Ok(Self::from_yaml(&raw)?)
            }
            None => Ok(Self::builtin()?),
        }
    }
}
