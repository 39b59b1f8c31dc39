use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerOutput;
use crate::gateway::cache::AiCache;
use crate::scorer::ScorerOutput;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Analyzed,
    Done,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Analyzed => "ANALYZED",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// Statuses from which `enqueue` accepts a run.
    pub fn is_enqueueable(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }

    /// Terminal for the current attempt. `Error` stays terminal until re-enqueued.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "ANALYZED" => Ok(Self::Analyzed),
            "DONE" => Ok(Self::Done),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// One end-to-end analysis request for a repository/email pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub email: String,
    pub github_url: String,
    pub status: RunStatus,
    pub commit_hash: Option<String>,
    pub branch_name: Option<String>,
    pub analyzer_output: Option<AnalyzerOutput>,
    pub analyzer_tool_version: Option<String>,
    pub scorer_output: Option<ScorerOutput>,
    pub scorer_tool_version: Option<String>,
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub analyzer_ai_cache: AiCache,
    #[serde(default)]
    pub scorer_ai_cache: AiCache,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update of a run row. `None` leaves a column untouched.
///
/// `error_message` is doubly optional: `Some(None)` clears the column.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub commit_hash: Option<String>,
    pub branch_name: Option<String>,
    pub analyzer_output: Option<AnalyzerOutput>,
    pub analyzer_tool_version: Option<String>,
    pub analyzer_ai_cache: Option<AiCache>,
    pub scorer_output: Option<ScorerOutput>,
    pub scorer_tool_version: Option<String>,
    pub scorer_ai_cache: Option<AiCache>,
    pub overall_score: Option<f64>,
    pub error_message: Option<Option<String>>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn clear_error() -> Self {
        Self {
            error_message: Some(None),
            ..Default::default()
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            status: Some(RunStatus::Error),
            error_message: Some(Some(message)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.commit_hash.is_none()
            && self.branch_name.is_none()
            && self.analyzer_output.is_none()
            && self.analyzer_tool_version.is_none()
            && self.analyzer_ai_cache.is_none()
            && self.scorer_output.is_none()
            && self.scorer_tool_version.is_none()
            && self.scorer_ai_cache.is_none()
            && self.overall_score.is_none()
            && self.error_message.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_stable() {
        for (status, literal) in [
            (RunStatus::Pending, "PENDING"),
            (RunStatus::Running, "RUNNING"),
            (RunStatus::Analyzed, "ANALYZED"),
            (RunStatus::Done, "DONE"),
            (RunStatus::Error, "ERROR"),
        ] {
            assert_eq!(status.as_str(), literal);
            assert_eq!(RunStatus::from_str(literal).unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", literal)
            );
        }
    }

    #[test]
    fn lowercase_status_is_rejected() {
        assert!(RunStatus::from_str("pending").is_err());
    }

    #[test]
    fn only_pending_and_error_are_enqueueable() {
        assert!(RunStatus::Pending.is_enqueueable());
        assert!(RunStatus::Error.is_enqueueable());
        assert!(!RunStatus::Running.is_enqueueable());
        assert!(!RunStatus::Analyzed.is_enqueueable());
        assert!(!RunStatus::Done.is_enqueueable());
    }

    #[test]
    fn run_update_constructors() {
        assert!(RunUpdate::default().is_empty());
        assert!(!RunUpdate::status(RunStatus::Running).is_empty());

        let failed = RunUpdate::failed("boom".into());
        assert_eq!(failed.status, Some(RunStatus::Error));
        assert_eq!(failed.error_message, Some(Some("boom".into())));

        assert_eq!(RunUpdate::clear_error().error_message, Some(None));
    }
}
