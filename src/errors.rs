//! Typed error hierarchy for the analysis pipeline.
//!
//! Four enums cover the subsystem seams:
//! - `GatewayError`: AI gateway failures (retry exhaustion, provider rejection)
//! - `AnalyzerError`: fatal analyzer conditions (a single check never raises one)
//! - `ScorerError`: scoring pass failures
//! - `PipelineError`: run-level failures recorded on the row as `ERROR`

use thiserror::Error;

use crate::runs::state::TransitionError;

/// Maximum length of an error message stored on a run row.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// Errors surfaced by the AI gateway to its callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("AI call failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("AI provider rejected the request: {0}")]
    Rejected(String),

    #[error("AI provider returned an empty response")]
    EmptyResponse,
}

/// Fatal analyzer failures. Per-check problems degrade the check instead.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Repository at {path} is unreadable: {reason}")]
    RepositoryUnreadable {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("Invalid analyzer rubric: {0}")]
    InvalidRubric(String),
}

/// Failures of a whole scoring pass.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("{failed} of {total} criteria failed to score (limit {max_fraction:.2})")]
    TooManyFailures {
        failed: usize,
        total: usize,
        max_fraction: f64,
    },

    #[error("Analyzer output is empty")]
    EmptyInput,

    #[error("Invalid scoring rubric: {0}")]
    InvalidRubric(String),
}

/// Run-level failures. Each variant ends the attempt with status `ERROR`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Clone of {url} failed: {reason}")]
    CloneFailure { url: String, reason: String },

    #[error("Check '{check}' failed: {reason}")]
    CheckExecutionFailure { check: String, reason: String },

    #[error("AI gateway failure: {0}")]
    AiGatewayFailure(#[from] GatewayError),

    #[error("Scoring aggregation failure: {0}")]
    ScoringAggregationFailure(#[source] ScorerError),

    #[error("Analyzer failure: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),
}

impl From<ScorerError> for PipelineError {
    fn from(err: ScorerError) -> Self {
        Self::ScoringAggregationFailure(err)
    }
}

impl PipelineError {
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::PersistenceFailure(err.into())
    }

    /// Render the error for storage on the run row, bounded to
    /// `MAX_ERROR_MESSAGE_LEN` characters.
    pub fn to_row_message(&self) -> String {
        truncate_message(&self.to_string())
    }
}

/// Truncate to `MAX_ERROR_MESSAGE_LEN` characters on a char boundary.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}
