use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by an AI provider for a single request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Timeouts, 5xx, provider-side rate limiting. Worth retrying.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Bad request, auth failure, malformed response. Retrying cannot help.
    #[error("provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a free-form error message the way provider SDKs report them.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let transient = ["timeout", "timed out", "rate", "429", "overload", "unavail", "503", "500", "502", "504"]
            .iter()
            .any(|needle| lower.contains(needle));
        if transient {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }
}

/// The external generative-AI service behind the gateway.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Model identifier; part of every prompt fingerprint.
    fn model(&self) -> &str;
}

/// Stands in when no credentials are configured. Every request fails
/// permanently, so rubrics without AI checks still run end to end.
pub struct UnconfiguredProvider {
    model: String,
    reason: String,
}

impl UnconfiguredProvider {
    pub fn new(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AiProvider for UnconfiguredProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Permanent(self.reason.clone()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
