//! Gemini `generateContent` provider with round-robin API key rotation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;

use super::provider::{AiProvider, ProviderError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// A labelled set of API keys handed out round-robin.
///
/// Labels (`k1`, `k2`, ...) are what gets logged; keys never are.
pub struct KeyRing {
    keys: Vec<(String, String)>,
    next: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        let keys: Vec<(String, String)> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .enumerate()
            .map(|(i, k)| (format!("k{}", i + 1), k))
            .collect();
        if keys.is_empty() {
            bail!("No Gemini API keys configured (set GEMINI_API_KEYS or GEMINI_API_KEY)");
        }
        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    /// `GEMINI_API_KEYS` (comma separated) with `GEMINI_API_KEY` as fallback.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var("GEMINI_API_KEYS").unwrap_or_default();
        if !raw.trim().is_empty() {
            return Self::new(raw.split(',').map(str::to_string).collect());
        }
        let single = std::env::var("GEMINI_API_KEY").ok().into_iter().collect();
        Self::new(single)
    }

    /// Next `(label, key)` pair.
    pub fn next_key(&self) -> (&str, &str) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        let (label, key) = &self.keys[idx];
        (label, key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub struct GeminiProvider {
    model: String,
    keys: KeyRing,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(model: impl Into<String>, keys: KeyRing, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            model: model.into(),
            keys,
            client,
        })
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &serde_json::Value) -> Option<String> {
    let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let (label, key) = self.keys.next_key();
        let url = format!("{}/{}:generateContent", API_BASE, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        tracing::debug!(model = %self.model, key = label, "Sending Gemini request");
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Transient(e.to_string())
                } else {
                    ProviderError::classify(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let message = format!("Gemini API error {}: {}", status, error_text);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                ProviderError::Transient(message)
            } else {
                ProviderError::Permanent(message)
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("Invalid Gemini response body: {}", e)))?;

        extract_text(&json)
            .ok_or_else(|| ProviderError::Permanent("Gemini response missing candidate text".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ring_rotates_round_robin() {
        let ring = KeyRing::new(vec!["a".into(), " b ".into(), "".into()]).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.next_key(), ("k1", "a"));
        assert_eq!(ring.next_key(), ("k2", "b"));
        assert_eq!(ring.next_key(), ("k1", "a"));
    }

    #[test]
    fn key_ring_requires_a_key() {
        let err = KeyRing::new(vec!["  ".into()]).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEYS"));
    }

    #[test]
    fn extract_text_joins_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "PASS " }, { "text": "looks good" }] }
            }]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("PASS looks good"));
    }

    #[test]
    fn extract_text_missing_candidates() {
        assert!(extract_text(&json!({ "promptFeedback": {} })).is_none());
    }
}
