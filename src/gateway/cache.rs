use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A cached AI answer and the decision the calling engine derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

/// Fingerprint → response map owned by one phase of one run.
///
/// Append-only: an existing entry is never replaced and nothing is evicted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AiCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl AiCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&CacheEntry> {
        self.entries.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Store a response. Returns `false` if the fingerprint was already present.
    pub fn insert(&mut self, fingerprint: String, response: String) -> bool {
        if self.entries.contains_key(&fingerprint) {
            return false;
        }
        self.entries.insert(
            fingerprint,
            CacheEntry {
                response,
                decision: None,
            },
        );
        true
    }

    /// Attach the decision an engine derived from a cached response.
    /// A decision, once recorded, is kept.
    pub fn record_decision(&mut self, fingerprint: &str, decision: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(fingerprint)
            && entry.decision.is_none()
        {
            entry.decision = Some(decision.into());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
