//! AI Gateway: the single choke point between the rubric engines and the
//! external generative-AI service.
//!
//! ## Call path
//!
//! ```text
//! engine ──call(prompt, &mut cache)──> fingerprint = sha256(model \n prompt)
//!                                          │
//!                     cache hit ───────────┤──> cached response (no outbound call)
//!                                          │
//!                     cache miss ──> min-interval spacing (optional)
//!                                 ──> RateLimiter::acquire (shared, process-wide)
//!                                 ──> AiProvider::generate
//!                                       transient error → backoff, retry
//!                                       permanent error → GatewayError::Rejected
//!                                 ──> cache.insert(fingerprint, response)
//! ```
//!
//! Caches are per run and per phase and travel with the run row, so an
//! identical prompt is paid for at most once per run across re-enqueues.

pub mod cache;
pub mod gemini;
#[cfg(test)]
pub mod mock;
pub mod provider;
pub mod rate_limit;
pub mod retry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::errors::GatewayError;
use cache::AiCache;
use provider::AiProvider;
use rate_limit::RateLimiter;
use retry::RetryPolicy;

/// Content hash of a fully rendered prompt for a given model.
pub fn fingerprint(model: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Response returned to an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub fingerprint: String,
    pub text: String,
    pub cached: bool,
}

/// Cumulative counters for one gateway, logged after every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub outbound_calls: u64,
}

pub struct AiGateway {
    provider: Arc<dyn AiProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    min_interval: Option<Duration>,
    last_call: tokio::sync::Mutex<Option<Instant>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    outbound_calls: AtomicU64,
}

impl AiGateway {
    pub fn new(provider: Arc<dyn AiProvider>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            limiter,
            retry,
            min_interval: None,
            last_call: tokio::sync::Mutex::new(None),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            outbound_calls: AtomicU64::new(0),
        }
    }

    /// Enforce a minimum gap between outbound calls made through this gateway.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn fingerprint(&self, prompt: &str) -> String {
        fingerprint(self.provider.model(), prompt)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            outbound_calls: self.outbound_calls.load(Ordering::Relaxed),
        }
    }

    /// Answer `prompt`, from `cache` when possible.
    pub async fn call(&self, prompt: &str, cache: &mut AiCache) -> Result<GatewayReply, GatewayError> {
        let fingerprint = self.fingerprint(prompt);

        if let Some(entry) = cache.get(&fingerprint) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %short(&fingerprint), "AI cache hit");
            return Ok(GatewayReply {
                fingerprint,
                text: entry.response.clone(),
                cached: true,
            });
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            self.wait_for_interval().await;
            self.limiter.acquire().await;
            self.outbound_calls.fetch_add(1, Ordering::Relaxed);

            tracing::debug!(
                fingerprint = %short(&fingerprint),
                attempt,
                max_attempts = self.retry.max_attempts,
                "AI request"
            );

            match self.provider.generate(prompt).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        return Err(GatewayError::EmptyResponse);
                    }
                    cache.insert(fingerprint.clone(), text.clone());
                    return Ok(GatewayReply {
                        fingerprint,
                        text,
                        cached: false,
                    });
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt < self.retry.max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retryable AI error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "AI request rejected");
                    return Err(GatewayError::Rejected(e.to_string()));
                }
            }
        }

        Err(GatewayError::Exhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    async fn wait_for_interval(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };
        // Held across the sleep so concurrent callers queue up behind each other.
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}
