//! Process-wide limiter for outbound AI calls.
//!
//! A token bucket of `capacity` tokens in which every spent token comes back
//! exactly one `window` after it was taken. This bounds admissions in any
//! rolling window to `capacity`, which a continuously refilling bucket does not
//! (a full bucket plus a window's refill would admit twice the limit).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    spent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            window,
            spent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Limiter admitting `calls` per rolling minute.
    pub fn per_minute(calls: u32) -> Self {
        Self::new(calls, Duration::from_secs(60))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until a token is available and take it.
    ///
    /// Only the calling task is suspended; the lock is never held across an await.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut spent = self.spent.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                Self::restore_expired(&mut spent, now, self.window);
                if spent.len() < self.capacity {
                    spent.push_back(now);
                    return;
                }
                // The oldest token comes back first.
                match spent.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "AI rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens that could be taken right now without waiting.
    pub fn available(&self) -> usize {
        let mut spent = self.spent.lock().unwrap_or_else(|e| e.into_inner());
        Self::restore_expired(&mut spent, Instant::now(), self.window);
        self.capacity - spent.len()
    }

    fn restore_expired(spent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = spent.front() {
            if *oldest + window <= now {
                spent.pop_front();
            } else {
                break;
            }
        }
    }
}
