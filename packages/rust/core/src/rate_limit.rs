//! Token-bucket rate limiter for evaluator calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket of `capacity` tokens, one token added per `refill_every`.
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Allow a burst of `per_minute` calls, then one every `60s / per_minute`.
    pub fn per_minute(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        Self::new(per_minute, Duration::from_secs(60) / per_minute)
    }

    /// Wait for a token and consume it.
    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if !self.refill_every.is_zero() && elapsed >= self.refill_every {
                let refills = (elapsed.as_nanos() / self.refill_every.as_nanos()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill += self.refill_every * refills;
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every.saturating_sub(state.last_refill.elapsed());
            drop(state);
            tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
        }
    }

    /// Tokens currently available (without refilling).
    #[cfg(test)]
    async fn available(&self) -> u32 {
        self.state.lock().await.tokens
    }
}
