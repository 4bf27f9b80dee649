//! A per-provider token bucket gating outbound LLM calls, so one workflow's
//! burst of requests cannot blow through a provider's rate limit and take
//! down every other workflow sharing it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `capacity` tokens refill continuously over `period`. A call acquires one
/// token; if none are available it waits rather than failing outright,
/// matching SPEC_FULL.md §5's backpressure requirement.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_per_sec = capacity / period.as_secs_f64().max(0.001);
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(u32::MAX, Duration::from_secs(1))
    }

    /// Block the calling task until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_does_not_block_while_capacity_remains() {
        let bucket = TokenBucket::new(5, Duration::from_secs(1));
        for _ in 0..5 {
            bucket.acquire().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill_once_exhausted() {
        let bucket = TokenBucket::new(1, Duration::from_secs(1));
        bucket.acquire().await;
        let start = tokio::time::Instant::now();
        bucket.acquire().await;
        assert!(tokio::time::Instant::now().duration_since(start) >= Duration::from_millis(900));
    }
}
