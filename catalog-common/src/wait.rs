use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;

const MAX_WAIT_ITERATIONS: usize = 50;
const DEFAULT_CAP: Duration = Duration::from_secs(10);

/// Sleeps through `n` capped exponential-backoff attempts, honoring
/// cancellation. Used by C1's reconnect loop (`SPEC_FULL.md` §4.1).
pub async fn wait_with_backoff(cancel: &CancellationToken, n: usize, cap: Duration) -> Result<()> {
    let n = n.clamp(1, MAX_WAIT_ITERATIONS);
    let base = Duration::from_millis(250);

    for attempt in 0..n {
        let delay = backoff_full_jitter(base, cap, attempt);

        tokio::select! {
            _ = cancel.cancelled() => bail!("context cancelled"),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Ok(())
}

pub async fn wait(cancel: &CancellationToken, n: usize) -> Result<()> {
    wait_with_backoff(cancel, n, DEFAULT_CAP).await
}

/// Exponential backoff w/ "full jitter": sleep for a random duration in
/// `[0, min(cap, base * 2^attempt)]`. Behaves well under contention and
/// avoids lockstep retries across replicas.
pub fn backoff_full_jitter(base: Duration, cap: Duration, attempt: usize) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;

    let pow = if attempt >= 63 { u64::MAX } else { 1u64 << attempt };

    let exp_ms = base_ms.saturating_mul(pow);
    let upper = exp_ms.min(cap_ms).max(1); // avoid 0ms upper bound

    let jitter_ms = rand::random_range(0..=upper);
    Duration::from_millis(jitter_ms)
}

/// A plain token bucket, refilled continuously at `rate_per_sec` up to
/// `burst`. `catalog_operator::queue::RateLimiter` composes one of these
/// with per-key exponential backoff for the resolve queue's overall
/// throttle (`spec.md` §5, last paragraph).
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec,
            burst,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.burst);
        self.last_refill = now;
    }

    /// Attempts to take one token; returns `false` (caller should wait) if
    /// the bucket is empty.
    pub fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until at least one token will be available.
    pub fn next_available_in(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.rate_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        let cap = Duration::from_secs(5);
        for attempt in 0..40 {
            let d = backoff_full_jitter(Duration::from_millis(100), cap, attempt);
            assert!(d <= cap, "attempt {attempt} produced {d:?} > cap {cap:?}");
        }
    }

    #[test]
    fn token_bucket_exhausts_then_refills() {
        let mut bucket = TokenBucket::new(1000.0, 2.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_take());
    }
}
