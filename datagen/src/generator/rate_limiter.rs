use std::{future::Future, pin::Pin, time::Duration};

use tokio::time::{Instant, sleep};

/// Token bucket rate limiter gating datapoint emission.
///
/// Tokens refill continuously at `rate` per second, capped by the burst size.
/// Admitting an emission consumes one token.
/// If there is not enough token balance, the limiter sleeps until at least one token is available.
///
/// A limiter without a rate admits everything immediately.
pub(crate) enum RateLimiter {
    Unlimited,
    Limited(TokenBucket),
}

pub(crate) struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Creates a limiter for `rate` emissions per second; `0` disables limiting.
    pub(crate) fn new(rate: u64, burst_size: u32) -> Self {
        if rate == 0 {
            return Self::Unlimited;
        }

        let capacity = burst_size.max(1) as f64;
        Self::Limited(TokenBucket {
            rate: rate as f64,
            capacity,
            tokens: capacity,
            last: Instant::now(),
        })
    }

    pub(crate) fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Waits until the next emission is admitted.
    ///
    /// Fails only when `cancelled` resolves first.
    pub(crate) async fn wait<F>(&mut self, mut cancelled: Pin<&mut F>) -> Result<(), WaitCancelled>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = cancelled.as_mut() => Err(WaitCancelled),
            _ = self.wait_one() => Ok(()),
        }
    }

    async fn wait_one(&mut self) {
        let Self::Limited(bucket) = self else {
            return;
        };

        loop {
            bucket.refill();

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return;
            }

            let missing = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(missing / bucket.rate);

            // Guard against sleeping for zero when we still need to wait.
            let wait = if wait.is_zero() {
                Duration::from_nanos(1)
            } else {
                wait
            };

            sleep(wait).await;
        }
    }
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;

        self.tokens = (self.tokens + dt * self.rate).min(self.capacity);
    }
}

/// The cancellation context of a limiter wait fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCancelled;

impl std::fmt::Display for WaitCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("rate limiter wait cancelled")
    }
}

impl std::error::Error for WaitCancelled {}
