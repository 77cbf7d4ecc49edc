// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Bounded exponential backoff.
//!
//! Sleeps go through [`tokio::time`], so tests running on a paused clock
//! advance through the whole budget without waiting on the wall clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    /// Total time budget. No wait is started that would end past it.
    pub max_elapsed_time: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: constants::CONTAINER_LOOKUP_INITIAL_INTERVAL,
            multiplier: constants::BACKOFF_MULTIPLIER,
            randomization_factor: constants::BACKOFF_RANDOMIZATION_FACTOR,
            max_interval: constants::BACKOFF_MAX_INTERVAL,
            max_elapsed_time: constants::CONTAINER_LOOKUP_MAX_ELAPSED,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial_interval: Duration, max_elapsed_time: Duration) -> Self {
        Self {
            initial_interval,
            max_elapsed_time,
            ..Self::default()
        }
    }

    fn jittered(&self, interval: Duration) -> Duration {
        let delta = interval.as_secs_f64() * self.randomization_factor;
        let low = interval.as_secs_f64() - delta;
        let high = interval.as_secs_f64() + delta;
        Duration::from_secs_f64(low + fastrand::f64() * (high - low))
    }

    fn next_interval(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier).min(self.max_interval)
    }

    /// Runs `operation` until it succeeds or the budget is spent, in which case
    /// the last error is returned. `notify` sees every failed attempt together
    /// with the wait before the next one.
    pub async fn retry<T, E, F, Fut, N>(&self, mut operation: F, mut notify: N) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, Duration),
    {
        let started = Instant::now();
        let mut interval = self.initial_interval;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let wait = self.jittered(interval);
            if started.elapsed() + wait > self.max_elapsed_time {
                return Err(error);
            }

            notify(&error, wait);
            tokio::time::sleep(wait).await;
            interval = self.next_interval(interval);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_within_budget() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(5));
        let started = Instant::now();
        let mut attempts = 0;
        let mut notified = 0;

        let result: Result<(), &str> = backoff
            .retry(
                || {
                    attempts += 1;
                    async { Err("not yet") }
                },
                |_, _| notified += 1,
            )
            .await;

        assert_eq!(result, Err("not yet"));
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert!(attempts > 1);
        assert_eq!(notified, attempts - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(5));
        let mut attempts = 0;

        let result: Result<u32, &str> = backoff
            .retry(
                || {
                    attempts += 1;
                    let current = attempts;
                    async move { if current < 3 { Err("not yet") } else { Ok(current) } }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_makes_a_single_attempt() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::ZERO);
        let mut attempts = 0;

        let result: Result<(), &str> = backoff
            .retry(
                || {
                    attempts += 1;
                    async { Err("gone") }
                },
                |_, _| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_intervals_grow_and_cap() {
        let backoff = ExponentialBackoff {
            multiplier: 2.0,
            max_interval: Duration::from_secs(3),
            ..ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30))
        };

        let second = backoff.next_interval(Duration::from_secs(1));
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(backoff.next_interval(second), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_randomization_factor() {
        let backoff = ExponentialBackoff::default();
        for _ in 0..100 {
            let wait = backoff.jittered(Duration::from_millis(100));
            assert!(wait >= Duration::from_millis(49));
            assert!(wait <= Duration::from_millis(151));
        }
    }
}
