// SPDX-License-Identifier: Apache-2.0
//! Retry policy applied around discovery round-trips.

use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, future::Future, time::Duration};
use tracing::debug;

/// Bounded exponential backoff.
///
/// Operations report whether a failure is worth repeating by returning
/// [backoff::Error::transient] or [backoff::Error::permanent]. Transient failures are
/// retried until `max_attempts` is reached or `retrying_max_elapsed_time` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_retry_interval: Duration,
    /// The upper bound for the delay between attempts.
    #[serde(with = "humantime_serde")]
    pub max_retry_interval: Duration,
    /// Growth factor applied to the delay after each attempt.
    pub retry_delay_multiplier: f64,
    /// Random jitter applied to each delay, in the range [0, 1].
    pub retry_delay_rand_factor: f64,
    /// Stop retrying after this much time has passed since the first attempt.
    #[serde(with = "humantime_serde")]
    pub retrying_max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_retry_interval: Duration::from_millis(500),
            max_retry_interval: Duration::from_secs(5),
            retry_delay_multiplier: 2.0,
            retry_delay_rand_factor: 0.1,
            retrying_max_elapsed_time: None,
        }
    }
}

impl RetryConfig {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Check the policy for values that can't produce a schedule.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_attempts == 0 {
            eyre::bail!("retry max_attempts must be at least 1");
        }
        if self.retry_delay_multiplier < 1.0 {
            eyre::bail!("retry_delay_multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.retry_delay_rand_factor) {
            eyre::bail!("retry_delay_rand_factor must be within [0, 1]");
        }
        if self.initial_retry_interval > self.max_retry_interval {
            eyre::bail!("initial_retry_interval exceeds max_retry_interval");
        }
        Ok(())
    }

    /// Run `operation` until it succeeds, fails permanently or the policy is exhausted.
    ///
    /// The last error is returned once attempts run out.
    pub async fn retry<R, E, F, Fut>(self, mut operation: F) -> Result<R, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, backoff::Error<E>>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry_interval)
            .with_max_interval(self.max_retry_interval)
            .with_multiplier(self.retry_delay_multiplier)
            .with_randomization_factor(self.retry_delay_rand_factor)
            .with_max_elapsed_time(self.retrying_max_elapsed_time)
            .build();

        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let attempts = || {
            attempt += 1;
            let last_attempt = attempt >= max_attempts;
            let fut = operation();
            async move {
                fut.await.map_err(|e| match e {
                    backoff::Error::Transient { err, .. } if last_attempt => {
                        backoff::Error::permanent(err)
                    }
                    other => other,
                })
            }
        };

        retry_notify(backoff, attempts, |err: E, delay: Duration| {
            debug!(target: "retry", %err, ?delay, "transient failure, retrying");
        })
        .await
    }
}
