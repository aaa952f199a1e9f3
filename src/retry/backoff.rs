// =============================================================================
// Backoff Driver - exponential backoff with jitter, retry ceiling, and context
// =============================================================================
//
// delay_n = min(initial * multiplier^n, max_interval) * (1 ± randomization)
//
// An operation is attempted once, then retried up to `max_retries` more times
// while it returns a retryable `FetchError`.  Both the attempt and the sleep
// between attempts race against the `Context`, so cancellation is observed
// within one backoff interval at most.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::FetchError;
use crate::retry::Context;

/// Retry ceiling of [`BackoffPolicy::general`].
pub const GENERAL_MAX_RETRIES: u32 = 101;
/// Retry ceiling of [`BackoffPolicy::lite`].
pub const LITE_MAX_RETRIES: u32 = 5;

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_max_elapsed_ms() -> Option<u64> {
    Some(15 * 60_000)
}

fn default_randomization_factor() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    GENERAL_MAX_RETRIES
}

/// Delay curve and retry ceiling for [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Growth factor applied after every retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on a single delay.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Stop retrying once this much time has passed since the first attempt.
    /// `None` means only `max_retries` bounds the loop.
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: Option<u64>,

    /// Jitter as a fraction of the delay, in `0.0..=1.0`.
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// High retry ceiling for callers that must eventually get a full answer.
    pub fn general() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
            randomization_factor: default_randomization_factor(),
            max_retries: GENERAL_MAX_RETRIES,
        }
    }

    /// Low retry ceiling for callers that prefer failing fast.
    pub fn lite() -> Self {
        Self {
            max_retries: LITE_MAX_RETRIES,
            ..Self::general()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial = self.initial_interval_ms as f64;
        let max = self.max_interval_ms as f64;
        let scaled = initial * self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        Duration::from_millis(scaled.min(max) as u64)
    }

    /// Delay before retry number `retry`, with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        if factor == 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(1.0 - factor..=1.0 + factor);
        base.mul_f64(jitter)
    }

    /// Total time budget across all attempts, if any.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_ms.map(Duration::from_millis)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::general()
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, the policy is
/// exhausted, or `ctx` is done.
///
/// Exhaustion yields [`FetchError::Exhausted`] and cancellation yields
/// [`FetchError::Cancelled`], both carrying the last attempt's error.
pub async fn retry_with_backoff<T, F, Fut>(
    ctx: &Context,
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last: Option<FetchError> = None;

    loop {
        if ctx.is_done() {
            return Err(cancelled(attempts, last));
        }

        attempts += 1;
        let outcome = tokio::select! {
            res = op() => res,
            _ = ctx.done() => return Err(cancelled(attempts - 1, last)),
        };

        let err = match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        let retry = attempts - 1;
        if retry >= policy.max_retries {
            error!(attempts, error = %err, "retry ceiling reached, giving up");
            return Err(FetchError::Exhausted {
                attempts,
                last: Box::new(err),
            });
        }

        let delay = policy.delay(retry);
        if let Some(max_elapsed) = policy.max_elapsed() {
            if started.elapsed() + delay > max_elapsed {
                error!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "retry time budget exhausted, giving up"
                );
                return Err(FetchError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
        }

        warn!(
            attempt = attempts,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, backing off"
        );
        last = Some(err);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.done() => return Err(cancelled(attempts, last)),
        }
    }
}

fn cancelled(attempts: u32, last: Option<FetchError>) -> FetchError {
    warn!(attempts, "retry loop cancelled");
    FetchError::Cancelled {
        attempts,
        last: last.map(Box::new),
    }
}
