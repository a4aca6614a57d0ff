//! Generic network retry executor.
//!
//! Any operation that calls an external service (transcription, connector
//! API calls) runs through [`retry_with_backoff`]: exponential backoff with
//! jitter, a configurable attempt budget, and a predicate classifying which
//! errors are worth retrying. The executor knows nothing about command
//! records.

use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Default maximum number of attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff in milliseconds
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single backoff delay in seconds
const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Backoff schedule for a retry loop.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempt budget (first try included).
    pub max_retries: u32,
    /// Delay after the first failure; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl BackoffPolicy {
    /// The delay before retry number `attempt` (1-based): `base *
    /// 2^(attempt-1)`, jittered by a factor in [0.5, 1.5], capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jittered = exp.mul_f64(jitter_factor());
        jittered.min(self.max_delay)
    }
}

/// Pseudo-random jitter factor in [0.5, 1.5].
///
/// Derived from UUID v4 entropy, which the crate already carries for ids;
/// backoff spreading does not need a dedicated RNG.
fn jitter_factor() -> f64 {
    let bits = (Uuid::new_v4().as_u128() & 0xFFFF) as f64;
    0.5 + bits / 65535.0
}

/// The retry budget was consumed without a success.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("all {attempts} retry attempt(s) failed: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: anyhow::Error,
    },
}

impl RetryError {
    /// The last underlying failure.
    pub fn last_error(&self) -> &anyhow::Error {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Runs `op` until it succeeds or the attempt budget is exhausted.
///
/// `op` receives the 1-based attempt number. A failure `classify` deems
/// non-retryable ends the loop immediately; either way the final failure is
/// wrapped in [`RetryError::Exhausted`]. The delays between attempts are
/// the only suspension points the executor introduces; dropping the future
/// during a delay abandons the loop without partial state.
pub async fn retry_with_backoff<T, Fut, Op, C>(
    policy: &BackoffPolicy,
    classify: C,
    mut op: Op,
) -> Result<T, RetryError>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    C: Fn(&Error) -> bool,
{
    let mut last_error: Option<Error> = None;
    let mut attempts = 0;

    for attempt in 1..=policy.max_retries.max(1) {
        attempts = attempt;
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if !classify(&e) || attempt == policy.max_retries.max(1) {
                    tracing::error!("Operation failed (attempt {}): {}", attempt, e);
                    last_error = Some(e);
                    break;
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "Operation failed (attempt {}), retrying in {}ms: {}",
                    attempt,
                    delay.as_millis(),
                    e
                );
                last_error = Some(e);
                sleep(delay).await;
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts,
        last_error: last_error.unwrap_or_else(|| anyhow::anyhow!("unknown")),
    })
}

/// [`retry_with_backoff`] with the default transport-failure classifier.
pub async fn retry_transport<T, Fut, Op>(policy: &BackoffPolicy, op: Op) -> Result<T, RetryError>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_with_backoff(policy, is_transport_error, op).await
}

/// Default retryability classification: transport-level failures are worth
/// retrying, everything else is not.
///
/// Walks the error chain looking for a timed-out or connection-level
/// failure from either the HTTP client or raw socket I/O. TLS handshake
/// failures surface as connect errors and are covered by the same check.
pub fn is_transport_error(err: &Error) -> bool {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() || e.is_connect() {
                return true;
            }
        }

        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::HostUnreachable
                    | std::io::ErrorKind::NetworkUnreachable
            ) {
                return true;
            }
        }
    }

    false
}
