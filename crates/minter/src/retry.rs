//! Retry utilities with exponential backoff for transient RPC failures.

use rand::Rng;
use std::{fmt, time::Duration};
use tracing::{debug, warn};

const INITIAL_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 30_000;
const MAX_RETRIES: usize = 10;

/// Errors that may succeed when the same call is repeated.
pub trait Transient: fmt::Display {
    fn is_transient(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

impl Transient for eyre::Report {}

pub(crate) fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("connection")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("429")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("network")
        || msg.contains("reset by peer")
        || msg.contains("broken pipe")
        || msg.contains("eof")
}

fn compute_delay(attempt: usize, max_delay_ms: u64) -> Duration {
    let base_delay = INITIAL_DELAY_MS.saturating_mul(1 << attempt.min(10));
    let capped_delay = base_delay.min(max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped_delay / 4);
    Duration::from_millis(capped_delay + jitter)
}

/// Backoff parameters of [`with_retry_policy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            max_delay_ms: MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up after the first failure.
    pub const NO_RETRY: Self = Self {
        max_retries: 0,
        max_delay_ms: 0,
    };
}

pub async fn with_retry<F, Fut, T, E>(operation_name: &str, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
{
    with_retry_policy(operation_name, RetryPolicy::default(), f).await
}

pub async fn with_retry_policy<F, Fut, T, E>(
    operation_name: &str,
    policy: RetryPolicy,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_transient() {
                    debug!(
                        operation = %operation_name,
                        error = %err,
                        "Non-transient error, not retrying"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = %attempt,
                        error = %err,
                        "Max retries exceeded"
                    );
                    return Err(err);
                }

                let delay = compute_delay(attempt, policy.max_delay_ms);
                warn!(
                    operation = %operation_name,
                    attempt = %(attempt + 1),
                    max_attempts = %policy.max_retries,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "Transient RPC error, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_transient_messages() {
        assert!(is_transient_message("error sending request: connection refused"));
        assert!(is_transient_message("HTTP 429 Too Many Requests"));
        assert!(!is_transient_message("execution reverted"));
        assert!(!is_transient_message("nonce too low"));
    }

    #[test]
    fn test_delay_is_capped() {
        for attempt in 0..20 {
            let delay = compute_delay(attempt, MAX_DELAY_MS);
            assert!(delay.as_millis() <= (MAX_DELAY_MS + MAX_DELAY_MS / 4) as u128);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = &AtomicUsize::new(0);
        let result: eyre::Result<u32> = with_retry("flaky", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(eyre::eyre!("connection reset by peer"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = &AtomicUsize::new(0);
        let result: eyre::Result<()> = with_retry("reverted", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre::eyre!("execution reverted"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
