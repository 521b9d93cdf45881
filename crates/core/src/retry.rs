//! Bounded retry for compare-and-swap writes and monotonic reads.

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// No sleeping between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts.max(1), Duration::from_millis(config.backoff_ms))
    }
}

/// Runs a read-modify-write operation, re-running it from the read while it
/// fails with a retryable error.
///
/// `op` must re-read whatever it modifies on every call.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last retryable one once
/// `policy.max_attempts` is exhausted.
pub async fn retry_on_contention<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                debug!(label, attempt, error = %e, "Retrying after contention");
                attempt += 1;
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fails with [`EngineError::StaleZeroReading`] when `actual` regresses below
/// the last known value.
///
/// # Errors
///
/// See above.
pub fn ensure_monotonic(what: &str, expected: Decimal, actual: Decimal) -> EngineResult<Decimal> {
    if actual < expected {
        return Err(EngineError::StaleZeroReading {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

/// Re-reads a value expected not to drop below `floor`, up to the policy's
/// attempt budget.
///
/// # Errors
///
/// Returns [`EngineError::StaleZeroReading`] if every attempt reads below
/// `floor`; other read errors pass through.
pub async fn read_monotonic<F, Fut>(
    policy: RetryPolicy,
    what: &str,
    floor: Decimal,
    mut read: F,
) -> EngineResult<Decimal>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<Decimal>>,
{
    retry_on_contention(policy, what, || {
        let value = read();
        async move { ensure_monotonic(what, floor, value.await?) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_contention_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_contention(RetryPolicy::immediate(3), "counter", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Contention("counter".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry_on_contention(RetryPolicy::immediate(2), "counter", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Contention("counter".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Contention(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = retry_on_contention(RetryPolicy::immediate(5), "order", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::OrderRejected("timeout".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::OrderRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_zero_read_recovers_on_retry() {
        let calls = AtomicU32::new(0);
        let value = read_monotonic(RetryPolicy::immediate(3), "size", dec!(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n == 0 { dec!(0) } else { dec!(10) }) }
        })
        .await;
        assert_eq!(value.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn persistent_stale_read_is_reported() {
        let value = read_monotonic(RetryPolicy::immediate(3), "size", dec!(10), || async { Ok(dec!(0)) }).await;
        assert!(matches!(value, Err(EngineError::StaleZeroReading { .. })));
    }
}
