//! Exponential backoff for fallible async operations.
//!
//! The operation is attempted up to `max_attempts` times. After failed attempt
//! `k` (1-based), if another attempt remains, the retrier sleeps
//! `base_delay * multiplier^(k-1)`. With the defaults (3 attempts, 300ms, x3)
//! an always-failing operation waits 300ms and then 900ms before giving up.
//!
//! The last error is returned unchanged so callers keep its classification.

use solace_common::RetrySettings;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            multiplier: 3,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps; useful when the caller handles pacing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor))
    }

    /// Sum of all delays an always-failing operation goes through.
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for(attempt))
            .sum()
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `label` names the operation in log records.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_backoff_when(policy, label, op, |_| true).await
}

/// Like [`retry_with_backoff`], but an error for which `retryable` returns
/// `false` is returned at once.
pub async fn retry_with_backoff_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = label,
                        attempt,
                        max_attempts,
                        "Operation recovered after retries"
                    );
                } else {
                    tracing::debug!(operation = label, attempt, "Attempt succeeded");
                }
                return Ok(value);
            }
            Err(e) if !retryable(&e) => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    error = %e,
                    "Attempt failed, error is not retryable"
                );
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Attempt failed, no more retries"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
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
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CaptureWriter {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn default_delays_grow_by_three() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for(2), Duration::from_millis(900));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2700));
        assert_eq!(policy.total_delay(), Duration::from_millis(1200));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            max_attempts: 100,
            base_delay: Duration::from_millis(300),
            multiplier: 3,
        };
        assert_eq!(policy.delay_for(90), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn policy_from_settings() {
        let policy = RetryPolicy::from(&RetrySettings {
            max_attempts: 5,
            base_delay_ms: 10,
            multiplier: 2,
        });
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> =
            retry_with_backoff(&RetryPolicy::immediate(3), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("done") }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&RetryPolicy::default(), "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(format!("failure {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_exactly_max_attempts() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = retry_with_backoff(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {n}")) }
        })
        .await;

        let elapsed = started.elapsed();
        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(elapsed >= policy.total_delay(), "elapsed {elapsed:?}");
        assert!(
            elapsed < policy.total_delay() + Duration::from_millis(50),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> =
            retry_with_backoff(&RetryPolicy::immediate(0), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logs_every_failed_attempt() {
        let writer = CaptureWriter::default();
        let sink = writer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let _: Result<(), &str> = retry_with_backoff(&RetryPolicy::default(), "upstream", || async {
            Err("connection refused")
        })
        .await;

        let logs = writer.contents();
        assert_eq!(logs.matches("Attempt failed, retrying").count(), 2);
        assert_eq!(logs.matches("Attempt failed, no more retries").count(), 1);
        assert!(logs.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry_with_backoff_when(
            &RetryPolicy::default(),
            "test",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            |e: &String| e != "fatal",
        )
        .await;

        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
