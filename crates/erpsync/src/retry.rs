//! Bounded retry with exponential backoff for calls against external systems.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::sync::{
    DEFAULT_MAX_RETRIES, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, ProgressCallback, SyncProgress, emit,
};

/// Backoff policy shared by every ERP and CRM call of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// First backoff delay.
    pub min_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Retries after the first call. 0 disables retrying.
    pub max_retries: usize,
    /// Randomize delays so parallel records don't retry in lockstep.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set the retry count, keeping the delays.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Exponential backoff doubling from `min_delay` up to `max_delay`.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.with_jitter {
            backoff.with_jitter()
        } else {
            backoff
        }
    }
}

/// Errors that can carry a server-requested wait before the next attempt.
pub trait RetryHint {
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Execute an operation, retrying while `is_transient` says the error may clear.
///
/// Each retry is logged at debug level and reported as
/// [`SyncProgress::RetryBackoff`]. A wait requested by the server (429
/// `Retry-After`) is a floor on the next delay. Once retries are exhausted the
/// last error is returned unchanged.
///
/// # Example
///
/// ```ignore
/// use erpsync::error::{ClientError, short_error_message};
/// use erpsync::retry::{RetryConfig, with_retry};
///
/// let id = with_retry(
///     &RetryConfig::default(),
///     || async { client.create(kind, &props).await },
///     ClientError::is_transient,
///     short_error_message,
///     "create quote 5001",
///     None,
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, IsTransient, ShortMsg>(
    config: &RetryConfig,
    mut operation: F,
    is_transient: IsTransient,
    short_message: ShortMsg,
    label: &str,
    on_progress: Option<&ProgressCallback>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + RetryHint + Send + Sync + 'static,
    IsTransient: Fn(&E) -> bool,
    ShortMsg: Fn(&E) -> String,
{
    let calls = AtomicU32::new(0);
    let call = || {
        calls.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    call.retry(config.clone().into_backoff())
        .when(|e| is_transient(e))
        .adjust(|err, delay| {
            delay.map(|delay| match err.retry_after() {
                Some(wait) => delay.max(wait),
                None => delay,
            })
        })
        .notify(|err, delay| {
            let attempt = calls.load(Ordering::SeqCst);
            let error = short_message(err);
            tracing::debug!(
                operation = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            emit(
                on_progress,
                SyncProgress::RetryBackoff {
                    operation: label.to_string(),
                    retry_after_ms: delay.as_millis() as u64,
                    attempt,
                    error,
                },
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, short_error_message};
    use std::sync::{Arc, Mutex};

    #[test]
    fn default_policy_is_three_retries_from_one_second() {
        let config = RetryConfig::default();
        assert_eq!(config.min_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(config.with_jitter);

        let tuned = RetryConfig::new(Duration::from_millis(5), Duration::from_millis(50), 9)
            .with_max_retries(1)
            .with_jitter(false);
        assert_eq!(tuned.max_retries, 1);
        assert!(!tuned.with_jitter);
    }

    /// Fails with `status` for the first `failures` calls, then returns the call count.
    fn flaky(
        status: u16,
        failures: u32,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<u32, ClientError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n <= failures {
                Err(ClientError::from_status(status, b"slow down", None))
            } else {
                Ok(n)
            })
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_call_is_retried_and_reported() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        });
        let (calls, op) = flaky(429, 2);

        let result = with_retry(
            &RetryConfig::default(),
            op,
            ClientError::is_transient,
            short_error_message,
            "create quote 5001",
            Some(&callback),
        )
        .await;

        assert_eq!(result.expect("third call succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SyncProgress::RetryBackoff {
                    operation,
                    attempt,
                    error,
                    ..
                } if operation == "create quote 5001" && error == "Rate limited" => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_give_up_after_max_retries() {
        let (calls, op) = flaky(503, u32::MAX);

        let err = with_retry(
            &RetryConfig::default().with_max_retries(2),
            op,
            ClientError::is_transient,
            short_error_message,
            "search deals",
            None,
        )
        .await
        .expect_err("never recovers");

        assert!(matches!(err, ClientError::Server { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_requested_wait_outlasts_backoff() {
        let mut throttled = true;
        let op = move || {
            let result = if std::mem::take(&mut throttled) {
                Err(ClientError::from_status(
                    429,
                    b"slow down",
                    Some(Duration::from_secs(10)),
                ))
            } else {
                Ok(())
            };
            std::future::ready(result)
        };
        let delays = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&delays);
        let callback: ProgressCallback = Box::new(move |event| {
            if let SyncProgress::RetryBackoff { retry_after_ms, .. } = event {
                capture
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(retry_after_ms);
            }
        });

        let started = tokio::time::Instant::now();
        with_retry(
            &RetryConfig::default().with_jitter(false),
            op,
            ClientError::is_transient,
            short_error_message,
            "search companies",
            Some(&callback),
        )
        .await
        .expect("second call succeeds");

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(*delays.lock().unwrap_or_else(|e| e.into_inner()), vec![10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_server_wait_keeps_backoff_delay() {
        let mut throttled = true;
        let op = move || {
            let result = if std::mem::take(&mut throttled) {
                Err(ClientError::from_status(
                    429,
                    b"",
                    Some(Duration::from_millis(10)),
                ))
            } else {
                Ok(())
            };
            std::future::ready(result)
        };

        let started = tokio::time::Instant::now();
        with_retry(
            &RetryConfig::default().with_jitter(false),
            op,
            ClientError::is_transient,
            short_error_message,
            "search companies",
            None,
        )
        .await
        .expect("second call succeeds");

        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rejected_payload_is_not_retried() {
        let (calls, op) = flaky(400, u32::MAX);

        let err = with_retry(
            &RetryConfig::default(),
            op,
            ClientError::is_transient,
            short_error_message,
            "update company 42",
            None,
        )
        .await
        .expect_err("permanent");

        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
