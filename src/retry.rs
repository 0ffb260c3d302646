//! Retrying API calls with exponential backoff.
//!
//! Transport errors, 429 and 502-504 responses are retried until the
//! operation deadline. A 409 is retried only for creates of resources whose
//! API is eventually consistent right after a related create, and only
//! within [`RetryPolicy::conflict_window`].

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

pub use ::backoff::future::retry_notify;
pub use ::backoff::Error as BackoffError;
use tokio::time::Instant;
use tracing::warn;

use crate::api::{ApiError, ApiErrorKind};
use crate::context::OperationContext;
use crate::error::ProviderError;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// First delay.
    pub initial_interval: Duration,
    /// Cap on the delay.
    pub max_interval: Duration,
    /// How long a 409 on create keeps being retried.
    pub conflict_window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            conflict_window: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ::backoff::ExponentialBackoff {
        // The deadline is enforced by the caller, not by the backoff clock.
        ::backoff::ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..::backoff::ExponentialBackoff::default()
        }
    }
}

/// Whether a failed call should be retried.
fn retryable(err: &ApiError, retry_conflict: bool, conflict_until: Instant) -> bool {
    if err.is_transient() {
        return true;
    }
    err.kind == ApiErrorKind::Conflict && retry_conflict && Instant::now() < conflict_until
}

/// Run `op` until it succeeds, fails permanently, or the operation's
/// deadline passes.
pub async fn with_retry<T, F, Fut>(
    ctx: &OperationContext,
    what: &str,
    retry_conflict: bool,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let policy = ctx.meta.retry;
    let conflict_until = Instant::now() + policy.conflict_window;
    let last_error: Mutex<Option<String>> = Mutex::new(None);

    let attempts = retry_notify(
        policy.backoff(),
        || {
            let attempt = op();
            async move {
                attempt.await.map_err(|err| {
                    if retryable(&err, retry_conflict, conflict_until) {
                        BackoffError::transient(err)
                    } else {
                        BackoffError::permanent(err)
                    }
                })
            }
        },
        |err: ApiError, delay: Duration| {
            warn!(what, error = %err, ?delay, "retrying API call");
            if let Ok(mut last) = last_error.lock() {
                *last = Some(err.to_string());
            }
        },
    );

    let result = ctx
        .guard(what, async { attempts.await.map_err(ProviderError::from) })
        .await;

    match result {
        Err(ProviderError::Timeout(message)) => {
            let last = last_error.lock().ok().and_then(|mut l| l.take());
            Err(ProviderError::Timeout(match last {
                Some(last) => format!("{} (last error: {})", message, last),
                None => message,
            }))
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::context::{Operation, ProviderMeta};
    use crate::testing::FakeScaleway;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(timeout: Duration) -> OperationContext {
        let meta = ProviderMeta::new(Arc::new(FakeScaleway::new()), ProviderConfig::default());
        OperationContext::new(
            Arc::new(meta),
            "scaleway_object_bucket_policy",
            Operation::Create,
            timeout,
            CancellationToken::new(),
        )
    }

    fn failing_then_ok(
        failures: u32,
        error: ApiError,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, ApiError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures {
                Err(error.clone())
            } else {
                Ok("done")
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let ctx = context(Duration::from_secs(300));
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(
            &ctx,
            "creating ip",
            false,
            failing_then_ok(3, ApiError::from_status(429, "slow down"), calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let ctx = context(Duration::from_secs(300));
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(
            &ctx,
            "creating ip",
            false,
            failing_then_ok(3, ApiError::from_status(400, "bad request"), calls.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_retried_only_when_flagged() {
        let ctx = context(Duration::from_secs(300));
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(
            &ctx,
            "creating policy",
            false,
            failing_then_ok(2, ApiError::conflict("bucket not ready"), calls.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = Arc::new(AtomicU32::new(0));
        with_retry(
            &ctx,
            "creating policy",
            true,
            failing_then_ok(2, ApiError::conflict("bucket not ready"), calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_window_expires() {
        let ctx = context(Duration::from_secs(600));
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(
            &ctx,
            "creating policy",
            true,
            failing_then_ok(u32::MAX, ApiError::conflict("still busy"), calls.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_last_error() {
        let ctx = context(Duration::from_secs(10));
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(
            &ctx,
            "creating ip",
            false,
            failing_then_ok(u32::MAX, ApiError::transport("connection reset"), calls),
        )
        .await
        .unwrap_err();
        match err {
            ProviderError::Timeout(message) => assert!(message.contains("connection reset")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
