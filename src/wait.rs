//! Generic state-machine waiter.
//!
//! [`wait_for`] polls a resource until its state tag is terminal, a
//! failure, or the deadline passes. Every resource kind provides only a
//! fetch closure and a projection to its state tag.
//!
//! The waiter holds no locks. It always fetches at least once, even with a
//! deadline in the past, and observes cancellation between polls. A fetch
//! still running at the deadline is abandoned, so a wait never outlasts
//! its deadline by more than one poll interval.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiError;

/// Errors returned by [`wait_for`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed before a terminal state was reached.
    #[error("gave up waiting after {waited:?}, last state {}", last(.last_state))]
    Timeout {
        /// The last state observed.
        last_state: Option<String>,
        /// How long the waiter ran.
        waited: Duration,
    },

    /// The operation was cancelled between polls.
    #[error("wait cancelled, last state {}", last(.last_state))]
    Cancelled {
        /// The last state observed.
        last_state: Option<String>,
    },

    /// The resource reached a failure state.
    #[error("resource reached failure state {state:?}")]
    FailureState {
        /// The failure state.
        state: String,
    },

    /// The resource reported a state that is neither transitional nor terminal.
    #[error("unexpected state {state:?}")]
    UnexpectedState {
        /// The state.
        state: String,
    },

    /// A non-transient API error.
    #[error(transparent)]
    Api(ApiError),
}

fn last(state: &Option<String>) -> String {
    match state {
        Some(state) => format!("{:?}", state),
        None => "unknown".to_string(),
    }
}

/// Increasing polling intervals.
///
/// `fast_polls` polls at `initial`, then intervals grow by `multiplier`
/// up to `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    /// First interval.
    pub initial: Duration,
    /// Number of polls at `initial` before backing off.
    pub fast_polls: u32,
    /// Growth factor after the fast polls.
    pub multiplier: f64,
    /// Cap on the interval.
    pub max: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            fast_polls: 5,
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl PollSchedule {
    /// A constant schedule, used by tests and by short visibility waits.
    pub fn constant(interval: Duration) -> Self {
        Self {
            initial: interval,
            fast_polls: u32::MAX,
            multiplier: 1.0,
            max: interval,
        }
    }

    /// The interval to sleep after poll number `attempt` (0-based).
    pub fn interval(&self, attempt: u32) -> Duration {
        if attempt < self.fast_polls {
            return self.initial.min(self.max);
        }
        let exponent = (attempt - self.fast_polls + 1).min(32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// What a 404 means while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// The resource is gone, which is what we are waiting for.
    Success,
    /// The resource is not visible yet; keep polling for this long.
    RetryFor(Duration),
}

/// What the waiter is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A terminal state.
    States,
    /// The resource disappearing (404 or a deleted state).
    Gone,
}

/// Parameters of one wait.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    /// What is being waited on, for logs.
    pub what: String,
    /// States that mean "keep polling".
    pub transitional: Vec<String>,
    /// States that mean success. When empty, any non-transitional,
    /// non-failure state is success.
    pub terminal: Vec<String>,
    /// States that end the wait with an error.
    pub failure: Vec<String>,
    /// States that mean the resource has been deleted.
    pub deleted: Vec<String>,
    /// Polling intervals.
    pub schedule: PollSchedule,
    /// Absolute deadline.
    pub deadline: Instant,
    /// What a 404 means.
    pub not_found: NotFoundPolicy,
    /// What ends the wait successfully.
    pub target: Target,
}

impl WaitSpec {
    /// Wait for a terminal state.
    pub fn until_ready(what: impl Into<String>, deadline: Instant) -> Self {
        Self {
            what: what.into(),
            transitional: Vec::new(),
            terminal: Vec::new(),
            failure: Vec::new(),
            deleted: Vec::new(),
            schedule: PollSchedule::default(),
            deadline,
            not_found: NotFoundPolicy::RetryFor(Duration::ZERO),
            target: Target::States,
        }
    }

    /// Wait for the resource to disappear.
    pub fn until_gone(what: impl Into<String>, deadline: Instant) -> Self {
        Self {
            not_found: NotFoundPolicy::Success,
            target: Target::Gone,
            ..Self::until_ready(what, deadline)
        }
    }

    /// Set the transitional states.
    pub fn transitional(mut self, states: &[&str]) -> Self {
        self.transitional = to_owned(states);
        self
    }

    /// Set the terminal states.
    pub fn terminal(mut self, states: &[&str]) -> Self {
        self.terminal = to_owned(states);
        self
    }

    /// Set the failure states.
    pub fn failure(mut self, states: &[&str]) -> Self {
        self.failure = to_owned(states);
        self
    }

    /// Set the deleted states.
    pub fn deleted(mut self, states: &[&str]) -> Self {
        self.deleted = to_owned(states);
        self
    }

    /// Set the polling schedule.
    pub fn schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Tolerate 404s for a while, for eventually consistent reads.
    pub fn tolerate_not_found(mut self, window: Duration) -> Self {
        self.not_found = NotFoundPolicy::RetryFor(window);
        self
    }
}

fn to_owned(states: &[&str]) -> Vec<String> {
    states.iter().map(|s| s.to_string()).collect()
}

/// How a wait ended successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// The resource reached a terminal state.
    Reached(T),
    /// The resource is gone.
    Gone,
}

impl<T> WaitOutcome<T> {
    /// The resource, if it still exists.
    pub fn into_resource(self) -> Option<T> {
        match self {
            Self::Reached(resource) => Some(resource),
            Self::Gone => None,
        }
    }
}

enum Poll<T> {
    Done(WaitOutcome<T>),
    Again,
}

/// Poll `fetch` until the resource reaches a state `spec` accepts.
pub async fn wait_for<T, F, Fut, S>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut fetch: F,
    state_of: S,
) -> Result<WaitOutcome<T>, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    S: Fn(&T) -> Option<String>,
{
    let started = Instant::now();
    let mut last_state: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled { last_state });
        }

        // The first fetch may run one interval past the deadline.
        let cutoff = if attempt == 0 {
            spec.deadline.max(started + spec.schedule.interval(0))
        } else {
            spec.deadline
        };
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled { last_state }),
            result = fetch() => result,
            _ = tokio::time::sleep_until(cutoff) => {
                return Err(WaitError::Timeout {
                    last_state,
                    waited: started.elapsed(),
                });
            },
        };

        match classify(spec, polled, &state_of, started, &mut last_state)? {
            Poll::Done(outcome) => {
                debug!(what = %spec.what, attempts = attempt + 1, "wait finished");
                return Ok(outcome);
            },
            Poll::Again => {},
        }

        let now = Instant::now();
        if now >= spec.deadline {
            return Err(WaitError::Timeout {
                last_state,
                waited: now.duration_since(started),
            });
        }

        let sleep = spec
            .schedule
            .interval(attempt)
            .min(spec.deadline.duration_since(now));
        debug!(what = %spec.what, state = ?last_state, ?sleep, "still waiting");
        attempt = attempt.saturating_add(1);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled { last_state }),
            _ = tokio::time::sleep(sleep) => {},
        }
    }
}

fn classify<T, S>(
    spec: &WaitSpec,
    polled: Result<T, ApiError>,
    state_of: &S,
    started: Instant,
    last_state: &mut Option<String>,
) -> Result<Poll<T>, WaitError>
where
    S: Fn(&T) -> Option<String>,
{
    let resource = match polled {
        Ok(resource) => resource,
        Err(err) if err.is_not_found() => {
            return match spec.not_found {
                NotFoundPolicy::Success => Ok(Poll::Done(WaitOutcome::Gone)),
                NotFoundPolicy::RetryFor(window) if started.elapsed() < window => Ok(Poll::Again),
                NotFoundPolicy::RetryFor(_) => Err(WaitError::Api(err)),
            };
        },
        Err(err) if err.is_transient() => {
            debug!(what = %spec.what, error = %err, "transient error while waiting");
            return Ok(Poll::Again);
        },
        Err(err) => return Err(WaitError::Api(err)),
    };

    let state = state_of(&resource);
    *last_state = state.clone();
    let Some(state) = state else {
        // No state field: existing is enough.
        return Ok(match spec.target {
            Target::States => Poll::Done(WaitOutcome::Reached(resource)),
            Target::Gone => Poll::Again,
        });
    };

    let is = |set: &[String]| set.iter().any(|s| *s == state);
    if is(&spec.failure) {
        return Err(WaitError::FailureState { state });
    }
    match spec.target {
        Target::Gone => {
            if is(&spec.deleted) {
                Ok(Poll::Done(WaitOutcome::Gone))
            } else {
                Ok(Poll::Again)
            }
        },
        Target::States => {
            if is(&spec.transitional) {
                Ok(Poll::Again)
            } else if spec.terminal.is_empty() || is(&spec.terminal) {
                Ok(Poll::Done(WaitOutcome::Reached(resource)))
            } else {
                Err(WaitError::UnexpectedState { state })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn states(seq: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<Result<String, ApiError>> {
        let mut i = 0;
        move || {
            let state = seq[i.min(seq.len() - 1)];
            i += 1;
            std::future::ready(Ok(state.to_string()))
        }
    }

    fn spec(deadline: Duration) -> WaitSpec {
        WaitSpec::until_ready("volume", Instant::now() + deadline)
            .transitional(&["creating", "resizing"])
            .terminal(&["available"])
            .failure(&["error"])
    }

    #[test]
    fn test_schedule() {
        let schedule = PollSchedule::default();
        for attempt in 0..5 {
            assert_eq!(schedule.interval(attempt), Duration::from_secs(1));
        }
        assert_eq!(schedule.interval(5), Duration::from_secs(2));
        assert_eq!(schedule.interval(6), Duration::from_secs(4));
        assert_eq!(schedule.interval(9), Duration::from_secs(30));
        assert_eq!(schedule.interval(1000), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_terminal_state() {
        let outcome = wait_for(
            &spec(Duration::from_secs(60)),
            &CancellationToken::new(),
            states(&["creating", "creating", "available"]),
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Reached("available".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state() {
        let err = wait_for(
            &spec(Duration::from_secs(60)),
            &CancellationToken::new(),
            states(&["creating", "error"]),
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err, WaitError::FailureState { state: "error".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state() {
        let err = wait_for(
            &spec(Duration::from_secs(60)),
            &CancellationToken::new(),
            states(&["hotswapping"]),
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::UnexpectedState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_bounded_and_reports_last_state() {
        let deadline = Duration::from_secs(45);
        let started = Instant::now();
        let err = wait_for(
            &spec(deadline),
            &CancellationToken::new(),
            states(&["creating"]),
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed <= deadline + PollSchedule::default().max);
        assert!(elapsed >= deadline);
        match err {
            WaitError::Timeout { last_state, .. } => {
                assert_eq!(last_state.as_deref(), Some("creating"))
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_once_even_past_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let spec = WaitSpec::until_ready("ip", Instant::now());
        let outcome = wait_for(
            &spec,
            &CancellationToken::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok::<_, ApiError>("ready".to_string()))
            },
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, WaitOutcome::Reached(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_means_gone_when_deleting() {
        let spec = WaitSpec::until_gone("cluster", Instant::now() + Duration::from_secs(60))
            .deleted(&["deleted"]);
        let mut calls = 0;
        let outcome = wait_for(
            &spec,
            &CancellationToken::new(),
            || {
                calls += 1;
                std::future::ready(if calls < 3 {
                    Ok("deleting".to_string())
                } else {
                    Err(ApiError::not_found("cluster not found"))
                })
            },
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Gone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_tolerated_briefly_when_creating() {
        let spec = WaitSpec::until_ready("bucket", Instant::now() + Duration::from_secs(300))
            .tolerate_not_found(Duration::from_secs(10))
            .schedule(PollSchedule::constant(Duration::from_secs(1)));
        let mut calls = 0;
        let outcome = wait_for(
            &spec,
            &CancellationToken::new(),
            || {
                calls += 1;
                std::future::ready(if calls < 3 {
                    Err(ApiError::not_found("not yet"))
                } else {
                    Ok("visible".to_string())
                })
            },
            |_: &String| None,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WaitOutcome::Reached(_)));

        let err = wait_for(
            &spec,
            &CancellationToken::new(),
            || std::future::ready(Err::<String, _>(ApiError::not_found("never"))),
            |_: &String| None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::Api(e) if e.is_not_found()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let mut calls = 0;
        let outcome = wait_for(
            &spec(Duration::from_secs(60)),
            &CancellationToken::new(),
            || {
                calls += 1;
                std::future::ready(if calls == 1 {
                    Err(ApiError::from_status(503, "unavailable"))
                } else {
                    Ok("available".to_string())
                })
            },
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WaitOutcome::Reached(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_polls() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });
        let err = wait_for(
            &spec(Duration::from_secs(60)),
            &cancel,
            states(&["creating"]),
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            WaitError::Cancelled {
                last_state: Some("creating".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_is_cut_at_the_deadline() {
        let deadline = Duration::from_secs(5);
        let started = Instant::now();
        let mut calls = 0;
        let err = wait_for(
            &spec(deadline),
            &CancellationToken::new(),
            || {
                calls += 1;
                let hang = calls > 1;
                async move {
                    if hang {
                        tokio::time::sleep(Duration::from_secs(600)).await;
                    }
                    Ok::<_, ApiError>("creating".to_string())
                }
            },
            |s: &String| Some(s.clone()),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() <= deadline + PollSchedule::default().initial);
        match err {
            WaitError::Timeout { last_state, waited } => {
                assert_eq!(last_state.as_deref(), Some("creating"));
                assert!(waited >= deadline);
                assert!(waited < Duration::from_secs(6));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_gets_one_interval_past_an_expired_deadline() {
        let started = Instant::now();
        let spec = WaitSpec::until_ready("ip", started)
            .schedule(PollSchedule::constant(Duration::from_secs(2)));

        let slow = wait_for(
            &spec,
            &CancellationToken::new(),
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ApiError>("ready".to_string())
            },
            |s: &String| Some(s.clone()),
        )
        .await;
        assert!(matches!(slow, Ok(WaitOutcome::Reached(_))));

        let hung = wait_for(
            &spec,
            &CancellationToken::new(),
            || async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok::<_, ApiError>("ready".to_string())
            },
            |s: &String| Some(s.clone()),
        )
        .await;
        assert!(matches!(hung, Err(WaitError::Timeout { last_state: None, .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
