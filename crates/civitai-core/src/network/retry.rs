//! Retry policy for catalog requests.
//!
//! Transient failures ([`CivitaiError::is_retryable`]) are retried after a
//! fixed pause; everything else is returned on the first attempt. Jitter
//! can be switched on so parallel clients hitting a 429 do not come back in
//! lockstep. A cancelled token ends the loop, mid-request or mid-pause.

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{CivitaiError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound of the random extra pause, as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one; never below 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(NetworkConfig::MAX_RETRIES, NetworkConfig::RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before the next attempt.
    pub fn pause(&self) -> Duration {
        if !self.jitter || self.delay.is_zero() {
            return self.delay;
        }
        let extra = rand::rng().random_range(0.0..JITTER_FRACTION);
        self.delay.mul_f64(1.0 + extra)
    }
}

/// Result of a retried request with what it cost.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub waited: Duration,
}

impl<T> Attempted<T> {
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Run `request` under `policy`. `what` names the request in log lines.
///
/// Once `cancel` trips, the pending attempt or pause is abandoned and the
/// result is [`CivitaiError::DownloadCancelled`].
pub async fn retry_request<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut request: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut waited = Duration::ZERO;
    let mut attempt = 1;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = request() => Some(outcome),
        };
        let Some(outcome) = outcome else {
            debug!("{} abandoned on attempt {}", what, attempt);
            return Attempted {
                result: Err(CivitaiError::DownloadCancelled),
                attempts: attempt,
                waited,
            };
        };

        let err: CivitaiError = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", what, attempt);
                }
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                    waited,
                };
            }
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            if err.is_retryable() {
                warn!("{} failed after {} attempts: {}", what, attempt, err);
            }
            return Attempted {
                result: Err(err),
                attempts: attempt,
                waited,
            };
        }

        let pause = policy.pause();
        warn!(
            "{} failed (attempt {}/{}): {}. Retrying in {:?}",
            what, attempt, max_attempts, err, pause
        );
        let started = tokio::time::Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} retry abandoned after cancellation", what);
                return Attempted {
                    result: Err(CivitaiError::DownloadCancelled),
                    attempts: attempt,
                    waited: waited + started.elapsed(),
                };
            }
            _ = tokio::time::sleep(pause) => {}
        }
        waited += pause;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> CivitaiError {
        CivitaiError::Api {
            status: 503,
            message: "busy".into(),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.pause(), Duration::from_secs(5));
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10)).with_jitter(true);
        for _ in 0..20 {
            let pause = policy.pause();
            assert!(pause >= Duration::from_secs(10) && pause <= Duration::from_secs(12));
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let outcome = retry_request(&policy, &cancel, "GET models/1", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.waited, Duration::from_millis(10));
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));

        let cancel = CancellationToken::new();

        let outcome = retry_request::<u32, _, _>(&policy, &cancel, "GET models/1", || async {
            Err(server_error())
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(CivitaiError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let outcome = retry_request::<u32, _, _>(&policy, &cancel, "GET models/404", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CivitaiError::NotFound {
                resource: "models/404".into(),
            })
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.waited, Duration::ZERO);
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_cuts_retry_pause_short() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            retry_request::<u32, _, _>(&policy, &cancel, "GET models/1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }),
        )
        .await
        .expect("retry pause ignored cancellation");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(CivitaiError::DownloadCancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_request() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let outcome = retry_request(&policy, &cancel, "GET models/1", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(matches!(outcome.result, Err(CivitaiError::DownloadCancelled)));
    }
}
