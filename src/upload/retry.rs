//! Retry policy for connecting and posting
//!
//! Every failure is reduced to an [`ErrorClass`]; the policy turns the class
//! and the number of failures so far into a [`RetryDecision`]. Delays are
//! fixed, growing only when header checking is enabled.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ErrorClass, UlNzbError, UploadError};

/// Extra wait per consecutive failure when header checking is enabled
pub const HEADER_CHECK_STEP: Duration = Duration::from_secs(4);

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try again; `reconnect` drops the current session first
    Retry { delay: Duration, reconnect: bool },
    /// Transient error, but the attempt budget is spent
    GiveUp,
    /// Fatal error, stop the whole run
    Abort,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub reconnect_delay: Duration,
    pub header_check: bool,
    /// Attempts per article, 0 is unlimited
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(config.usenet.reconnect_delay),
            header_check: config.posting.header_check,
            max_attempts: config.usenet.retry_attempts,
        }
    }

    /// Decide after the `failures`-th consecutive failure (1-based)
    pub fn decide(&self, class: ErrorClass, failures: u32) -> RetryDecision {
        if !class.is_transient() {
            return RetryDecision::Abort;
        }
        if self.max_attempts != 0 && failures >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.retry_delay(failures),
            reconnect: matches!(class, ErrorClass::Transport | ErrorClass::Protocol),
        }
    }

    /// Wait before re-posting a chunk
    pub fn retry_delay(&self, failures: u32) -> Duration {
        if self.header_check {
            self.reconnect_delay + HEADER_CHECK_STEP * failures
        } else {
            self.reconnect_delay
        }
    }

    /// Wait before STAT-checking an article that needed `failures` retries
    pub fn stat_delay(&self, failures: u32) -> Duration {
        Duration::from_secs(1) + HEADER_CHECK_STEP * failures
    }

    /// Wait between connection attempts
    pub fn connect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            header_check: false,
            max_attempts: 0,
        }
    }
}

/// Sleep unless cancelled first
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run `operation` until it succeeds, fails fatally or the run is cancelled
///
/// Used for establishing sessions, which never give up on transient errors.
pub async fn retry_forever<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut operation: F,
) -> Result<T, UlNzbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UlNzbError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled.into()),
            result = operation() => result,
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "{} succeeded after retry", what);
                }
                return Ok(value);
            }
            Err(e) if e.class().is_transient() => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    delay_s = policy.connect_delay().as_secs(),
                    "{} failed, retrying",
                    what
                );
                sleep_or_cancel(policy.connect_delay(), cancel).await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "{} failed", what);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NntpError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            reconnect_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_decisions_by_class() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorClass::Transport, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(5),
                reconnect: true
            }
        );
        assert_eq!(
            policy.decide(ErrorClass::PostingTransient, 7),
            RetryDecision::Retry {
                delay: Duration::from_secs(5),
                reconnect: false
            }
        );
        assert_eq!(policy.decide(ErrorClass::Authentication, 1), RetryDecision::Abort);
        assert_eq!(policy.decide(ErrorClass::PostingFatal, 1), RetryDecision::Abort);
        assert_eq!(policy.decide(ErrorClass::Local, 1), RetryDecision::Abort);
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            policy.decide(ErrorClass::PostingTransient, 2),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(ErrorClass::PostingTransient, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_header_check_delays_grow() {
        let policy = RetryPolicy {
            reconnect_delay: Duration::from_secs(2),
            header_check: true,
            max_attempts: 0,
        };
        assert_eq!(policy.retry_delay(1), Duration::from_secs(6));
        assert_eq!(policy.retry_delay(3), Duration::from_secs(14));
        assert_eq!(policy.stat_delay(0), Duration::from_secs(1));
        assert_eq!(policy.stat_delay(2), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_retry_forever_recovers_from_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();
        let value = retry_forever(&quick(), &cancel, "connect", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NntpError::ConnectionClosed.into())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_forever_stops_on_fatal() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();
        let result: Result<(), _> = retry_forever(&quick(), &cancel, "connect", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NntpError::AuthFailed("481".to_string()).into())
        })
        .await;
        assert_eq!(result.unwrap_err().class(), ErrorClass::Authentication);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_forever_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = retry_forever(&quick(), &cancel, "connect", || async {
            Err(NntpError::ConnectionClosed.into())
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
