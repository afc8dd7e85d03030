//! Deadline-bounded retry of upstream attempts.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};

use fieldgate_core::config::{GatewayConfig, RetryMode};

use crate::error::{FetchError, Result};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub mode: RetryMode,
    pub backoff: Duration,
    /// `None`: retry until the deadline.
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            mode: RetryMode::Transient,
            backoff: Duration::from_millis(500),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self {
            mode: cfg.retry_mode,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
            max_attempts: cfg.retry_max_attempts,
        }
    }

    pub fn never() -> Self {
        Self {
            mode: RetryMode::Never,
            ..Self::default()
        }
    }

    /// Whether `err`, returned by attempt number `attempt` (1-based), is retried.
    pub fn should_retry(&self, err: &FetchError, attempt: usize) -> bool {
        if err.is_terminal() {
            return false;
        }
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return false;
        }
        match self.mode {
            RetryMode::Never => false,
            RetryMode::Always => true,
            RetryMode::Transient => err.is_transient(),
        }
    }

    /// Run `op` until it succeeds, fails for good, or `deadline` passes.
    ///
    /// Reaching the deadline always yields [`FetchError::DeadlineExceeded`],
    /// including while an attempt is still in flight or during backoff.
    pub async fn run<T, F, Fut>(&self, deadline: Instant, metrics: &Metrics, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if Instant::now() >= deadline {
                return Err(FetchError::DeadlineExceeded { attempts: attempt });
            }
            attempt += 1;
            let err = match timeout_at(deadline, op(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => {
                    tracing::debug!(attempt, "deadline exceeded during attempt");
                    return Err(FetchError::DeadlineExceeded { attempts: attempt });
                }
            };
            if !self.should_retry(&err, attempt) {
                return Err(err);
            }
            metrics.retry();
            tracing::debug!(
                attempt,
                error = %err,
                backoff_ms = self.backoff.as_millis() as u64,
                "retrying after error"
            );

            let wake = Instant::now() + self.backoff;
            if wake >= deadline {
                sleep_until(deadline).await;
                return Err(FetchError::DeadlineExceeded { attempts: attempt });
            }
            sleep_until(wake).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn modes_classify_errors() {
        let transient = FetchError::from(EngineError::NotReady);
        let other = FetchError::from(EngineError::Protocol("x".into()));
        let closed = FetchError::from(EngineError::Closed);

        let p = RetryPolicy::default();
        assert!(p.should_retry(&transient, 1));
        assert!(!p.should_retry(&other, 1));
        assert!(!p.should_retry(&closed, 1));

        let always = RetryPolicy {
            mode: RetryMode::Always,
            ..RetryPolicy::default()
        };
        assert!(always.should_retry(&other, 1));
        assert!(!always.should_retry(&closed, 1));

        assert!(!RetryPolicy::never().should_retry(&transient, 1));

        let capped = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::default()
        };
        assert!(capped.should_retry(&transient, 1));
        assert!(!capped.should_retry(&transient, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_deadline_then_reports_it() {
        let metrics = Metrics::new();
        let start = Instant::now();
        let deadline = start + Duration::from_secs(5);
        let mut calls = Vec::new();
        let result: Result<()> = RetryPolicy::default()
            .run(deadline, &metrics, |attempt| {
                calls.push((attempt, Instant::now() - start));
                async { Err(FetchError::from(EngineError::Unavailable("refused".into()))) }
            })
            .await;

        assert!(matches!(result, Err(FetchError::DeadlineExceeded { attempts: 10 })));
        assert_eq!(calls.len(), 10);
        for (i, (_, at)) in calls.iter().enumerate() {
            assert_eq!(*at, Duration::from_millis(500 * i as u64));
        }
        assert_eq!(Instant::now() - start, Duration::from_secs(5));
        assert_eq!(metrics.snapshot().retries, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures() {
        let metrics = Metrics::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let value = RetryPolicy::default()
            .run(deadline, &metrics, |attempt| async move {
                if attempt < 3 {
                    Err(FetchError::from(EngineError::NotReady))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_cut_at_the_deadline() {
        let metrics = Metrics::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: Result<()> = RetryPolicy::default()
            .run(deadline, &metrics, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(FetchError::DeadlineExceeded { attempts: 1 })));
    }
}
