//! Bounded retry with a constant wait, wrapped uniformly around every external pipeline stage.

use crate::error::SyncError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One step of the sync pipeline, used to label retry logging and error context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Trigger,
    Resolve,
    Fetch,
    Append,
}

serde_plain::derive_display_from_serialize!(Stage);

/// Runs a fallible async operation up to `max_attempts` times with a constant `wait` between
/// attempts. The backoff is deliberately constant, not exponential: every wait in this pipeline
/// is pacing an external system (an email arriving, an API quota window), not easing load.
#[derive(Debug, Clone)]
pub(crate) struct Retry {
    stage: Stage,
    max_attempts: u32,
    wait: Duration,
}

impl Retry {
    pub(crate) fn new(stage: Stage, max_attempts: u32, wait: Duration) -> Self {
        Self {
            stage,
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    /// Executes `op`. Success returns immediately. The final attempt's failure propagates
    /// unchanged so the original cause is never masked. In between:
    ///
    /// - [`SyncError::NotFoundYet`] is an expected polling condition, logged at debug only;
    /// - [`SyncError::Cancelled`] means the user abandoned an interactive step, so the attempt
    ///   is dropped and the next one starts cleanly;
    /// - anything else logs a warning.
    pub(crate) async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    if SyncError::is_not_found_yet(&e) {
                        debug!(
                            "The {} stage found nothing yet (attempt {attempt}/{}), waiting \
                            {:?} before checking again",
                            self.stage, self.max_attempts, self.wait
                        );
                    } else if SyncError::is_cancelled(&e) {
                        info!(
                            "The {} stage was cancelled on attempt {attempt}/{}; starting the \
                            next attempt cleanly",
                            self.stage, self.max_attempts
                        );
                    } else {
                        warn!(
                            "The {} stage failed on attempt {attempt}/{}: {e:#}",
                            self.stage, self.max_attempts
                        );
                    }
                }
            }
            tokio::time::sleep(self.wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn retry(max_attempts: u32) -> Retry {
        Retry::new(Stage::Fetch, max_attempts, Duration::ZERO)
    }

    /// Counts the sleeps performed by a paused-time runtime: with `start_paused`, every sleep
    /// advances the mock clock, so elapsed time divided by the wait gives the wait count.
    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt_waits_twice() {
        let wait = Duration::from_secs(5);
        let retry = Retry::new(Stage::Fetch, 3, wait);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let start = tokio::time::Instant::now();
        let result = retry
            .run(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(anyhow!("boom {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), wait * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_original_error() {
        let wait = Duration::from_secs(5);
        let retry = Retry::new(Stage::Append, 4, wait);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let start = tokio::time::Instant::now();
        let err = retry
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow!("always fails"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "always fails");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), wait * 3);
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry(3)
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_only_the_current_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry(2)
            .run(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Err(SyncError::Cancelled.into())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_yet_exhaustion_surfaces_not_found() {
        let err = retry(3)
            .run(|| async { Err::<(), _>(SyncError::NotFoundYet.into()) })
            .await
            .unwrap_err();
        assert!(SyncError::is_not_found_yet(&err));
    }

    #[tokio::test]
    async fn test_single_attempt_never_waits() {
        let err = retry(1)
            .run(|| async { Err::<(), _>(anyhow!("nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
