//! The cancelable retry driver.
//!
//! Wraps a [`ScoreSource`] in the bounded-backoff loop: attempt, wait
//! `delay(n)`, attempt again, up to the policy's ceiling. Cancellation is
//! observed both mid-sleep and mid-flight, so a torn-down cycle performs
//! zero further calls.

use crate::backoff::RetryPolicy;
use crate::client::{ReviewRequest, ScoreSource};
use crate::error::ReviewError;
use rehearse_types::Review;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

/// Observable progress of a fetch cycle.
///
/// Enough for a caller to drive a capped progress indicator: the attempt
/// number and the elapsed wall-clock time. The cap itself is the
/// caller's presentational concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct FetchProgress {
    /// 0-indexed attempt currently in flight (or just finished).
    pub attempt: u32,
    pub elapsed_ms: u64,
}

/// Drives retries of a [`ScoreSource`] under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewRetriever {
    policy: RetryPolicy,
}

impl ReviewRetriever {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs a full fetch cycle.
    ///
    /// Attempt 0 fires immediately; retry `n` waits `delay(n)` after the
    /// previous failure. The `cancel` channel aborts the cycle at the
    /// next suspension point — a pending sleep or an in-flight request.
    /// Progress is published through `progress` when provided.
    ///
    /// # Errors
    ///
    /// `ReviewError::ExhaustedRetries` after `max_retries + 1` failed
    /// calls; `ReviewError::Cancelled` when cancelled.
    pub async fn fetch<S: ScoreSource + ?Sized>(
        &self,
        source: &S,
        request: &ReviewRequest,
        mut cancel: watch::Receiver<bool>,
        progress: Option<watch::Sender<FetchProgress>>,
    ) -> Result<Review, ReviewError> {
        let started = Instant::now();

        for attempt in 0..self.policy.total_attempts() {
            if *cancel.borrow() {
                return Err(ReviewError::Cancelled);
            }

            if let Some(progress) = &progress {
                let _ = progress.send(FetchProgress {
                    attempt,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            let outcome = tokio::select! {
                outcome = source.fetch_once(request) => outcome,
                _ = wait_cancelled(&mut cancel) => return Err(ReviewError::Cancelled),
            };

            match outcome {
                Ok(review) => {
                    tracing::info!(
                        session_id = %request.session_id,
                        attempt,
                        "review retrieved"
                    );
                    return Ok(review);
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(
                        session_id = %request.session_id,
                        attempt,
                        error = %e,
                        "review attempt failed"
                    );
                }
                Err(e) => return Err(e),
            }

            // No sleep after the final attempt.
            if attempt + 1 == self.policy.total_attempts() {
                break;
            }

            let delay = self.policy.delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(&mut cancel) => return Err(ReviewError::Cancelled),
            }
        }

        tracing::warn!(
            session_id = %request.session_id,
            attempts = self.policy.total_attempts(),
            "review retrieval exhausted retries"
        );
        Err(ReviewError::ExhaustedRetries {
            attempts: self.policy.total_attempts(),
        })
    }
}

/// Resolves once the cancel flag turns true.
///
/// A dropped sender is not a cancellation — an owner that goes away
/// without cancelling must not abort the cycle — so channel closure
/// parks forever instead of resolving.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
