//! The review-fetch registry: one in-flight cycle per session.
//!
//! Starting a fetch for a session cancels and evicts any previous cycle
//! first — overlapping requests for the same session are forbidden. The
//! terminal state (`Ready` or `Unavailable`) stays observable so repeated
//! reads of the review endpoint do not restart exhausted cycles.

use crate::backoff::RetryPolicy;
use crate::client::{ReviewRequest, ScoreSource};
use crate::error::ReviewError;
use crate::retriever::{FetchProgress, ReviewRetriever};
use rehearse_types::Review;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

/// Observable state of a session's fetch cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewFetchState {
    /// A cycle is running; no verdict yet.
    Pending,
    /// The review arrived.
    Ready { review: Review },
    /// The retry ceiling was reached; terminal until a new cycle is
    /// explicitly started.
    Unavailable { attempts: u32 },
}

struct FetchHandle {
    cancel_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ReviewFetchState>,
    progress_rx: watch::Receiver<FetchProgress>,
    join: tokio::task::JoinHandle<()>,
}

/// Registry of review fetch cycles, keyed by session id.
///
/// `std::sync::RwLock` by intent: lock holds are brief map operations
/// that never span `.await` points.
#[derive(Clone, Default)]
pub struct ReviewFetchRegistry {
    inner: Arc<RwLock<HashMap<Uuid, FetchHandle>>>,
}

impl ReviewFetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fetch cycle for the session, cancelling any previous one.
    ///
    /// Returns a state subscription that moves `Pending → Ready` or
    /// `Pending → Unavailable`.
    pub fn spawn(
        &self,
        source: Arc<dyn ScoreSource>,
        policy: RetryPolicy,
        request: ReviewRequest,
    ) -> watch::Receiver<ReviewFetchState> {
        let session_id = request.session_id;
        self.cancel(session_id);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ReviewFetchState::Pending);
        let (progress_tx, progress_rx) = watch::channel(FetchProgress::default());

        let retriever = ReviewRetriever::new(policy);
        let driver_state_tx = state_tx.clone();
        let join = tokio::spawn(async move {
            let result = retriever
                .fetch(source.as_ref(), &request, cancel_rx, Some(progress_tx))
                .await;
            let final_state = match result {
                Ok(review) => ReviewFetchState::Ready { review },
                Err(ReviewError::ExhaustedRetries { attempts }) => {
                    ReviewFetchState::Unavailable { attempts }
                }
                Err(ReviewError::Cancelled) => {
                    // A cancelled cycle mutates nothing; its successor
                    // owns the state now.
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %request.session_id,
                        error = %e,
                        "review fetch cycle failed"
                    );
                    ReviewFetchState::Unavailable { attempts: 0 }
                }
            };
            let _ = driver_state_tx.send(final_state);
        });

        let handle = FetchHandle {
            cancel_tx,
            state_rx: state_rx.clone(),
            progress_rx,
            join,
        };

        let mut map = self.lock_write();
        map.insert(session_id, handle);

        state_rx
    }

    /// Current fetch state for the session, if a cycle exists.
    pub fn state(&self, session_id: Uuid) -> Option<ReviewFetchState> {
        let map = self.lock_read();
        map.get(&session_id)
            .map(|handle| handle.state_rx.borrow().clone())
    }

    /// Latest progress report for the session's cycle.
    pub fn progress(&self, session_id: Uuid) -> Option<FetchProgress> {
        let map = self.lock_read();
        map.get(&session_id)
            .map(|handle| *handle.progress_rx.borrow())
    }

    /// Cancels and evicts the session's cycle, if any.
    ///
    /// In-flight work observes the cancel flag at its next suspension
    /// point; the task is aborted as well so nothing lingers.
    pub fn cancel(&self, session_id: Uuid) {
        let previous = {
            let mut map = self.lock_write();
            map.remove(&session_id)
        };
        if let Some(handle) = previous {
            let _ = handle.cancel_tx.send(true);
            handle.join.abort();
            tracing::debug!(session_id = %session_id, "cancelled review fetch cycle");
        }
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, FetchHandle>> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::error!("review registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, FetchHandle>> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::error!("review registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
