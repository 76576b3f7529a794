//! The live-call registry: at most one call instance per session.
//!
//! Starting a call for a session stops and evicts any previous instance
//! first, so two concurrent audio/event streams can never exist for the
//! same session. Handles are released when their call ends and evicted
//! when superseded.

use crate::agent::{AgentConnector, AgentHandle, AgentOverrides};
use crate::error::CallError;
use crate::orchestrator::{finalize_session, CallControl, CallEvent, CallOrchestrator, CallState};
use chrono::Utc;
use rehearse_db::DbPool;
use rehearse_store::sessions::{self, CallDetails};
use rehearse_types::{Entity, Session, SessionStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Capacity of the observer broadcast channel per call.
const CALL_EVENT_BROADCAST_CAPACITY: usize = 256;

/// Capacity of the user-control channel per call.
const CALL_CONTROL_CAPACITY: usize = 4;

/// Handle to one live call instance.
pub struct CallHandle {
    instance_id: Uuid,
    control_tx: mpsc::Sender<CallControl>,
    agent: AgentHandle,
    events_tx: broadcast::Sender<CallEvent>,
    state_rx: watch::Receiver<CallState>,
    join: tokio::task::JoinHandle<()>,
}

/// Registry of live calls, keyed by session id.
///
/// Uses `std::sync::RwLock` intentionally: all lock acquisitions are
/// brief HashMap operations that never span `.await` points, making a
/// synchronous lock safe and more efficient than `tokio::sync::RwLock`.
#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<RwLock<HashMap<Uuid, CallHandle>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a call for the session, tearing down any previous instance.
    ///
    /// Advances the session to `in_progress`, connects the agent, spawns
    /// the orchestrator, and returns an observer subscription.
    ///
    /// # Errors
    ///
    /// `CallError::AgentUnavailable` if the entity has no complete agent
    /// configuration (fatal, not retried); `CallError::Connect` if the
    /// provider refuses, in which case the session is finalized as
    /// cancelled with the failure recorded.
    pub async fn start(
        &self,
        pool: &DbPool,
        connector: &dyn AgentConnector,
        entity: &Entity,
        session: &Session,
    ) -> Result<broadcast::Receiver<CallEvent>, CallError> {
        let config = entity.agent_config().cloned().ok_or(CallError::AgentUnavailable)?;

        // Hard invariant: the previous instance is fully stopped and
        // evicted before a successor exists.
        self.evict(session.id);

        ensure_in_progress(pool, session.id).await?;

        let overrides = build_overrides(entity, session);
        let connection = match connector.connect(&config, overrides).await {
            Ok(connection) => connection,
            Err(e) => {
                // Initialization failures are fatal: the call never goes
                // live and the attempt is closed out as cancelled.
                let details = CallDetails {
                    transcript: String::new(),
                    started_at: None,
                    ended_at: Utc::now(),
                    ended_reason: format!("agent_init_failed: {e}"),
                };
                if let Err(finalize_err) =
                    finalize_session(pool, session.id, SessionStatus::Cancelled, details).await
                {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %finalize_err,
                        "failed to record agent initialization failure"
                    );
                }
                return Err(e);
            }
        };

        let instance_id = Uuid::new_v4();
        let (events_tx, events_rx) = broadcast::channel(CALL_EVENT_BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(CallState::Idle);
        let (control_tx, control_rx) = mpsc::channel(CALL_CONTROL_CAPACITY);

        let orchestrator = CallOrchestrator::new(
            session.id,
            instance_id,
            self.clone(),
            pool.clone(),
            connection.handle.clone(),
            events_tx.clone(),
            state_tx,
        );
        let join = tokio::spawn(orchestrator.run(connection.events, control_rx));

        let handle = CallHandle {
            instance_id,
            control_tx,
            agent: connection.handle,
            events_tx,
            state_rx,
            join,
        };

        let mut map = self.lock_write();
        map.insert(session.id, handle);

        tracing::info!(session_id = %session.id, "call started");
        Ok(events_rx)
    }

    /// User-triggered End Session.
    ///
    /// Returns `true` if a live instance accepted the request. The
    /// orchestrator's completion token makes a duplicate (or a race with
    /// the provider's own call-end) a no-op.
    pub fn end(&self, session_id: Uuid) -> bool {
        let map = self.lock_read();
        match map.get(&session_id) {
            Some(handle) => handle.control_tx.try_send(CallControl::End).is_ok(),
            None => false,
        }
    }

    /// Subscribes to a live call's state snapshot and event stream.
    pub fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Option<(watch::Receiver<CallState>, broadcast::Receiver<CallEvent>)> {
        let map = self.lock_read();
        map.get(&session_id)
            .map(|handle| (handle.state_rx.clone(), handle.events_tx.subscribe()))
    }

    /// Current state of the session's live call, if one exists.
    pub fn state(&self, session_id: Uuid) -> Option<CallState> {
        let map = self.lock_read();
        map.get(&session_id).map(|handle| *handle.state_rx.borrow())
    }

    /// Whether a live (not yet ended) instance exists for the session.
    pub fn is_live(&self, session_id: Uuid) -> bool {
        !matches!(self.state(session_id), None | Some(CallState::Ended))
    }

    /// Removes the handle for `session_id` if it still belongs to
    /// `instance_id`. Called by an orchestrator when its call ends so a
    /// successor's handle is never evicted by a stale predecessor.
    pub(crate) fn release(&self, session_id: Uuid, instance_id: Uuid) {
        let mut map = self.lock_write();
        if map
            .get(&session_id)
            .is_some_and(|handle| handle.instance_id == instance_id)
        {
            map.remove(&session_id);
        }
    }

    /// Stops and removes any existing instance for the session.
    fn evict(&self, session_id: Uuid) {
        let previous = {
            let mut map = self.lock_write();
            map.remove(&session_id)
        };
        if let Some(handle) = previous {
            tracing::info!(session_id = %session_id, "stopping superseded call instance");
            handle.agent.stop();
            handle.join.abort();
            // Dropping the handle drops its control sender; a still-running
            // loop observes the closed channel and exits without
            // finalizing.
        }
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, CallHandle>> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::error!("call registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, CallHandle>> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::error!("call registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Builds the provider overrides from the entity and the session's
/// caller-supplied context.
fn build_overrides(entity: &Entity, session: &Session) -> AgentOverrides {
    let mut variables = BTreeMap::new();
    if let Some(object) = session.metadata.as_object() {
        for (key, value) in object {
            if key == "started_at" {
                continue;
            }
            if let Some(text) = value.as_str() {
                variables.insert(key.clone(), text.to_string());
            }
        }
    }
    AgentOverrides {
        entity_title: entity.title.clone(),
        kind: entity.kind,
        variables,
    }
}

/// Advances the session to `in_progress`.
///
/// A session that is already `in_progress` (a restart superseding a live
/// call) is accepted as-is; terminal sessions are not restartable and
/// surface the store's verdict.
async fn ensure_in_progress(pool: &DbPool, session_id: Uuid) -> Result<(), CallError> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<(), CallError> {
        let conn = pool.get().map_err(|e| CallError::Pool(e.to_string()))?;
        match sessions::update_status(&conn, session_id, SessionStatus::InProgress) {
            Ok(_) => Ok(()),
            Err(rehearse_store::StoreError::InvalidTransition {
                from: SessionStatus::InProgress,
                to: SessionStatus::InProgress,
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| CallError::Pool(format!("status task failed: {e}")))?
}
