//! The per-call state machine.
//!
//! One orchestrator instance drives one call: it consumes the provider's
//! in-order event stream and a user-control channel, walks
//! `idle → connecting → active → ended`, feeds final utterances to the
//! transcript assembler, and performs the terminal finalization exactly
//! once. `ended` is terminal for the instance; a retry is a brand-new
//! instance created through the registry.

use crate::agent::{AgentEvent, AgentHandle, TranscriptKind, TranscriptRole};
use crate::error::CallError;
use crate::registry::CallRegistry;
use crate::transcript::{TranscriptAssembler, Utterance};
use chrono::{DateTime, Utc};
use rehearse_db::DbPool;
use rehearse_store::sessions::{self, CallDetails};
use rehearse_types::SessionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Call lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Connecting,
    Active,
    Ended,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

/// Why a call instance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The provider reported the call over; carries its reason string.
    Agent(String),
    /// The user pressed End Session.
    UserEnded,
    /// The event stream closed without a call-ended event (network drop,
    /// provider crash).
    StreamClosed,
}

impl EndReason {
    /// The string recorded in `call_ended_reason`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent(reason) => reason,
            Self::UserEnded => "user_ended",
            Self::StreamClosed => "stream_closed",
        }
    }
}

/// Control messages from the owning context.
#[derive(Debug)]
pub enum CallControl {
    /// User-triggered End Session.
    End,
}

/// Events broadcast to observers (the SSE stream, tests).
///
/// Volume and speech events are ephemeral UI state and are never
/// persisted; utterance events mirror what the assembler accumulated.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    State { state: CallState },
    Utterance {
        role: TranscriptRole,
        text: String,
        timestamp_ms: i64,
    },
    Volume { level: f32 },
    Speech { active: bool },
    Ended { reason: String },
}

pub(crate) struct CallOrchestrator {
    session_id: Uuid,
    /// Distinguishes this instance from successors in the registry.
    instance_id: Uuid,
    registry: CallRegistry,
    pool: DbPool,
    state: CallState,
    transcript: TranscriptAssembler,
    agent_handle: AgentHandle,
    /// Single-assignment completion token. Set exactly once, checked
    /// before any terminal action, independent of which trigger fires
    /// first.
    completion: Option<EndReason>,
    call_started_at: Option<DateTime<Utc>>,
    events_tx: broadcast::Sender<CallEvent>,
    state_tx: watch::Sender<CallState>,
}

impl CallOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: Uuid,
        instance_id: Uuid,
        registry: CallRegistry,
        pool: DbPool,
        agent_handle: AgentHandle,
        events_tx: broadcast::Sender<CallEvent>,
        state_tx: watch::Sender<CallState>,
    ) -> Self {
        Self {
            session_id,
            instance_id,
            registry,
            pool,
            state: CallState::Idle,
            transcript: TranscriptAssembler::new(),
            agent_handle,
            completion: None,
            call_started_at: None,
            events_tx,
            state_tx,
        }
    }

    fn transition(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            session_id = %self.session_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "call state transition"
        );
        self.state = next;
        let _ = self.state_tx.send(next);
        let _ = self.events_tx.send(CallEvent::State { state: next });
    }

    /// Runs the event loop until the call ends or the instance is
    /// superseded.
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<AgentEvent>,
        mut control: mpsc::Receiver<CallControl>,
    ) {
        self.transition(CallState::Connecting);

        loop {
            tokio::select! {
                biased;

                ctrl = control.recv() => match ctrl {
                    Some(CallControl::End) => {
                        self.finish(EndReason::UserEnded).await;
                        break;
                    }
                    // All control senders dropped: this instance was
                    // superseded or the registry was torn down. Stop
                    // without finalizing — a stale instance must not
                    // commit late side effects.
                    None => {
                        self.agent_handle.stop();
                        break;
                    }
                },

                event = events.recv() => match event {
                    Some(AgentEvent::CallStarted) => {
                        if self.state == CallState::Connecting {
                            self.call_started_at = Some(Utc::now());
                            self.transition(CallState::Active);
                        }
                    }
                    Some(AgentEvent::CallEnded { reason }) => {
                        // A call-end before call-start still ends the
                        // instance; there is just no active call to
                        // finalize as completed.
                        self.finish(EndReason::Agent(reason)).await;
                        break;
                    }
                    Some(AgentEvent::Transcript { role, kind, text, timestamp_ms }) => {
                        self.on_transcript(role, kind, text, timestamp_ms);
                    }
                    Some(AgentEvent::VolumeLevel { level }) => {
                        let _ = self.events_tx.send(CallEvent::Volume { level });
                    }
                    Some(AgentEvent::SpeechStart) => {
                        let _ = self.events_tx.send(CallEvent::Speech { active: true });
                    }
                    Some(AgentEvent::SpeechEnd) => {
                        let _ = self.events_tx.send(CallEvent::Speech { active: false });
                    }
                    None => {
                        self.finish(EndReason::StreamClosed).await;
                        break;
                    }
                },
            }
        }
    }

    fn on_transcript(
        &mut self,
        role: TranscriptRole,
        kind: TranscriptKind,
        text: String,
        timestamp_ms: i64,
    ) {
        // Interim fragments are display churn; only final utterances
        // accumulate.
        if kind != TranscriptKind::Final {
            return;
        }
        if self.state != CallState::Active {
            tracing::debug!(
                session_id = %self.session_id,
                state = self.state.as_str(),
                "dropping transcript event outside active call"
            );
            return;
        }
        self.transcript.append(Utterance {
            role,
            text: text.clone(),
            timestamp_ms,
        });
        let _ = self.events_tx.send(CallEvent::Utterance {
            role,
            text,
            timestamp_ms,
        });
    }

    /// Performs the terminal transition and finalization exactly once.
    ///
    /// Both triggers (provider call-end, user End Session) route through
    /// here; the completion token makes the second a no-op. The store's
    /// compare-and-set update covers the cross-instance race as well.
    async fn finish(&mut self, reason: EndReason) {
        if self.completion.is_some() {
            return;
        }
        self.completion = Some(reason.clone());

        self.agent_handle.stop();

        let reached_active = self.state == CallState::Active;
        self.transition(CallState::Ended);

        // A call that never went live is a cancelled attempt, not a
        // completed session.
        let final_status = if reached_active {
            SessionStatus::Completed
        } else {
            SessionStatus::Cancelled
        };

        let details = CallDetails {
            transcript: self.transcript.render(),
            started_at: self.call_started_at,
            ended_at: Utc::now(),
            ended_reason: reason.as_str().to_string(),
        };

        if let Err(e) = finalize_session(&self.pool, self.session_id, final_status, details).await {
            tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "session finalization failed"
            );
        } else {
            tracing::info!(
                session_id = %self.session_id,
                status = final_status.as_str(),
                reason = reason.as_str(),
                "call ended, session finalized"
            );
        }

        let _ = self.events_tx.send(CallEvent::Ended {
            reason: reason.as_str().to_string(),
        });

        self.registry.release(self.session_id, self.instance_id);
    }
}

/// Writes the terminal status and call details on the blocking pool.
pub(crate) async fn finalize_session(
    pool: &DbPool,
    session_id: Uuid,
    final_status: SessionStatus,
    details: CallDetails,
) -> Result<(), CallError> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<(), CallError> {
        let conn = pool.get().map_err(|e| CallError::Pool(e.to_string()))?;
        sessions::update_status(&conn, session_id, final_status)?;
        sessions::record_call_details(&conn, session_id, &details)?;
        Ok(())
    })
    .await
    .map_err(|e| CallError::Pool(format!("finalization task failed: {e}")))?
}
