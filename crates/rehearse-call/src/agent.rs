//! The voice-agent provider seam.
//!
//! The external provider pushes call lifecycle and transcript events over
//! an in-order stream; the orchestrator consumes them without knowing
//! which provider produced them. [`ScriptedConnector`] is the in-tree
//! provider used by tests and local development: it plays a fixed event
//! script with configurable pacing, the way a real call would arrive.

use crate::error::CallError;
use async_trait::async_trait;
use rehearse_types::{AgentConfig, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Capacity of the per-call event channel.
const AGENT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    /// The candidate on the call.
    User,
    /// The voice agent.
    Assistant,
}

impl TranscriptRole {
    /// Display label used when rendering transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "Candidate",
            Self::Assistant => "Agent",
        }
    }
}

/// Whether a transcript event is an interim fragment or a final utterance.
///
/// Only `Final` utterances are accumulated; partials are display churn
/// the provider replaces as recognition settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// An event pushed by the voice-agent provider.
///
/// Delivery is in-order per call; the orchestrator relies on that and
/// nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The call went live; the microphone affordance flips here.
    CallStarted,
    /// The provider ended the call (hangup, timeout, network drop).
    CallEnded { reason: String },
    /// A transcript fragment or final utterance.
    Transcript {
        role: TranscriptRole,
        kind: TranscriptKind,
        text: String,
        timestamp_ms: i64,
    },
    /// Current speaker volume, 0.0–1.0. Ephemeral UI state, never persisted.
    VolumeLevel { level: f32 },
    SpeechStart,
    SpeechEnd,
}

/// Context passed to the provider when starting a call.
///
/// Carries entity metadata and the kind-specific variables the agent's
/// prompt template interpolates (domain/seniority for interviews,
/// category/difficulty for trainings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOverrides {
    pub entity_title: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Handle for tearing down a live agent stream.
///
/// Cloneable so the registry and the orchestrator can both hold one;
/// stopping is idempotent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    stop_tx: watch::Sender<bool>,
}

impl AgentHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (Self { stop_tx }, stop_rx)
    }

    /// Requests the provider stop the call and close the stream.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// A live connection to the voice-agent provider.
#[derive(Debug)]
pub struct AgentConnection {
    /// In-order event stream; closes when the call is over.
    pub events: mpsc::Receiver<AgentEvent>,
    /// Teardown handle.
    pub handle: AgentHandle,
}

/// Provider seam: anything that can start a call and stream its events.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Starts a call against the configured agent.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Connect` when the provider rejects the attempt;
    /// connection failures are fatal for the call instance and are never
    /// retried automatically.
    async fn connect(
        &self,
        config: &AgentConfig,
        overrides: AgentOverrides,
    ) -> Result<AgentConnection, CallError>;
}

/// One step of a [`ScriptedConnector`] script.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    /// Pause before delivering the event.
    pub delay: Duration,
    pub event: AgentEvent,
}

impl ScriptStep {
    pub fn immediate(event: AgentEvent) -> Self {
        Self {
            delay: Duration::ZERO,
            event,
        }
    }

    pub fn after_ms(delay_ms: u64, event: AgentEvent) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            event,
        }
    }
}

/// Scripted provider for tests and local development.
///
/// Plays its script in order, honoring per-step delays, and closes the
/// stream afterwards. Stopping via the [`AgentHandle`] interrupts the
/// script at the next step boundary, as a real teardown would cut the
/// transport.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Vec<ScriptStep>,
    /// When set, `connect` fails with this message instead of streaming.
    refuse_with: Option<String>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            refuse_with: None,
        }
    }

    /// A connector whose every `connect` fails — the provider-down case.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            script: Vec::new(),
            refuse_with: Some(message.into()),
        }
    }

    /// A plausible short interview call: greeting, one exchange, hangup.
    pub fn canned_interview() -> Self {
        Self::new(vec![
            ScriptStep::immediate(AgentEvent::CallStarted),
            ScriptStep::after_ms(
                10,
                AgentEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    kind: TranscriptKind::Final,
                    text: "Hi, thanks for joining. Tell me about yourself.".to_string(),
                    timestamp_ms: 0,
                },
            ),
            ScriptStep::after_ms(10, AgentEvent::VolumeLevel { level: 0.6 }),
            ScriptStep::after_ms(
                10,
                AgentEvent::Transcript {
                    role: TranscriptRole::User,
                    kind: TranscriptKind::Final,
                    text: "I'm a backend engineer with five years of Rust.".to_string(),
                    timestamp_ms: 4_000,
                },
            ),
            ScriptStep::after_ms(
                10,
                AgentEvent::CallEnded {
                    reason: "agent_hangup".to_string(),
                },
            ),
        ])
    }
}

#[async_trait]
impl AgentConnector for ScriptedConnector {
    async fn connect(
        &self,
        config: &AgentConfig,
        overrides: AgentOverrides,
    ) -> Result<AgentConnection, CallError> {
        if let Some(message) = &self.refuse_with {
            return Err(CallError::Connect(message.clone()));
        }

        tracing::debug!(
            agent_id = %config.agent_id,
            entity_title = %overrides.entity_title,
            steps = self.script.len(),
            "scripted agent connecting"
        );

        let (tx, rx) = mpsc::channel(AGENT_EVENT_CHANNEL_CAPACITY);
        let (handle, mut stop_rx) = AgentHandle::new();
        let script = self.script.clone();

        tokio::spawn(async move {
            for step in script {
                if step.delay > Duration::ZERO {
                    tokio::select! {
                        _ = tokio::time::sleep(step.delay) => {}
                        _ = stop_rx.changed() => break,
                    }
                }
                if *stop_rx.borrow() {
                    break;
                }
                if tx.send(step.event).await.is_err() {
                    // Receiver gone; the orchestrator was torn down.
                    break;
                }
            }
            // Dropping `tx` closes the stream.
        });

        Ok(AgentConnection { events: rx, handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rehearse_types::AgentConfig;

    fn config() -> AgentConfig {
        AgentConfig {
            agent_id: "agent-1".to_string(),
            credential: "key-1".to_string(),
        }
    }

    fn overrides() -> AgentOverrides {
        AgentOverrides {
            entity_title: "Backend Interview".to_string(),
            kind: EntityKind::Interview,
            variables: BTreeMap::from([("domain".to_string(), "backend".to_string())]),
        }
    }

    #[tokio::test]
    async fn scripted_connector_plays_script_in_order() {
        let connector = ScriptedConnector::canned_interview();
        let mut conn = connector.connect(&config(), overrides()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = conn.events.recv().await {
            events.push(event);
        }

        assert_eq!(events.first(), Some(&AgentEvent::CallStarted));
        assert!(matches!(
            events.last(),
            Some(AgentEvent::CallEnded { .. })
        ));
        // Final utterances arrive between start and end, in order.
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Transcript { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("Hi, thanks"));
    }

    #[tokio::test]
    async fn stop_interrupts_the_stream() {
        let connector = ScriptedConnector::new(vec![
            ScriptStep::immediate(AgentEvent::CallStarted),
            ScriptStep::after_ms(5_000, AgentEvent::CallEnded {
                reason: "agent_hangup".to_string(),
            }),
        ]);
        let mut conn = connector.connect(&config(), overrides()).await.unwrap();

        assert_eq!(conn.events.recv().await, Some(AgentEvent::CallStarted));
        conn.handle.stop();
        assert!(conn.handle.is_stopped());

        // The pending long-delay step is abandoned; the stream closes.
        assert_eq!(conn.events.recv().await, None);
    }

    #[tokio::test]
    async fn refusing_connector_fails_connect() {
        let connector = ScriptedConnector::refusing("provider down");
        let err = connector.connect(&config(), overrides()).await.unwrap_err();
        assert!(matches!(err, CallError::Connect(_)));
    }
}
