//! Live voice-call orchestration for the Rehearse platform.
//!
//! Drives one active voice call per session: connects the external voice
//! agent through the [`agent::AgentConnector`] seam, consumes its event
//! stream, maintains the call state machine, assembles the transcript,
//! and finalizes the session record exactly once when the call ends —
//! whether the agent hung up, the user pressed End Session, or the
//! stream dropped.
//!
//! The resource-safety invariant lives in [`registry::CallRegistry`]: at
//! most one live call instance exists per session, and any previous
//! instance is stopped before a successor starts.

pub mod agent;
mod error;
pub mod orchestrator;
pub mod registry;
pub mod transcript;

pub use agent::{
    AgentConnection, AgentConnector, AgentEvent, AgentHandle, AgentOverrides, ScriptStep,
    ScriptedConnector, TranscriptKind, TranscriptRole,
};
pub use error::CallError;
pub use orchestrator::{CallEvent, CallState, EndReason};
pub use registry::CallRegistry;
pub use transcript::{TranscriptAssembler, Utterance};
