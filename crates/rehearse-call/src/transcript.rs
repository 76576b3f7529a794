//! Transcript assembly from ordered utterance events.
//!
//! Ordering is the only reproducibility invariant: utterances are stored
//! as distinct entries in arrival order. Speaker grouping happens at
//! render time and is purely presentational.

use crate::agent::TranscriptRole;
use serde::{Deserialize, Serialize};

/// One final utterance on the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: TranscriptRole,
    pub text: String,
    /// Milliseconds since call start, as reported by the provider.
    pub timestamp_ms: i64,
}

/// Append-only, ordered conversation log for a single call.
///
/// Not restartable — a new call constructs a new empty assembler.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<Utterance>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an utterance. Events must be fed in arrival order; the
    /// transport guarantees in-order delivery per call.
    pub fn append(&mut self, utterance: Utterance) {
        self.entries.push(utterance);
    }

    /// The ordered utterances, as stored.
    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the display/persistence form.
    ///
    /// Consecutive same-speaker utterances are merged under one speaker
    /// label; the stored entries remain distinct.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut last_role: Option<TranscriptRole> = None;

        for utterance in &self.entries {
            if last_role == Some(utterance.role) {
                out.push(' ');
                out.push_str(&utterance.text);
            } else {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(utterance.role.label());
                out.push_str(": ");
                out.push_str(&utterance.text);
                last_role = Some(utterance.role);
            }
        }

        out
    }
}
