//! Review payload as returned by the external scoring service.
//!
//! Reviews are computed asynchronously after a session ends and are never
//! persisted by this core; they are fetched on demand and held only in the
//! caller's active view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A computed scoring result for a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Overall score on the service's 0–100 scale.
    pub overall_score: f64,
    /// Named sub-scores (e.g. "communication", "technical_depth").
    ///
    /// A `BTreeMap` keeps serialization order stable for display and tests.
    #[serde(default)]
    pub sub_scores: BTreeMap<String, f64>,
    /// Hiring/advancement recommendation, service-defined vocabulary.
    #[serde(default)]
    pub recommendation: Option<String>,
    /// Free-text summary of the candidate's performance.
    #[serde(default)]
    pub summary: String,
}

impl Review {
    /// Whether the payload carries an actual result.
    ///
    /// The scoring service answers `200 OK` with an empty object while a
    /// review is still being computed; such a payload is not a review.
    pub fn is_empty(&self) -> bool {
        self.sub_scores.is_empty() && self.recommendation.is_none() && self.summary.is_empty()
    }
}
