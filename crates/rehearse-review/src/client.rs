//! The single-attempt scoring client.
//!
//! One call to [`ScoreSource::fetch_once`] is one HTTP round-trip; the
//! retry driver owns repetition. The client classifies every failure as
//! retryable — the scoring service computes reviews asynchronously and
//! "not yet" is its steady state for a while after a call ends.

use crate::error::ReviewError;
use async_trait::async_trait;
use rehearse_types::Review;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Default per-request timeout for scoring calls.
const SCORING_TIMEOUT: Duration = Duration::from_secs(15);

/// Identifies the session a review is requested for, fully scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(rename = "entityId")]
    pub entity_id: i64,
    #[serde(rename = "orgId")]
    pub org_id: i64,
}

/// Anything that can attempt to produce a review once.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// Every error from a single attempt is retryable by classification;
    /// the driver decides when to stop.
    async fn fetch_once(&self, request: &ReviewRequest) -> Result<Review, ReviewError>;
}

/// HTTP client for the external scoring endpoint.
#[derive(Debug, Clone)]
pub struct ScoringClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ScoringClient {
    /// Builds a client for the given endpoint with a bounded timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SCORING_TIMEOUT)
            .build()
            // Building with static, valid options; reqwest only fails
            // here when the TLS backend cannot initialize at all.
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ScoreSource for ScoringClient {
    async fn fetch_once(&self, request: &ReviewRequest) -> Result<Review, ReviewError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReviewError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReviewError::Malformed(e.to_string()))?;

        // The service signals "still computing" either explicitly or by
        // answering with an empty object.
        if body.get("ready").and_then(|v| v.as_bool()) == Some(false) {
            return Err(ReviewError::NotReady);
        }

        let review: Review = serde_json::from_value(body)
            .map_err(|e| ReviewError::Malformed(e.to_string()))?;
        if review.is_empty() {
            return Err(ReviewError::NotReady);
        }

        Ok(review)
    }
}
