use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The service answered but the review is not computed yet.
    #[error("review not ready")]
    NotReady,

    /// Non-2xx response from the scoring service.
    #[error("scoring service returned status {0}")]
    Status(u16),

    /// The response body did not parse as a review.
    #[error("malformed review payload: {0}")]
    Malformed(String),

    /// Transport-level failure (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The configured retry ceiling was reached without a review.
    /// Terminal and user-visible.
    #[error("no review available after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// The fetch cycle was cancelled by its owner.
    #[error("review fetch cancelled")]
    Cancelled,
}

impl ReviewError {
    /// Whether the retry driver should keep going after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::Status(_) | Self::Malformed(_) | Self::Network(_)
        )
    }
}
