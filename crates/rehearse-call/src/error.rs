use rehearse_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// The entity carries no complete voice-agent configuration.
    /// Fatal and never retried.
    #[error("no voice agent configured for this entity")]
    AgentUnavailable,

    /// The provider rejected or failed the connection attempt.
    /// Fatal for this call instance; a user retry creates a new instance.
    #[error("agent connection failed: {0}")]
    Connect(String),

    /// Database pool exhaustion or checkout failure.
    #[error("database unavailable: {0}")]
    Pool(String),

    /// Session finalization write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
