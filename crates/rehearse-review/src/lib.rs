//! Review retrieval from the external scoring service.
//!
//! Scoring runs asynchronously after a session ends, so a review may not
//! exist yet when asked for. This crate provides the single-attempt
//! fetch primitive ([`client::ScoringClient`]), the pure backoff schedule
//! ([`backoff::RetryPolicy`]), the cancelable retry driver
//! ([`retriever::ReviewRetriever`]), and the per-session registry that
//! enforces one in-flight fetch cycle at a time
//! ([`registry::ReviewFetchRegistry`]).
//!
//! Reviews are never persisted here; a fetched result lives only in the
//! active fetch state its caller observes.

pub mod backoff;
pub mod client;
pub mod registry;
pub mod retriever;

mod error;

pub use backoff::RetryPolicy;
pub use client::{ReviewRequest, ScoreSource, ScoringClient};
pub use error::ReviewError;
pub use registry::{ReviewFetchRegistry, ReviewFetchState};
pub use retriever::{FetchProgress, ReviewRetriever};
