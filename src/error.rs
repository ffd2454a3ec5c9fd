//! Error taxonomy for the synchronization engine.
//!
//! Repositories and the upstream client work in `anyhow::Result`; the engine
//! maps those failures onto [`SyncError`] at its boundary so the transport and
//! the scheduler can decide what to surface and what to log.

use thiserror::Error;

/// Failure kinds produced by the engine.
///
/// None of these is fatal to the process: every variant means "this one
/// operation did not complete".
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required parameter was missing or malformed. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The OAuth state returned by the browser did not match the session.
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// The upstream token endpoint rejected the code or answered malformed.
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Network or decode failure while pulling a catalog.
    ///
    /// `upserted` counts entries already written before the failure; they are
    /// kept.
    #[error("upstream fetch failed for {shop} after {upserted} entries: {message}")]
    UpstreamFetchFailed {
        shop: String,
        upserted: usize,
        message: String,
    },

    /// A repository operation failed.
    #[error("storage failed: {0}")]
    StorageFailed(String),
}

impl SyncError {
    /// Wraps a repository error, keeping its full context chain.
    pub fn storage(err: anyhow::Error) -> Self {
        SyncError::StorageFailed(format!("{:#}", err))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
