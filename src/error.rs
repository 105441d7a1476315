//! Error types for the burst relayer

use ethers::types::H256;
use thiserror::Error;

/// Main error type for the dispatch pipeline
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("gas estimation error: {0}")]
    GasEstimation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("deadline exceeded after {attempts} attempts (last hash: {last_hash:?})")]
    DeadlineExceeded {
        attempts: u32,
        last_hash: Option<H256>,
    },

    #[error("dispatch queue closed")]
    QueueClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Recovery class of a failed dispatch attempt, decided by message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Provider throttled us; cool off before any further attempt.
    RateLimited,
    /// Stale nonce or underpriced replacement; the nonce cache is invalid.
    SequencingConflict,
    /// Anything else; surfaced to the caller, not retried.
    Other,
}

/// Classify a provider error message, case-insensitive.
///
/// Providers do not agree on error codes for throttling or nonce races, so
/// classification matches on the message substrings they use in the wild.
pub fn classify_provider_error(message: &str) -> ProviderErrorKind {
    let msg = message.to_lowercase();
    if msg.contains("429") || msg.contains("too many") || msg.contains("rate") {
        ProviderErrorKind::RateLimited
    } else if msg.contains("nonce too low")
        || msg.contains("replacement")
        || msg.contains("underpriced")
    {
        ProviderErrorKind::SequencingConflict
    } else {
        ProviderErrorKind::Other
    }
}

impl DispatchError {
    /// Recovery class for this error when it aborts a dispatch attempt.
    pub fn provider_kind(&self) -> ProviderErrorKind {
        classify_provider_error(&self.to_string())
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
