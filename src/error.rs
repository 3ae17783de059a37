//! Error types for the scanning engine and its collaborators.

/// Errors that terminate a scan round.
///
/// A round fails as a whole: if any epoch in the round produced one of these,
/// none of the round's search results are committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// Transport-level failure reported by the view service.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The view service returned data that is malformed or inconsistent.
    #[error("Invalid server response: {0}")]
    InvalidServerResponse(String),

    /// The view service speaks a key or record version this client can't handle.
    #[error("Outdated client: {0}")]
    OutdatedClient(String),

    /// At least one search result came back rate limited.
    #[error("Server rate limited: {0}")]
    ServerRateLimited(String),

    /// The scan engine was fed an event it can't handle in its current phase.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// A previous holder of the scan state lock panicked.
    #[error("Scan state lock poisoned")]
    StatePoisoned,
}

impl ScanError {
    /// Whether the caller may retry the scan after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::ServerRateLimited(_) | ScanError::ConnectionFailure(_)
        )
    }
}

/// Errors reported by the crypto collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The view service and the ledger disagree about chain height.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(
        "View and ledger block counts are out of sync, try again later \
         (view: {view}, ledger: {ledger})"
    )]
    ViewLedgerOutOfSync { view: u64, ledger: u64 },

    #[error(
        "View has not caught up with consensus, try again later \
         (current: {current}, consensus: {consensus})"
    )]
    ConsensusOutOfSync { consensus: u64, current: u64 },
}
