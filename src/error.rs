use thiserror::Error;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the failures that the sync pipeline knows how to react to. Anything else travels
/// as a plain `anyhow::Error` with context.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum SyncError {
    /// A network or external-timing failure that is worth retrying.
    #[error("transient external failure: {0}")]
    Transient(String),

    /// The thing being polled for has not appeared yet. This is an expected condition during
    /// polling, not a failure.
    #[error("not found yet")]
    NotFoundYet,

    /// The user abandoned an interactive step (e.g. a one-time code prompt). Aborts the current
    /// attempt only.
    #[error("cancelled by user")]
    Cancelled,

    /// The fetched export failed local verification or could not be decoded.
    #[error("malformed export: {0}")]
    MalformedInput(String),

    /// The export format changed incompatibly and the deduplication key can no longer be
    /// derived. Fatal, never silently skipped.
    #[error("missing key fields: {0}")]
    MissingKeyFields(String),

    /// The ledger append failed. Retried at the batch level; earlier batches stay committed.
    #[error("ledger write failed: {0}")]
    QuotaOrWrite(String),
}

impl SyncError {
    /// True when `err` is a `SyncError::Cancelled` at the bottom of an anyhow chain.
    pub(crate) fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Cancelled))
    }

    /// True when `err` is a `SyncError::NotFoundYet` at the bottom of an anyhow chain.
    pub(crate) fn is_not_found_yet(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NotFoundYet))
    }
}
