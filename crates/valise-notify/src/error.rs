use thiserror::Error;

/// Failure classification for the notification pipeline.
///
/// `Conflict` (lost claim race) and preference skips are expected outcomes,
/// not failures; only `TransientDispatch` drives the rollback-and-retry
/// path. Nothing here ever escapes a batch run uncaught.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Bad or missing input; never retried.
    #[error("invalid notification input: {0}")]
    Validation(String),

    /// A referenced entity is gone; surfaced to the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another worker holds the claim. Expected under concurrency.
    #[error("lost the notification claim race")]
    Conflict,

    /// Provider or network failure that is worth retrying. The claim is
    /// rolled back so a later batch run picks the candidate up again.
    #[error("transient dispatch failure: {0}")]
    TransientDispatch(String),

    /// The provider rejected the request outright; retrying cannot help.
    #[error("permanent dispatch failure: {0}")]
    PermanentDispatch(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDispatch(_))
    }
}
