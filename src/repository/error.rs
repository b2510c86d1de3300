//! Repository engine error types.

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Errors from working-copy operations.
///
/// Merge conflicts are not here: they are an expected outcome, reported as
/// the `None` sentinel by the merge operations after a full rollback.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    /// The operation observed cancellation at a safe point, or the native
    /// library aborted a transfer from a progress callback.
    #[error("repository operation cancelled")]
    Cancelled,

    #[error("origin remote is not configured")]
    NoOrigin,

    #[error("origin is not a recognized hosting provider")]
    NotHostedOrigin,

    #[error("HEAD does not track a remote branch")]
    NotTracking,

    #[error("access tokens require an https origin URL, got {0}")]
    NonHttpsUrl(String),

    #[error("snapshot copy failed: {0}")]
    Copy(#[source] std::io::Error),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl RepositoryError {
    /// Whether retrying this operation may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            RepositoryError::Cancelled | RepositoryError::Copy(_) => Transience::Retryable,

            RepositoryError::NoOrigin
            | RepositoryError::NotHostedOrigin
            | RepositoryError::NotTracking
            | RepositoryError::NonHttpsUrl(_) => Transience::Permanent,

            RepositoryError::Git(_) => Transience::Unknown,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Precondition failures are checked before any state mutation.
            RepositoryError::NoOrigin
            | RepositoryError::NotHostedOrigin
            | RepositoryError::NotTracking
            | RepositoryError::NonHttpsUrl(_) => Effect::None,

            // A copy that failed partway leaves a partial destination tree.
            RepositoryError::Copy(_) => Effect::Some,

            // Cancellation and low-level git errors can land mid-operation;
            // ephemeral cleanup still ran, but the checkout may have moved.
            RepositoryError::Cancelled | RepositoryError::Git(_) => Effect::Unknown,
        }
    }
}
