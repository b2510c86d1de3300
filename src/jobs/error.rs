//! Job outcome taxonomy.

use thiserror::Error;

use crate::error::Transience;
use crate::jobs::job::ErrorCode;
use crate::jobs::store::StoreError;
use crate::repository::error::RepositoryError;

/// How a job operation ended, short of plain success.
///
/// The worker wrapper in [`manager`](crate::jobs::manager) is the single
/// place these are classified and persisted: `Cancelled` becomes
/// `cancelled = true` with no error detail, `Domain` stores its message and
/// code alone, everything else stores full diagnostic detail.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum JobError {
    /// The operation observed cancellation at a safe point.
    #[error("job cancelled")]
    Cancelled,

    /// An expected job-domain failure; operators see the message alone.
    #[error("{message}")]
    Domain { code: ErrorCode, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to spawn job worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Unclassified failure (native library error, I/O fault).
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl JobError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        JobError::Internal(Box::new(err))
    }

    /// Whether retrying the whole job may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            JobError::Cancelled => Transience::Retryable,
            JobError::Domain { .. } => Transience::Permanent,
            JobError::Store(_) | JobError::Spawn(_) | JobError::Internal(_) => Transience::Unknown,
        }
    }
}

impl From<RepositoryError> for JobError {
    fn from(err: RepositoryError) -> Self {
        match &err {
            RepositoryError::Cancelled => JobError::Cancelled,
            RepositoryError::NotHostedOrigin => JobError::Domain {
                code: ErrorCode::RepositoryNotHosted,
                message: err.to_string(),
            },
            RepositoryError::NotTracking => JobError::Domain {
                code: ErrorCode::RepositoryNotTracking,
                message: err.to_string(),
            },
            RepositoryError::NonHttpsUrl(_) => JobError::Domain {
                code: ErrorCode::RepositoryUrlNotHttps,
                message: err.to_string(),
            },
            RepositoryError::NoOrigin => JobError::Domain {
                code: ErrorCode::RepositoryNoOrigin,
                message: err.to_string(),
            },
            RepositoryError::Copy(_) | RepositoryError::Git(_) => JobError::internal(err),
        }
    }
}
