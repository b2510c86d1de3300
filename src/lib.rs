#![forbid(unsafe_code)]

pub mod cancellation;
pub mod error;
pub mod jobs;
pub mod repository;
pub mod telemetry;

pub use error::{Effect, Transience};

// Re-export the types callers touch on every interaction.
pub use crate::cancellation::CancellationToken;
pub use crate::jobs::{
    ErrorCode, InstanceId, Job, JobContext, JobError, JobId, JobManager, JobStore, UserId,
};
pub use crate::repository::{
    authenticated_url, DirectoryCopier, EventSink, GitIdentity, RecursiveCopier, RemoteProvider,
    RepositoryError, RepositoryEvent, WorkingCopy,
};
