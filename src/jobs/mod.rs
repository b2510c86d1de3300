//! Job execution engine.
//!
//! A job is one long-lived, cancellable background operation (build, repo
//! sync, deployment). The [`JobManager`] owns the in-memory registry of
//! running jobs, runs each one on a dedicated worker thread, and persists
//! lifecycle transitions through the [`JobStore`] gateway.

pub mod error;
mod handle;
pub mod job;
pub mod manager;
pub mod store;

pub use error::JobError;
pub use job::{ErrorCode, InstanceId, Job, JobId, UserId};
pub use manager::{BoxedJobOperation, JobContext, JobManager, ProgressReporter};
pub use store::{InMemoryJobStore, JobStore, StoreError};
