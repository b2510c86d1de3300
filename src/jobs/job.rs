//! The persisted job record and its identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable job identifier, assigned at creation and never reused while any
/// in-memory handle references it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The host instance a job belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of the human (or service account) that initiated or cancelled a
/// job. System-initiated jobs carry none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

/// Machine-classifiable failure codes for terminal job errors.
///
/// Only expected domain failures get a code; infrastructure faults are
/// stored with full diagnostic detail and no code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Test merges require origin to be a recognized hosting provider.
    RepositoryNotHosted,
    /// Reset/merge-origin require HEAD to track a remote branch.
    RepositoryNotTracking,
    /// Access tokens require an HTTPS origin URL.
    RepositoryUrlNotHttps,
    /// The working copy has no origin remote configured.
    RepositoryNoOrigin,
}

/// A persisted record of one background operation.
///
/// Created by the caller, persisted by the [`JobManager`] at registration,
/// then mutated only by the owning worker until terminal. Once `stopped_at`
/// is set the record is immutable.
///
/// [`JobManager`]: crate::jobs::JobManager
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Human-readable description of what the job does.
    pub description: String,
    /// Owning instance.
    pub instance: InstanceId,
    /// Initiator identity; `None` for system-initiated jobs.
    pub started_by: Option<UserId>,
    pub started_at: Option<OffsetDateTime>,
    /// Set exactly once, after the operation (and continuation) settle.
    pub stopped_at: Option<OffsetDateTime>,
    /// Set by the cancel path when cancellation is requested.
    pub cancel_requested: bool,
    pub cancelled_by: Option<UserId>,
    /// Set by the worker when the operation acknowledged cancellation.
    pub cancelled: bool,
    /// Terminal error detail; `None` for success and cancellation.
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl Job {
    /// A new job for `instance`, optionally initiated by `started_by`.
    pub fn new(description: impl Into<String>, instance: InstanceId, started_by: Option<UserId>) -> Self {
        Job {
            id: JobId::new(),
            description: description.into(),
            instance,
            started_by,
            started_at: None,
            stopped_at: None,
            cancel_requested: false,
            cancelled_by: None,
            cancelled: false,
            error_message: None,
            error_code: None,
        }
    }

    /// The fresh shell handed to a worker: identity only, so the worker never
    /// sees caller-side unpersisted mutations.
    pub(crate) fn shell(id: JobId, instance: InstanceId) -> Self {
        Job {
            id,
            description: String::new(),
            instance,
            started_by: None,
            started_at: None,
            stopped_at: None,
            cancel_requested: false,
            cancelled_by: None,
            cancelled: false,
            error_message: None,
            error_code: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stopped_at.is_some()
    }
}
