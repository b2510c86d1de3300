//! Persistence gateway for job records.
//!
//! The engine does not own a schema; hosts hand it a [`JobStore`] and the
//! manager funnels every lifecycle write through it. [`InMemoryJobStore`] is
//! the reference implementation, used by embedders that don't persist jobs
//! and by the tests.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::cancellation::CancellationToken;
use crate::jobs::job::{Job, JobId, UserId};

/// Gateway failures. Backends map their own errors into `Backend`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store operation cancelled")]
    Cancelled,

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("job store backend error: {0}")]
    Backend(String),
}

/// Persistence gateway consumed by the job manager. All operations are
/// cancellable via the supplied token.
pub trait JobStore: Send + Sync {
    /// Persist a freshly registered job record.
    fn add(&self, job: &Job, ct: &CancellationToken) -> Result<(), StoreError>;

    /// Persist `job`'s lifecycle fields (timestamps, cancellation flags,
    /// terminal error) onto the stored record with the same id.
    /// Creation-time fields (description, instance, initiator) are never
    /// overwritten; the worker-side record is a shell.
    fn update(&self, job: &Job, ct: &CancellationToken) -> Result<(), StoreError>;

    /// Record who requested cancellation. The `cancelled` acknowledgement
    /// itself is left to the worker.
    fn mark_cancellation(
        &self,
        id: JobId,
        by: Option<UserId>,
        ct: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Every persisted job with no stop timestamp.
    fn unfinished(&self, ct: &CancellationToken) -> Result<Vec<Job>, StoreError>;

    fn get(&self, id: JobId, ct: &CancellationToken) -> Result<Option<Job>, StoreError>;
}

/// Mutex-map store for hosts without durable job persistence.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(ct: &CancellationToken) -> Result<(), StoreError> {
        if ct.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }
}

impl JobStore for InMemoryJobStore {
    fn add(&self, job: &Job, ct: &CancellationToken) -> Result<(), StoreError> {
        Self::check(ct)?;
        self.jobs
            .lock()
            .expect("job store poisoned")
            .insert(job.id, job.clone());
        Ok(())
    }

    fn update(&self, job: &Job, ct: &CancellationToken) -> Result<(), StoreError> {
        Self::check(ct)?;
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let stored = jobs.get_mut(&job.id).ok_or(StoreError::UnknownJob(job.id))?;
        if job.started_at.is_some() {
            stored.started_at = job.started_at;
        }
        stored.stopped_at = job.stopped_at;
        stored.cancelled = job.cancelled;
        if job.cancel_requested {
            stored.cancel_requested = true;
        }
        if job.cancelled_by.is_some() {
            stored.cancelled_by = job.cancelled_by;
        }
        stored.error_message = job.error_message.clone();
        stored.error_code = job.error_code;
        Ok(())
    }

    fn mark_cancellation(
        &self,
        id: JobId,
        by: Option<UserId>,
        ct: &CancellationToken,
    ) -> Result<(), StoreError> {
        Self::check(ct)?;
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let stored = jobs.get_mut(&id).ok_or(StoreError::UnknownJob(id))?;
        stored.cancel_requested = true;
        stored.cancelled_by = by;
        Ok(())
    }

    fn unfinished(&self, ct: &CancellationToken) -> Result<Vec<Job>, StoreError> {
        Self::check(ct)?;
        let jobs = self.jobs.lock().expect("job store poisoned");
        Ok(jobs
            .values()
            .filter(|j| j.stopped_at.is_none())
            .cloned()
            .collect())
    }

    fn get(&self, id: JobId, ct: &CancellationToken) -> Result<Option<Job>, StoreError> {
        Self::check(ct)?;
        Ok(self
            .jobs
            .lock()
            .expect("job store poisoned")
            .get(&id)
            .cloned())
    }
}
