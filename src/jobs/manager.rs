//! The job manager: authoritative in-memory registry of running jobs.
//!
//! Each registered operation gets a dedicated worker thread (git network and
//! disk calls block natively, and job concurrency is bounded by humans, not
//! by a pool), a fresh cancellation token, and a progress slot in the
//! registry. The worker wrapper here is the single place job outcomes are
//! classified and persisted.
//!
//! Lock discipline: one mutex guards the id → handle map and the progress
//! fields inside it. It is held only for map and field mutation, never
//! across persistence or blocking waits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::jobs::error::JobError;
use crate::jobs::handle::JobHandle;
use crate::jobs::job::{InstanceId, Job, JobId, UserId};
use crate::jobs::store::{JobStore, StoreError};

/// Accepts progress values from the running operation; last write wins.
pub type ProgressReporter = dyn Fn(u32) + Send + Sync;

/// Request-scoped collaborators handed to each operation.
pub struct JobContext {
    /// Persistence gateway, freshly scoped to this worker.
    pub store: Arc<dyn JobStore>,
}

/// The operation delegate run by a worker.
pub type BoxedJobOperation = Box<
    dyn FnOnce(&Job, &JobContext, &ProgressReporter, &CancellationToken) -> Result<(), JobError>
        + Send,
>;

type Registry = Mutex<HashMap<JobId, JobHandle>>;

/// How often a bounded drain re-checks the caller's token.
const DRAIN_POLL: Duration = Duration::from_millis(50);

pub struct JobManager {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        JobManager {
            store,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Startup sweep: every persisted job with no stop timestamp was orphaned
    /// by a process death and is marked cancelled + stopped, never resumed.
    ///
    /// Call before registering any operation.
    pub fn start(&self, ct: &CancellationToken) -> Result<(), StoreError> {
        for mut job in self.store.unfinished(ct)? {
            warn!(job = %job.id, "sweeping job orphaned by process death");
            job.cancelled = true;
            job.stopped_at = Some(OffsetDateTime::now_utc());
            self.store.update(&job, ct)?;
        }
        Ok(())
    }

    /// Persist `job` and start `operation` on a dedicated worker.
    ///
    /// Returns once the worker is registered, not once it completes. The
    /// operation runs against a fresh shell record carrying only the job's
    /// identity; caller-side mutations made after this call are invisible to
    /// it. `on_complete` runs only if the operation finished without error
    /// or cancellation.
    pub fn register_operation<F>(
        &self,
        mut job: Job,
        operation: F,
        on_complete: Option<BoxedJobOperation>,
        ct: &CancellationToken,
    ) -> Result<JobId, JobError>
    where
        F: FnOnce(&Job, &JobContext, &ProgressReporter, &CancellationToken) -> Result<(), JobError>
            + Send
            + 'static,
    {
        job.started_at = Some(OffsetDateTime::now_utc());
        job.stopped_at = None;
        job.cancel_requested = false;
        job.cancelled = false;
        job.cancelled_by = None;
        self.store.add(&job, ct)?;

        let token = CancellationToken::new();
        let (completion_tx, completion_rx) = bounded::<()>(0);
        self.registry
            .lock()
            .expect("job registry poisoned")
            .insert(job.id, JobHandle::new(token.clone(), completion_rx));

        let id = job.id;
        let instance = job.instance;
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name(format!("job-{id}"))
            .spawn(move || {
                run_job(
                    store,
                    registry,
                    id,
                    instance,
                    Box::new(operation),
                    on_complete,
                    token,
                    completion_tx,
                )
            });
        if let Err(err) = spawned {
            self.registry
                .lock()
                .expect("job registry poisoned")
                .remove(&id);
            return Err(JobError::Spawn(err));
        }

        info!(job = %id, description = %job.description, "registered job");
        Ok(id)
    }

    /// Request cancellation of a running job.
    ///
    /// Returns `false` when no handle is registered for `id` — cancelling a
    /// finished or unknown job is not an error. Repeated calls are no-ops
    /// past the first. `actor` is persisted as `cancelled_by`; the
    /// `cancelled` acknowledgement itself is written by the worker, so the
    /// cancel path and the worker path never race on terminal state. With
    /// `blocking` set, waits for the worker to finish before returning.
    pub fn cancel_job(
        &self,
        id: JobId,
        actor: Option<UserId>,
        blocking: bool,
        ct: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let completion = {
            let registry = self.registry.lock().expect("job registry poisoned");
            match registry.get(&id) {
                None => return Ok(false),
                Some(handle) => {
                    handle.token.cancel();
                    handle.completion.clone()
                }
            }
        };

        self.store.mark_cancellation(id, actor, ct)?;
        info!(job = %id, blocking, "job cancellation requested");

        if blocking {
            // The channel never carries a message; disconnect means the
            // worker exited.
            let _ = completion.recv();
        }
        Ok(true)
    }

    /// Last-reported progress for a still-running job, or `None` if the job
    /// is not currently registered (finished, never started, or unknown).
    pub fn job_progress(&self, id: JobId) -> Option<u32> {
        self.registry
            .lock()
            .expect("job registry poisoned")
            .get(&id)
            .map(|handle| handle.progress)
    }

    /// Number of currently registered jobs.
    pub fn active_jobs(&self) -> usize {
        self.registry.lock().expect("job registry poisoned").len()
    }

    /// Shutdown drain: request cancellation on every registered handle, then
    /// await them all, bounded by the caller's token.
    pub fn stop(&self, ct: &CancellationToken) {
        let waiters: Vec<Receiver<()>> = {
            let registry = self.registry.lock().expect("job registry poisoned");
            registry
                .values()
                .map(|handle| {
                    handle.token.cancel();
                    handle.completion.clone()
                })
                .collect()
        };
        info!(jobs = waiters.len(), "draining job registry");

        for completion in waiters {
            loop {
                match completion.recv_timeout(DRAIN_POLL) {
                    Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if ct.is_cancelled() {
                            warn!("shutdown drain abandoned at caller's deadline");
                            return;
                        }
                    }
                    Ok(()) => {}
                }
            }
        }
    }
}

/// The wrapper every worker runs. Classifies the outcome, sets the stop
/// timestamp exactly once, persists, runs the continuation on clean success,
/// and removes the handle as the final step.
#[allow(clippy::too_many_arguments)]
fn run_job(
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    id: JobId,
    instance: InstanceId,
    operation: BoxedJobOperation,
    on_complete: Option<BoxedJobOperation>,
    token: CancellationToken,
    completion_tx: Sender<()>,
) {
    // Dropped on any exit path, waking everyone blocked on completion.
    let _completion_guard = completion_tx;

    let ctx = JobContext {
        store: Arc::clone(&store),
    };
    let progress = {
        let registry = Arc::clone(&registry);
        move |value: u32| {
            if let Some(handle) = registry
                .lock()
                .expect("job registry poisoned")
                .get_mut(&id)
            {
                handle.progress = value;
            }
        }
    };

    let mut job = Job::shell(id, instance);
    let outcome = operation(&job, &ctx, &progress, &token);
    apply_outcome(&mut job, outcome);

    // The stop timestamp marks the main operation settling and is written
    // exactly once, here, before the continuation runs. The continuation may
    // amend terminal error state below but never the timestamp.
    job.stopped_at = Some(OffsetDateTime::now_utc());

    let persist_ct = CancellationToken::new();
    if let Err(err) = store.update(&job, &persist_ct) {
        warn!(job = %id, %err, "failed to persist terminal job state");
    }

    if job.error_message.is_none() && !job.cancelled {
        if let Some(continuation) = on_complete {
            let outcome = continuation(&job, &ctx, &progress, &token);
            if outcome.is_err() {
                // Second save only when the continuation changed terminal
                // state; the common success path already persisted above.
                apply_outcome(&mut job, outcome);
                if let Err(err) = store.update(&job, &persist_ct) {
                    warn!(job = %id, %err, "failed to persist continuation failure");
                }
            }
        }
    }

    debug!(
        job = %id,
        cancelled = job.cancelled,
        errored = job.error_message.is_some(),
        "job finished"
    );

    // The single place a handle's lifetime ends. Happens after the terminal
    // persistence write, so a caller that stops seeing the job in the
    // registry can rely on its record being durable.
    registry
        .lock()
        .expect("job registry poisoned")
        .remove(&id);
}

/// Classify an operation outcome onto the job record. Cancellation carries
/// no error detail; domain failures store their message and code alone;
/// everything else gets the full diagnostic dump.
fn apply_outcome(job: &mut Job, outcome: Result<(), JobError>) {
    match outcome {
        Ok(()) => {}
        Err(JobError::Cancelled) => job.cancelled = true,
        Err(JobError::Domain { code, message }) => {
            job.error_code = Some(code);
            job.error_message = Some(message);
        }
        Err(other) => job.error_message = Some(format!("{other:?}")),
    }
}
