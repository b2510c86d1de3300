//! In-memory handle for one running job.

use crossbeam::channel::Receiver;

use crate::cancellation::CancellationToken;

/// Couples a job's cancellation token to its worker's completion signal and
/// last-reported progress.
///
/// Owned exclusively by the manager's registry; removed (and thereby
/// dropped) the instant its worker finishes, under the registry lock.
pub(crate) struct JobHandle {
    /// Cancellation controller for the worker.
    pub(crate) token: CancellationToken,
    /// Disconnects when the worker thread exits; never carries a message.
    /// Cloning shares the channel, so any number of callers can block on
    /// completion without coordinating.
    pub(crate) completion: Receiver<()>,
    /// Last-write-wins progress value reported by the operation.
    pub(crate) progress: u32,
}

impl JobHandle {
    pub(crate) fn new(token: CancellationToken, completion: Receiver<()>) -> Self {
        JobHandle {
            token,
            completion,
            progress: 0,
        }
    }
}
