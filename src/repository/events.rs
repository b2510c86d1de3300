//! Lifecycle events published to the host's event sink.

use crate::cancellation::CancellationToken;

/// Sentinel used for the original reference name when HEAD was detached at
/// merge time and no canonical name exists.
pub const UNKNOWN_REFERENCE: &str = "<unknown>";

/// Repository lifecycle notifications.
///
/// A closed set with typed arguments; sinks match on the variant they care
/// about. Only [`RepositoryEvent::PreSynchronize`] is vetoable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// A forced checkout of `target` is about to run.
    Checkout { target: String },
    /// Origin is about to be fetched.
    Fetch,
    /// The working copy is about to be reset onto its tracked branch.
    ResetToOrigin { branch: String, sha: String },
    /// Synchronize is about to push; a `false` return aborts it without
    /// error. The sink may commit to the working copy before returning.
    PreSynchronize,
    /// A merge was rolled back after conflicting.
    MergeConflict {
        original_sha: String,
        target_sha: String,
        /// Canonical name of the original HEAD, or [`UNKNOWN_REFERENCE`]
        /// when it was detached.
        original_reference: String,
        /// The branch that was being merged in.
        target_reference: String,
    },
}

/// External collaborator notified of repository lifecycle transitions.
///
/// The return value is ignored for informational events; for
/// [`RepositoryEvent::PreSynchronize`] a `false` return vetoes the push.
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: RepositoryEvent, ct: &CancellationToken) -> bool;
}

/// Sink that acknowledges everything. For hosts that don't observe
/// repository lifecycle.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn handle_event(&self, _event: RepositoryEvent, _ct: &CancellationToken) -> bool {
        true
    }
}
