//! Repository synchronization engine.
//!
//! One [`WorkingCopy`] owns one on-disk checkout and exposes the fetch,
//! checkout, test-merge, push, reset, merge, and synchronize operations the
//! fleet manager runs as jobs. Every operation is cooperatively cancellable
//! and cleans up its ephemeral remotes/branches on every exit path.

pub mod copier;
pub mod engine;
pub mod error;
pub mod events;
pub mod provider;

pub use copier::{DirectoryCopier, RecursiveCopier};
pub use engine::{authenticated_url, GitIdentity, WorkingCopy, TEMPORARY_BRANCH};
pub use error::RepositoryError;
pub use events::{EventSink, NullEventSink, RepositoryEvent, UNKNOWN_REFERENCE};
pub use provider::RemoteProvider;
