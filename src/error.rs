//! Shared failure classification.
//!
//! Module error types ([`JobError`], [`RepositoryError`], [`StoreError`])
//! answer two operator questions through the vocabulary here: is the failed
//! operation worth retrying, and did it leave state behind. Each error type
//! implements its own `transience()`; the repository errors also classify
//! `effect()`.
//!
//! [`JobError`]: crate::jobs::JobError
//! [`RepositoryError`]: crate::repository::RepositoryError
//! [`StoreError`]: crate::jobs::StoreError

/// Retry guidance for a failed operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retrying cannot succeed until inputs or state change.
    Permanent,
    /// The failure looked transient; a retry is reasonable.
    Retryable,
    /// No basis to judge either way.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What a failed operation may have left behind.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// The failure happened before any mutation.
    None,
    /// State was mutated, locally or remotely, before the failure.
    Some,
    /// Cannot tell whether anything was mutated.
    Unknown,
}
