//! Engine-level errors.
//!
//! The engine reports its own failure classes and forwards policy failures
//! unchanged, so callers can match on whichever layer they care about.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`Pool`](crate::Pool) operations.
///
/// `E` is the policy's error type; it passes through [`PoolError::Policy`]
/// untouched.
#[derive(Debug, Error)]
pub enum PoolError<E>
where
    E: std::error::Error + 'static,
{
    /// No slot became free within the configured acquire timeout.
    #[error("acquire timed out after {0:?}")]
    Timeout(Duration),
    /// The async waiter queue is at capacity.
    #[error("async acquire queue is full (capacity {0})")]
    QueueFull(usize),
    /// The pool is marked unavailable; the cause is the failure that tripped it.
    #[error("pool is unavailable: {0}")]
    Unavailable(String),
    /// The pool has been shut down.
    #[error("pool is closed")]
    Closed,
    /// The policy failed while creating or validating an item.
    #[error(transparent)]
    Policy(#[from] E),
}
