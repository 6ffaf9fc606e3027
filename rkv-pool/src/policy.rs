//! The policy seam between the engine and the pooled resource.

use std::time::Duration;

use crate::slot::Slot;

/// Callbacks and limits supplied by the resource owner.
///
/// The engine invokes these from multiple threads across independent slots;
/// implementations must be safe to call concurrently. None of the callbacks
/// should retry internally; retry policy belongs to the engine's acquire
/// loop or to the caller.
///
/// The pool's availability flag is passed *into* [`before_hand_off`] rather
/// than exposed through a back-reference, so policies stay free of any
/// ownership cycle with the pool that drives them.
///
/// [`before_hand_off`]: PoolPolicy::before_hand_off
pub trait PoolPolicy: Send + Sync + 'static {
    /// The pooled item.
    type Item: Send + 'static;
    /// Failure type for creation and validation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Identifier used in log events.
    fn name(&self) -> String;

    /// Maximum number of live slots (idle + checked out). Must be >= 1.
    fn pool_size(&self) -> usize;

    /// Idle age after which the engine rebuilds a slot before hand-off.
    /// `None` disables idle-based rebuilds.
    fn idle_timeout(&self) -> Option<Duration>;

    /// How long a synchronous or asynchronous acquire may wait for a slot.
    fn acquire_timeout(&self) -> Duration;

    /// Upper bound on queued asynchronous acquirers.
    fn async_queue_capacity(&self) -> usize;

    /// Interval of the background availability probe. `None` disables it.
    fn check_interval(&self) -> Option<Duration>;

    /// Builds a ready-to-use item. A failure here marks the pool unavailable
    /// and surfaces to the acquirer; creation is all-or-nothing from the
    /// engine's point of view.
    fn create(&self) -> Result<Self::Item, Self::Error>;

    /// Best-effort disposal. Must not fail; a failing close must never block
    /// pool shrink or shutdown.
    fn destroy(&self, item: Self::Item);

    /// Runs to completion after a slot has been selected for a caller and
    /// before the caller sees it. `pool_available` is the engine's current
    /// availability flag; policies use it to skip expensive re-validation
    /// while the pool is known to be down.
    fn before_hand_off(
        &self,
        slot: &mut Slot<Self::Item>,
        pool_available: bool,
    ) -> Result<(), Self::Error>;

    /// Rebuilds the slot's item and probes it. Returns true only when the
    /// probe gets the expected acknowledgment. Driven by the periodic
    /// availability check and by pool warm-up.
    fn check(&self, slot: &mut Slot<Self::Item>) -> bool;

    /// Called when an acquire gives up waiting.
    fn on_acquire_timeout(&self) {}

    /// Called on the unavailable -> available transition.
    fn on_available(&self) {}

    /// Called on the available -> unavailable transition.
    fn on_unavailable(&self) {}
}
