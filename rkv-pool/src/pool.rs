//! The pool engine: slot ownership, waiters, availability, recovery.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::error::PoolError;
use crate::policy::PoolPolicy;
use crate::slot::Slot;

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live slots, idle and checked out.
    pub created: usize,
    /// Slots currently sitting on the free list.
    pub idle: usize,
    /// Slots currently held by borrowers.
    pub in_use: usize,
    /// Pending asynchronous acquirers.
    pub async_waiters: usize,
}

struct PoolState<P: PoolPolicy> {
    free: VecDeque<Slot<P::Item>>,
    created: usize,
    waiters: VecDeque<oneshot::Sender<Slot<P::Item>>>,
    closed: bool,
}

/// Bounded pool of reusable slots driven by a [`PoolPolicy`].
///
/// The pool is the sole synchronization point for slot ownership: exactly one
/// borrower holds a given slot at a time, and the free/in-use bookkeeping is
/// serialized behind a single mutex. No FIFO fairness is guaranteed across
/// waiting acquirers.
pub struct Pool<P: PoolPolicy> {
    policy: P,
    state: Mutex<PoolState<P>>,
    cond: Condvar,
    available: AtomicBool,
    cause: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl<P: PoolPolicy> Pool<P> {
    /// Creates an empty pool. Slots are built lazily on acquire; use
    /// [`start_live_check`](Pool::start_live_check) to enable background
    /// recovery probing.
    pub fn new(policy: P) -> Arc<Self> {
        Arc::new(Pool {
            policy,
            state: Mutex::new(PoolState {
                free: VecDeque::new(),
                created: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            available: AtomicBool::new(true),
            cause: Mutex::new(None),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn capacity(&self) -> usize {
        self.policy.pool_size().max(1)
    }

    /// Blocks until a slot is free, creating one when under capacity.
    ///
    /// Fails fast with [`PoolError::Unavailable`] while the pool is marked
    /// down, and with [`PoolError::Timeout`] when no slot frees up within the
    /// policy's acquire timeout.
    pub fn acquire(&self) -> Result<Slot<P::Item>, PoolError<P::Error>> {
        self.ensure_available()?;
        let timeout = self.policy.acquire_timeout();
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(slot) = state.free.pop_front() {
                drop(state);
                return self.hand_off(slot);
            }
            if state.created < self.capacity() {
                state.created += 1;
                drop(state);
                let slot = self.create_slot()?;
                return self.hand_off(slot);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.cond.wait_for(&mut state, remaining).timed_out() {
                self.policy.on_acquire_timeout();
                return Err(PoolError::Timeout(timeout));
            }
        }
    }

    /// Suspends the task until a slot is free, without blocking a thread.
    ///
    /// When the pool is saturated the request queues behind at most
    /// `async_queue_capacity` pending acquirers; beyond that it fails fast
    /// with [`PoolError::QueueFull`].
    pub async fn acquire_async(&self) -> Result<Slot<P::Item>, PoolError<P::Error>> {
        self.ensure_available()?;
        let timeout = self.policy.acquire_timeout();

        let mut rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(slot) = state.free.pop_front() {
                drop(state);
                return self.hand_off(slot);
            }
            if state.created < self.capacity() {
                state.created += 1;
                drop(state);
                let slot = self.create_slot()?;
                return self.hand_off(slot);
            }

            let capacity = self.policy.async_queue_capacity();
            if state.waiters.len() >= capacity {
                return Err(PoolError::QueueFull(capacity));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(slot)) => self.hand_off(slot),
            // The sender only disappears when the pool shuts down.
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                // Close the channel first so a release racing with this
                // timeout either lands in the drained buffer or moves on to
                // the next waiter; either way no slot is lost.
                rx.close();
                if let Ok(slot) = rx.try_recv() {
                    return self.hand_off(slot);
                }
                self.policy.on_acquire_timeout();
                Err(PoolError::Timeout(timeout))
            }
        }
    }

    /// Returns a slot to the pool.
    ///
    /// The return stamp and free-list insertion happen exactly once here, on
    /// every path: waiter hand-off, free-list insertion, or teardown of a
    /// closed pool.
    pub fn release(&self, mut slot: Slot<P::Item>) {
        slot.stamp_return();
        let mut state = self.state.lock();
        if state.closed {
            state.created = state.created.saturating_sub(1);
            drop(state);
            self.policy.destroy(slot.into_item());
            return;
        }
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(slot) {
                Ok(()) => return,
                // Receiver gave up (timeout or cancellation); try the next.
                Err(back) => slot = back,
            }
        }
        state.free.push_back(slot);
        drop(state);
        self.cond.notify_one();
    }

    /// Destroys a slot's item and frees its capacity.
    pub fn discard(&self, slot: Slot<P::Item>) {
        {
            let mut state = self.state.lock();
            state.created = state.created.saturating_sub(1);
        }
        self.cond.notify_one();
        self.policy.destroy(slot.into_item());
    }

    /// Whether the pool currently believes the backing resource is reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// The failure that tripped the pool into the unavailable state, if any.
    pub fn unavailable_cause(&self) -> Option<String> {
        self.cause.lock().clone()
    }

    /// Marks the pool unavailable. Only the first transition records the
    /// cause and fires the policy hook; later calls are no-ops so the
    /// original failure is preserved.
    pub fn mark_unavailable(&self, cause: impl Into<String>) {
        let was_available = self.available.swap(false, Ordering::AcqRel);
        if was_available {
            let cause = cause.into();
            *self.cause.lock() = Some(cause.clone());
            tracing::warn!(pool = %self.policy.name(), %cause, "pool marked unavailable");
            self.policy.on_unavailable();
        }
    }

    /// Marks the pool available again and wakes blocked acquirers.
    pub fn mark_available(&self) {
        let was_available = self.available.swap(true, Ordering::AcqRel);
        if !was_available {
            *self.cause.lock() = None;
            tracing::info!(pool = %self.policy.name(), "pool available again");
            self.policy.on_available();
            self.cond.notify_all();
        }
    }

    /// Snapshot of the current bookkeeping.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            created: state.created,
            idle: state.free.len(),
            in_use: state.created.saturating_sub(state.free.len()),
            async_waiters: state.waiters.len(),
        }
    }

    /// Runs one availability probe pass; returns whether the pool ended the
    /// pass available.
    ///
    /// While the pool is down, every idle slot is rebuilt and probed through
    /// [`PoolPolicy::check`]. If there are no idle slots, one fresh item is
    /// built and probed instead (capacity permitting). Only a fully clean
    /// pass transitions the pool back to available.
    pub fn run_live_check(&self) -> bool {
        if self.is_available() {
            return true;
        }

        let mut idle = {
            let mut state = self.state.lock();
            mem::take(&mut state.free)
        };
        let had_idle = !idle.is_empty();
        let mut all_ok = true;
        for slot in idle.iter_mut() {
            if !self.policy.check(slot) {
                all_ok = false;
                break;
            }
        }
        for slot in idle {
            self.release(slot);
        }

        let mut proven = had_idle && all_ok;
        if !had_idle {
            let reserved = {
                let mut state = self.state.lock();
                if !state.closed && state.created < self.capacity() {
                    state.created += 1;
                    true
                } else {
                    false
                }
            };
            if reserved {
                if let Ok(mut slot) = self.create_slot() {
                    if self.policy.check(&mut slot) {
                        proven = true;
                        self.release(slot);
                    } else {
                        self.discard(slot);
                    }
                }
            }
        }

        if proven {
            self.mark_available();
        }
        proven
    }

    /// Starts the periodic availability probe on a background thread.
    ///
    /// Returns `None` when the policy disables checking. The returned handle
    /// must be stopped to avoid leaking the thread.
    pub fn start_live_check(self: &Arc<Self>) -> Option<LiveCheckHandle> {
        let interval = self.policy.check_interval()?;
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(StopSignal::default());
        let stop_thread = Arc::clone(&stop);
        let pool = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.wait_timeout(interval) {
                pool.run_live_check();
            }
        });

        Some(LiveCheckHandle {
            stop,
            join: Some(join),
        })
    }

    fn ensure_available(&self) -> Result<(), PoolError<P::Error>> {
        if self.is_available() {
            return Ok(());
        }
        let cause = self
            .cause
            .lock()
            .clone()
            .unwrap_or_else(|| "no cause recorded".to_string());
        Err(PoolError::Unavailable(cause))
    }

    /// Builds a slot for capacity that the caller already reserved. On
    /// failure the reservation is released and the pool goes unavailable
    /// with the creation error as cause.
    fn create_slot(&self) -> Result<Slot<P::Item>, PoolError<P::Error>> {
        match self.policy.create() {
            Ok(item) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                Ok(Slot::new(id, item))
            }
            Err(err) => {
                {
                    let mut state = self.state.lock();
                    state.created = state.created.saturating_sub(1);
                }
                self.cond.notify_one();
                self.mark_unavailable(err.to_string());
                Err(PoolError::Policy(err))
            }
        }
    }

    /// Final validation between selecting a slot and handing it to the
    /// caller: idle-expired slots are rebuilt, then the policy's pre-hand-off
    /// hook runs to completion. The borrower never observes a slot
    /// mid-validation.
    fn hand_off(&self, mut slot: Slot<P::Item>) -> Result<Slot<P::Item>, PoolError<P::Error>> {
        if let Some(idle_max) = self.policy.idle_timeout() {
            if !idle_max.is_zero() && slot.idle() > idle_max {
                match slot.rebuild(|| self.policy.create()) {
                    Ok(old) => self.policy.destroy(old),
                    Err(err) => return Err(self.forfeit(slot, err)),
                }
            }
        }
        if let Err(err) = self.policy.before_hand_off(&mut slot, self.is_available()) {
            return Err(self.forfeit(slot, err));
        }
        slot.stamp_borrow();
        Ok(slot)
    }

    /// Drops a slot that failed validation on its way to a borrower: the
    /// item is destroyed, the capacity freed, and the pool marked
    /// unavailable with the failure as cause.
    fn forfeit(&self, slot: Slot<P::Item>, err: P::Error) -> PoolError<P::Error> {
        self.mark_unavailable(err.to_string());
        self.discard(slot);
        PoolError::Policy(err)
    }
}

impl<P: PoolPolicy> Drop for Pool<P> {
    fn drop(&mut self) {
        let freed = {
            let mut state = self.state.lock();
            state.closed = true;
            // Dropping the senders wakes async waiters with a recv error.
            state.waiters.clear();
            let freed: Vec<_> = state.free.drain(..).collect();
            state.created = state.created.saturating_sub(freed.len());
            freed
        };
        self.cond.notify_all();
        for slot in freed {
            self.policy.destroy(slot.into_item());
        }
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Sleeps up to `dur`; returns true once stop has been requested.
    fn wait_timeout(&self, dur: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        self.cond.wait_for(&mut stopped, dur);
        *stopped
    }
}

/// Handle for the background availability probe.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct LiveCheckHandle {
    stop: Arc<StopSignal>,
    join: Option<JoinHandle<()>>,
}

impl LiveCheckHandle {
    /// Stops the probe and waits for the thread to finish.
    ///
    /// Use this in tests or shutdown hooks to avoid leaking threads.
    pub fn stop(mut self) {
        self.stop.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for LiveCheckHandle {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
