//! # Pool Warm-Up
//!
//! Purpose: Pre-populate and validate a minimum number of connections at
//! pool construction, under a hard wall-clock budget.
//!
//! ## Design Principles
//! 1. **Prove One First**: The first connection is built and probed
//!    synchronously; if the server is unreachable, warm-up aborts without
//!    burning the budget.
//! 2. **Bounded Fan-Out**: At most ten workers share the remaining units
//!    through a claim counter; a monotonic stop flag and the deadline gate
//!    each new unit, while units already in flight run to completion.
//! 3. **Hold Nothing On Exit**: Every warmed connection goes back to the
//!    engine; the routine owns no slots once it returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rkv_pool::{Pool, PoolPolicy, Slot};

use crate::conn::Conn;
use crate::policy::ConnPolicy;

/// Wall-clock ceiling for the whole routine, measured from its start.
const WARMUP_BUDGET: Duration = Duration::from_secs(3);

/// Upper bound on concurrent acquire-and-validate workers.
const WARMUP_WORKERS: usize = 10;

/// Pre-builds up to `requested` validated connections.
///
/// Failures never propagate: a dead server marks the pool unavailable and
/// the periodic probe takes over recovery from there.
pub(crate) fn prewarm(pool: &Arc<Pool<ConnPolicy>>, requested: usize) {
    let capacity = pool.policy().pool_size().max(1);
    let target = if requested == 0 {
        5.min(capacity)
    } else {
        requested.min(capacity)
    };
    let started = Instant::now();

    // One failure here is read as "the server is unreachable"; more attempts
    // would be wasted work.
    let first = match pool.acquire() {
        Ok(mut slot) => {
            if pool.policy().check(&mut slot) {
                slot
            } else {
                pool.release(slot);
                pool.mark_unavailable("warm-up probe got no liveness acknowledgment");
                tracing::warn!(pool = %pool.policy().name(), "warm-up aborted on first probe");
                return;
            }
        }
        Err(err) => {
            pool.mark_unavailable(err.to_string());
            tracing::warn!(pool = %pool.policy().name(), error = %err, "warm-up aborted on first acquire");
            return;
        }
    };

    let mut warmed: Vec<Slot<Conn>> = Vec::with_capacity(target);
    warmed.push(first);

    let remaining = target - warmed.len();
    if remaining > 0 {
        let stop = AtomicBool::new(false);
        let pending = AtomicUsize::new(remaining);
        let extra: Mutex<Vec<Slot<Conn>>> = Mutex::new(Vec::with_capacity(remaining));

        std::thread::scope(|scope| {
            for _ in 0..remaining.min(WARMUP_WORKERS) {
                scope.spawn(|| loop {
                    if stop.load(Ordering::Acquire) || started.elapsed() > WARMUP_BUDGET {
                        break;
                    }
                    let claimed = pending.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        n.checked_sub(1)
                    });
                    if claimed.is_err() {
                        break;
                    }
                    match pool.acquire() {
                        Ok(mut slot) => {
                            let ok = pool.policy().check(&mut slot);
                            if ok {
                                extra.lock().expect("warm-up mutex poisoned").push(slot);
                            } else {
                                pool.release(slot);
                                stop.store(true, Ordering::Release);
                            }
                        }
                        Err(_) => stop.store(true, Ordering::Release),
                    }
                });
            }
        });

        warmed.append(&mut extra.into_inner().expect("warm-up mutex poisoned"));

        if stop.load(Ordering::Acquire) {
            tracing::warn!(
                pool = %pool.policy().name(),
                warmed = warmed.len(),
                wanted = target,
                "warm-up stopped early after a unit failure"
            );
        } else if started.elapsed() > WARMUP_BUDGET {
            tracing::debug!(
                pool = %pool.policy().name(),
                warmed = warmed.len(),
                wanted = target,
                "warm-up budget exhausted"
            );
        }
    }

    // The warmed set becomes the pool's initial free list.
    for slot in warmed {
        pool.release(slot);
    }
}
