//! Pooled slot bookkeeping.

use std::fmt;
use std::mem;
use std::time::{Duration, Instant};

/// A pooled container owning exactly one item plus borrow/return bookkeeping.
///
/// Slots are owned by the engine while idle and move to the borrower during a
/// checkout. The engine stamps `last_return` on every release so staleness
/// decisions can be made without touching the item itself.
pub struct Slot<T> {
    id: u64,
    item: T,
    created_at: Instant,
    last_return: Instant,
    borrows: u64,
}

impl<T> Slot<T> {
    pub(crate) fn new(id: u64, item: T) -> Self {
        let now = Instant::now();
        Slot {
            id,
            item,
            created_at: now,
            last_return: now,
            borrows: 0,
        }
    }

    /// Stable identifier assigned at slot creation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn item_mut(&mut self) -> &mut T {
        &mut self.item
    }

    /// When this slot was first created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When this slot was last returned to the pool.
    pub fn last_return(&self) -> Instant {
        self.last_return
    }

    /// Time since the last return.
    pub fn idle(&self) -> Duration {
        self.last_return.elapsed()
    }

    /// Number of times this slot has been handed to a borrower.
    pub fn borrows(&self) -> u64 {
        self.borrows
    }

    /// Replaces the item with a freshly built one, returning the old item so
    /// the caller can dispose of it.
    ///
    /// The replacement is built first; if `make` fails the slot keeps its
    /// current item, so a failed rebuild never leaves the slot empty.
    pub fn rebuild<E>(&mut self, make: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let fresh = make()?;
        Ok(mem::replace(&mut self.item, fresh))
    }

    pub(crate) fn stamp_return(&mut self) {
        self.last_return = Instant::now();
    }

    pub(crate) fn stamp_borrow(&mut self) {
        self.borrows += 1;
    }

    pub(crate) fn into_item(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("idle", &self.idle())
            .field("borrows", &self.borrows)
            .finish()
    }
}
