//! Pooled item records and their lifecycle state machine

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::deque::BlockingDeque;

/// Monotonic milliseconds since the first clock access in this process.
/// Item timestamps are comparable only through this clock.
pub(crate) fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Lifecycle state of a pooled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemState {
    /// In the idle deque, available to borrowers.
    Idle,
    /// Lent to exactly one borrower.
    Allocated,
    /// Under test by the evictor.
    Eviction,
    /// Was under eviction test when a borrower grabbed it; the evictor
    /// re-queues it at the head when its test ends.
    EvictionReturnToHead,
    /// Reserved for validation outside the eviction sweep.
    #[allow(dead_code)]
    Validation,
    /// Terminal: destroyed or being destroyed.
    Invalid,
    /// Lent but unused past the abandonment timeout; awaiting reclamation.
    Abandoned,
    /// Between return and re-entering the idle set; shields the item from
    /// the abandonment reaper.
    Returning,
}

/// Per-payload bookkeeping record. Exactly one exists per distinct payload
/// identity for the payload's lifetime in the pool.
pub(crate) struct PooledItem<T> {
    payload: Arc<T>,
    state: Mutex<ItemState>,
    create_time: u64,
    last_borrow_time: AtomicU64,
    last_return_time: AtomicU64,
    last_use_time: AtomicU64,
    borrowed_count: AtomicU64,
}

impl<T> PooledItem<T> {
    pub(crate) fn new(payload: Arc<T>) -> Self {
        let now = now_millis();
        Self {
            payload,
            state: Mutex::new(ItemState::Idle),
            create_time: now,
            last_borrow_time: AtomicU64::new(now),
            last_return_time: AtomicU64::new(now),
            last_use_time: AtomicU64::new(now),
            borrowed_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn payload(&self) -> &Arc<T> {
        &self.payload
    }

    /// Identity key of the payload, stable for its lifetime in the pool.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.payload) as usize
    }

    /// Claims the item for a borrower. Wins only from `Idle`; an item under
    /// eviction test is flagged for head re-insertion instead.
    pub(crate) fn allocate(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ItemState::Idle => {
                *state = ItemState::Allocated;
                let now = now_millis();
                self.last_borrow_time.store(now, Ordering::Relaxed);
                self.last_use_time.store(now, Ordering::Relaxed);
                self.borrowed_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            ItemState::Eviction => {
                *state = ItemState::EvictionReturnToHead;
                false
            }
            _ => false,
        }
    }

    /// Completes a return, making the item idle again.
    pub(crate) fn deallocate(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, ItemState::Allocated | ItemState::Returning) {
            *state = ItemState::Idle;
            self.last_return_time.store(now_millis(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Terminal transition. Returns false when the item was already invalid,
    /// so only one destroyer ever runs the teardown.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ItemState::Invalid {
            false
        } else {
            *state = ItemState::Invalid;
            true
        }
    }

    /// Atomically verifies the item is lent and shields it from the
    /// abandonment reaper while the return is processed.
    pub(crate) fn mark_returning(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ItemState::Allocated {
            *state = ItemState::Returning;
            true
        } else {
            false
        }
    }

    /// Claims an idle item for an eviction test.
    pub(crate) fn start_eviction_test(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ItemState::Idle {
            *state = ItemState::Eviction;
            true
        } else {
            false
        }
    }

    /// Ends an eviction test. An item a borrower grabbed mid-test goes back
    /// to the head of the idle deque.
    pub(crate) fn end_eviction_test(item: &Arc<Self>, idle: &BlockingDeque<PooledItem<T>>) -> bool {
        let mut state = item.state.lock();
        match *state {
            ItemState::Eviction => {
                *state = ItemState::Idle;
                true
            }
            ItemState::EvictionReturnToHead => {
                *state = ItemState::Idle;
                drop(state);
                idle.push_front(Arc::clone(item));
                false
            }
            _ => false,
        }
    }

    /// Marks a lent item abandoned when its last use is at or before
    /// `cutoff` millis. The caller invalidates marked items afterwards,
    /// outside the item lock.
    pub(crate) fn try_mark_abandoned(&self, cutoff: u64) -> bool {
        let mut state = self.state.lock();
        if *state == ItemState::Allocated && self.last_use_time.load(Ordering::Relaxed) <= cutoff {
            *state = ItemState::Abandoned;
            true
        } else {
            false
        }
    }

    /// Time since the item last re-entered the idle set.
    pub(crate) fn idle_time(&self) -> Duration {
        let last_return = self.last_return_time.load(Ordering::Relaxed);
        Duration::from_millis(now_millis().saturating_sub(last_return))
    }

    /// Time the current (or most recent) borrower has held the item.
    pub(crate) fn active_time(&self) -> Duration {
        let returned = self.last_return_time.load(Ordering::Relaxed);
        let borrowed = self.last_borrow_time.load(Ordering::Relaxed);
        if returned > borrowed {
            Duration::from_millis(returned - borrowed)
        } else {
            Duration::from_millis(now_millis().saturating_sub(borrowed))
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ItemState {
        *self.state.lock()
    }
}

impl<T> fmt::Debug for PooledItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledItem")
            .field("state", &*self.state.lock())
            .field("create_time", &self.create_time)
            .field(
                "last_borrow_time",
                &self.last_borrow_time.load(Ordering::Relaxed),
            )
            .field(
                "last_return_time",
                &self.last_return_time.load(Ordering::Relaxed),
            )
            .field(
                "last_use_time",
                &self.last_use_time.load(Ordering::Relaxed),
            )
            .field("borrowed_count", &self.borrowed_count.load(Ordering::Relaxed))
            .finish()
    }
}
