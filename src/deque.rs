//! Blocking double-ended queue with FIFO handoff to waiting takers

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome slot for one blocked taker.
enum Slot<T> {
    Waiting,
    Delivered(Arc<T>),
    Interrupted,
}

struct Waiter<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            cond: Condvar::new(),
        }
    }
}

struct Inner<T> {
    items: VecDeque<Arc<T>>,
    /// Blocked takers in arrival order. An arriving element is handed to the
    /// front waiter directly instead of entering `items`.
    waiters: VecDeque<Arc<Waiter<T>>>,
}

/// Bounded double-ended queue of shared elements, compared by identity.
///
/// Producers never block (capacity is checked with offer semantics);
/// consumers may block until an element arrives or the waiter is
/// interrupted. Blocked takers are served strictly first-come-first-served.
pub(crate) struct BlockingDeque<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T> BlockingDeque<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Offers an element at the head. Returns false when the deque is full.
    pub(crate) fn push_front(&self, item: Arc<T>) -> bool {
        self.push(item, true)
    }

    /// Offers an element at the tail. Returns false when the deque is full.
    pub(crate) fn push_back(&self, item: Arc<T>) -> bool {
        self.push(item, false)
    }

    fn push(&self, item: Arc<T>, front: bool) -> bool {
        let mut inner = self.inner.lock();
        // The longest-waiting taker gets the element before it ever lands in
        // the queue, preserving FIFO wakeup order.
        if let Some(waiter) = inner.waiters.pop_front() {
            let mut slot = waiter.slot.lock();
            *slot = Slot::Delivered(item);
            waiter.cond.notify_one();
            return true;
        }
        if inner.items.len() >= self.capacity {
            return false;
        }
        if front {
            inner.items.push_front(item);
        } else {
            inner.items.push_back(item);
        }
        true
    }

    /// Removes and returns the head element, if any.
    pub(crate) fn poll_front(&self) -> Option<Arc<T>> {
        self.inner.lock().items.pop_front()
    }

    /// Removes and returns the tail element, if any.
    #[allow(dead_code)]
    pub(crate) fn poll_back(&self) -> Option<Arc<T>> {
        self.inner.lock().items.pop_back()
    }

    /// Blocks until an element arrives. Returns `None` only when the waiter
    /// is interrupted.
    pub(crate) fn take_front(&self) -> Option<Arc<T>> {
        let waiter = {
            let mut inner = self.inner.lock();
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            let waiter = Arc::new(Waiter::new());
            inner.waiters.push_back(Arc::clone(&waiter));
            waiter
        };

        let mut slot = waiter.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            waiter.cond.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Interrupted) {
            Slot::Delivered(item) => Some(item),
            _ => None,
        }
    }

    /// Waits up to `timeout` for an element. Returns `None` on expiry or
    /// interruption.
    pub(crate) fn poll_front_timeout(&self, timeout: Duration) -> Option<Arc<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // A timeout too large to represent waits indefinitely.
            return self.take_front();
        };

        let waiter = {
            let mut inner = self.inner.lock();
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            let waiter = Arc::new(Waiter::new());
            inner.waiters.push_back(Arc::clone(&waiter));
            waiter
        };

        let mut slot = waiter.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            if waiter.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        if matches!(*slot, Slot::Waiting) {
            // Timed out. Unregister, then accept an element a producer may
            // have delivered while we raced for the deque lock.
            drop(slot);
            let mut inner = self.inner.lock();
            if let Some(pos) = inner
                .waiters
                .iter()
                .position(|w| Arc::ptr_eq(w, &waiter))
            {
                inner.waiters.remove(pos);
            }
            drop(inner);
            slot = waiter.slot.lock();
        }
        match std::mem::replace(&mut *slot, Slot::Interrupted) {
            Slot::Delivered(item) => Some(item),
            _ => None,
        }
    }

    /// Removes the first element identical to `item`. O(n).
    pub(crate) fn remove_first_occurrence(&self, item: &Arc<T>) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.items.iter().position(|i| Arc::ptr_eq(i, item)) {
            inner.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Whether an element identical to `item` is currently queued.
    pub(crate) fn contains(&self, item: &Arc<T>) -> bool {
        self.inner.lock().items.iter().any(|i| Arc::ptr_eq(i, item))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any taker is currently blocked on this deque.
    pub(crate) fn has_take_waiters(&self) -> bool {
        !self.inner.lock().waiters.is_empty()
    }

    /// Copies the queued elements, head-first (ascending) or tail-first
    /// (descending).
    pub(crate) fn snapshot(&self, descending: bool) -> Vec<Arc<T>> {
        let inner = self.inner.lock();
        if descending {
            inner.items.iter().rev().cloned().collect()
        } else {
            inner.items.iter().cloned().collect()
        }
    }

    /// Unblocks every waiting taker with an interruption signal.
    pub(crate) fn interrupt_take_waiters(&self) {
        let mut inner = self.inner.lock();
        for waiter in inner.waiters.drain(..) {
            let mut slot = waiter.slot.lock();
            if matches!(*slot, Slot::Waiting) {
                *slot = Slot::Interrupted;
            }
            waiter.cond.notify_one();
        }
    }
}
