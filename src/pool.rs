//! Core object pool implementation

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{AbandonedConfig, PoolConfig};
use crate::deque::BlockingDeque;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{eviction_policy, EvictionConfig};
use crate::factory::PooledObjectFactory;
use crate::object::{now_millis, PooledItem};

/// Idle-deque capacity sentinel; the idle set is effectively unbounded and
/// population is bounded by `max_total` instead.
const IDLE_CAPACITY: usize = usize::MAX;

/// Retry interval for the polling async borrow loop.
const ASYNC_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the running maintenance thread. Dropping it disconnects the
/// stop channel, which ends the thread's loop.
struct Evictor {
    _stop: Sender<()>,
}

/// Sweep state owned by the evictor: the iteration cursor over the idle
/// snapshot and the timer handle. Guarded by the pool's eviction lock so
/// two sweeps can never overlap.
struct EvictionState<T> {
    cursor: Option<std::vec::IntoIter<Arc<PooledItem<T>>>>,
    evictor: Option<Evictor>,
}

struct PoolInner<T: Send + Sync + 'static> {
    config: PoolConfig,
    abandoned: Option<AbandonedConfig>,
    factory: Arc<dyn PooledObjectFactory<T>>,
    idle: BlockingDeque<PooledItem<T>>,
    all: DashMap<usize, Arc<PooledItem<T>>>,
    create_count: AtomicIsize,
    destroyed_count: AtomicUsize,
    destroyed_by_evictor_count: AtomicUsize,
    destroyed_by_borrow_validation_count: AtomicUsize,
    closed: Mutex<bool>,
    eviction: Mutex<EvictionState<T>>,
}

/// Thread-safe object pool that lends factory-built payloads to borrowers
/// and reclaims them for reuse.
///
/// Payloads are handed out as `Arc<T>` and compared by identity: the `Arc`
/// returned by [`borrow_object`](ObjectPool::borrow_object) is the handle
/// expected back by [`return_object`](ObjectPool::return_object). Cloning
/// the pool yields another handle to the same shared state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use lendpool::{BoxError, ObjectPool, PoolConfig, PooledObjectFactory};
///
/// struct SessionFactory;
///
/// impl PooledObjectFactory<String> for SessionFactory {
///     fn make_object(&self) -> Result<String, BoxError> {
///         Ok("session".to_string())
///     }
/// }
///
/// let pool = ObjectPool::new(Arc::new(SessionFactory), PoolConfig::default());
/// let session = pool.borrow_object().unwrap();
/// assert_eq!(pool.num_active(), 1);
/// pool.return_object(&session).unwrap();
/// assert_eq!(pool.num_idle(), 1);
/// ```
pub struct ObjectPool<T: Send + Sync + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ObjectPool<T> {
    /// Create a new pool around `factory`. The maintenance loop starts
    /// immediately when the configuration enables it.
    pub fn new(factory: Arc<dyn PooledObjectFactory<T>>, config: PoolConfig) -> Self {
        Self::build(factory, config, None)
    }

    /// Create a new pool with the default configuration.
    pub fn with_default_config(factory: Arc<dyn PooledObjectFactory<T>>) -> Self {
        Self::build(factory, PoolConfig::default(), None)
    }

    /// Create a new pool that also reclaims abandoned objects.
    pub fn with_abandoned_config(
        factory: Arc<dyn PooledObjectFactory<T>>,
        config: PoolConfig,
        abandoned: AbandonedConfig,
    ) -> Self {
        Self::build(factory, config, Some(abandoned))
    }

    fn build(
        factory: Arc<dyn PooledObjectFactory<T>>,
        config: PoolConfig,
        abandoned: Option<AbandonedConfig>,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            abandoned,
            factory,
            idle: BlockingDeque::new(IDLE_CAPACITY),
            all: DashMap::new(),
            create_count: AtomicIsize::new(0),
            destroyed_count: AtomicUsize::new(0),
            destroyed_by_evictor_count: AtomicUsize::new(0),
            destroyed_by_borrow_validation_count: AtomicUsize::new(0),
            closed: Mutex::new(false),
            eviction: Mutex::new(EvictionState {
                cursor: None,
                evictor: None,
            }),
        });
        PoolInner::start_evictor(&inner);
        Self { inner }
    }

    /// Obtain a payload, waiting up to the configured `max_wait` when the
    /// pool is exhausted and blocking is enabled.
    ///
    /// The payload has been newly created or activated, and validated when
    /// the configuration requires it. By contract the caller hands it back
    /// through [`return_object`](ObjectPool::return_object) or
    /// [`invalidate_object`](ObjectPool::invalidate_object).
    pub fn borrow_object(&self) -> PoolResult<Arc<T>> {
        self.inner.borrow(
            self.inner.config.max_wait,
            self.inner.config.block_when_exhausted,
        )
    }

    /// Obtain a payload, overriding the configured borrow wait. `None`
    /// waits indefinitely.
    pub fn borrow_object_timeout(&self, max_wait: Option<Duration>) -> PoolResult<Arc<T>> {
        self.inner
            .borrow(max_wait, self.inner.config.block_when_exhausted)
    }

    /// Obtain a payload without blocking the executor, polling the pool
    /// until an object frees up or the configured `max_wait` elapses.
    pub async fn borrow_object_async(&self) -> PoolResult<Arc<T>> {
        let attempt = async {
            loop {
                match self.inner.borrow(None, false) {
                    Err(PoolError::Exhausted) => {
                        tokio::time::sleep(ASYNC_RETRY_INTERVAL).await;
                    }
                    outcome => return outcome,
                }
            }
        };
        match self.inner.config.max_wait {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PoolError::BorrowTimeout),
            },
            None => attempt.await,
        }
    }

    /// Surrender a borrowed payload back to the pool.
    pub fn return_object(&self, payload: &Arc<T>) -> PoolResult<()> {
        self.inner.return_object(payload)
    }

    /// Destroy a borrowed payload that turned out to be unusable. The pool
    /// tops the idle set back up for any waiting borrower.
    pub fn invalidate_object(&self, payload: &Arc<T>) -> PoolResult<()> {
        self.inner.invalidate_object(payload)
    }

    /// Create, passivate, and add one idle object. Useful for pre-loading.
    pub fn add_object(&self) -> PoolResult<()> {
        self.inner.add_object()
    }

    /// Pre-load the pool with up to `count` idle objects.
    pub fn prefill(&self, count: usize) {
        for _ in 0..count {
            if self.add_object().is_err() {
                break;
            }
        }
    }

    /// Top the idle set up to the configured idle floor.
    pub fn prepare_pool(&self) {
        self.inner.prepare_pool();
    }

    /// Destroy every idle object. Lent objects are unaffected.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Close the pool: stop maintenance, destroy idle objects, and unblock
    /// every waiting borrower. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](ObjectPool::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Restart the maintenance loop with the configured period. Stops the
    /// previous loop first.
    pub fn start_evictor(&self) {
        PoolInner::start_evictor(&self.inner);
    }

    /// Number of objects currently idle.
    pub fn num_idle(&self) -> usize {
        self.inner.num_idle()
    }

    /// Number of objects currently lent out. Best-effort snapshot.
    pub fn num_active(&self) -> usize {
        self.inner.num_active()
    }

    /// Total objects destroyed over the pool's lifetime.
    pub fn destroyed_count(&self) -> usize {
        self.inner.destroyed_count.load(Ordering::Relaxed)
    }

    /// Objects destroyed by the eviction sweep.
    pub fn destroyed_by_evictor_count(&self) -> usize {
        self.inner.destroyed_by_evictor_count.load(Ordering::Relaxed)
    }

    /// Objects destroyed because borrow-time validation failed.
    pub fn destroyed_by_borrow_validation_count(&self) -> usize {
        self.inner
            .destroyed_by_borrow_validation_count
            .load(Ordering::Relaxed)
    }
}

impl<T: Send + Sync + 'static> PoolInner<T> {
    fn key_of(payload: &Arc<T>) -> usize {
        Arc::as_ptr(payload) as usize
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn num_idle(&self) -> usize {
        self.idle.len()
    }

    // The map and the deque are not mutated under a common lock, so this is
    // a best-effort snapshot.
    fn num_active(&self) -> usize {
        self.all.len().saturating_sub(self.idle.len())
    }

    fn borrow(&self, max_wait: Option<Duration>, block: bool) -> PoolResult<Arc<T>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        if let Some(abandoned) = &self.abandoned {
            if abandoned.remove_abandoned_on_borrow
                && self.num_idle() < 2
                && self.near_exhaustion()
            {
                self.remove_abandoned(abandoned);
            }
        }

        let wait_start = Instant::now();
        loop {
            let mut created = false;
            let mut candidate = self.idle.poll_front();
            if candidate.is_none() {
                if let Some(fresh) = self.create() {
                    created = true;
                    candidate = Some(fresh);
                }
            }
            let item = match candidate {
                Some(item) => item,
                None if block => {
                    let waited = match max_wait {
                        None => self.idle.take_front(),
                        Some(limit) => self.idle.poll_front_timeout(limit),
                    };
                    waited.ok_or(PoolError::BorrowTimeout)?
                }
                None => return Err(PoolError::Exhausted),
            };

            if !item.allocate() {
                // Lost the race to another borrower or an eviction test.
                continue;
            }

            if let Err(err) = self.factory.activate_object(item.payload()) {
                warn!(error = %err, "activation failed, destroying object");
                self.destroy(&item);
                if created {
                    return Err(PoolError::ActivationFailed);
                }
                continue;
            }

            if self.config.test_on_borrow || (created && self.config.test_on_create) {
                if !self.factory.validate_object(item.payload()) {
                    self.destroy(&item);
                    self.destroyed_by_borrow_validation_count
                        .fetch_add(1, Ordering::Relaxed);
                    if created {
                        return Err(PoolError::ValidationFailed);
                    }
                    continue;
                }
            }

            self.update_stats_borrow(&item, wait_start.elapsed());
            return Ok(Arc::clone(item.payload()));
        }
    }

    fn return_object(&self, payload: &Arc<T>) -> PoolResult<()> {
        let item = match self.all.get(&Self::key_of(payload)) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                if self.abandoned.is_some() {
                    // The object was reaped as abandoned while it was out.
                    return Ok(());
                }
                return Err(PoolError::NotPartOfPool);
            }
        };

        if !item.mark_returning() {
            return Err(PoolError::AlreadyReturned);
        }
        let active_time = item.active_time();

        if self.config.test_on_return && !self.factory.validate_object(item.payload()) {
            debug!("return validation failed, destroying object");
            self.destroy(&item);
            self.ensure_idle(1, false);
            self.update_stats_return(active_time);
            return Ok(());
        }

        if let Err(err) = self.factory.passivate_object(item.payload()) {
            warn!(error = %err, "passivation failed, destroying object");
            self.destroy(&item);
            self.ensure_idle(1, false);
            self.update_stats_return(active_time);
            return Ok(());
        }

        if !item.deallocate() {
            return Err(PoolError::AlreadyReturned);
        }

        let over_max_idle = self
            .config
            .max_idle
            .is_some_and(|max| self.idle.len() >= max);
        if self.is_closed() || over_max_idle {
            self.destroy(&item);
        } else {
            if self.config.lifo {
                self.idle.push_front(Arc::clone(&item));
            } else {
                self.idle.push_back(Arc::clone(&item));
            }
            if self.is_closed() {
                // Closed while the object was being re-queued; do not leak it.
                self.clear();
            }
        }
        self.update_stats_return(active_time);
        Ok(())
    }

    fn invalidate_object(&self, payload: &Arc<T>) -> PoolResult<()> {
        let item = match self.all.get(&Self::key_of(payload)) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                if self.abandoned.is_some() {
                    return Ok(());
                }
                return Err(PoolError::NotPartOfPool);
            }
        };
        self.destroy(&item);
        self.ensure_idle(1, false);
        Ok(())
    }

    fn add_object(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if let Some(item) = self.create() {
            if let Err(err) = self.factory.passivate_object(item.payload()) {
                warn!(error = %err, "passivation failed while adding idle object");
            }
            if self.config.lifo {
                self.idle.push_front(item);
            } else {
                self.idle.push_back(item);
            }
        }
        Ok(())
    }

    /// Creates a new item within the `max_total` budget, or `None` when the
    /// budget is spent or the factory refuses.
    fn create(&self) -> Option<Arc<PooledItem<T>>> {
        let new_count = self.create_count.fetch_add(1, Ordering::SeqCst) + 1;
        let over_budget = self
            .config
            .max_total
            .is_some_and(|max| new_count > max as isize);
        if over_budget || new_count >= isize::MAX {
            self.create_count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }

        match self.factory.make_object() {
            Ok(payload) => {
                let item = Arc::new(PooledItem::new(Arc::new(payload)));
                self.all.insert(item.key(), Arc::clone(&item));
                Some(item)
            }
            Err(err) => {
                self.create_count.fetch_sub(1, Ordering::SeqCst);
                warn!(error = %err, "factory failed to make object");
                None
            }
        }
    }

    /// Destroys an item: terminal state transition, removal from the idle
    /// deque and the all-items map, then the factory teardown. The map
    /// removals come first so no concurrent borrow can rediscover a
    /// half-destroyed object. Idempotent; only the first invalidation runs
    /// the teardown.
    fn destroy(&self, item: &Arc<PooledItem<T>>) {
        if !item.invalidate() {
            return;
        }
        self.idle.remove_first_occurrence(item);
        self.all.remove(&item.key());
        self.factory.destroy_object(item.payload());
        self.destroyed_count.fetch_add(1, Ordering::Relaxed);
        self.create_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        while let Some(item) = self.idle.poll_front() {
            self.destroy(&item);
        }
    }

    fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        // Stop the maintenance loop before the closed flag flips so a final
        // sweep cannot race the teardown.
        {
            let mut eviction = self.eviction.lock();
            eviction.evictor = None;
            eviction.cursor = None;
        }
        *closed = true;
        drop(closed);

        self.clear();
        self.idle.interrupt_take_waiters();
    }

    fn near_exhaustion(&self) -> bool {
        match self.config.max_total {
            Some(max) => self.num_active() as i64 > max as i64 - 3,
            None => true,
        }
    }

    /// Refill the idle set up to `count` objects. Unless `always`, only
    /// refills while a borrower is actually waiting.
    fn ensure_idle(&self, count: usize, always: bool) {
        if count < 1 || self.is_closed() || (!always && !self.idle.has_take_waiters()) {
            return;
        }
        while self.idle.len() < count {
            let Some(item) = self.create() else {
                // Another create attempt is no more likely to succeed.
                break;
            };
            if self.config.lifo {
                self.idle.push_front(item);
            } else {
                self.idle.push_back(item);
            }
        }
        if self.is_closed() {
            // Closed while refilling; destroy rather than leak idle objects.
            self.clear();
        }
    }

    fn ensure_min_idle(&self) {
        self.ensure_idle(self.effective_min_idle(), true);
    }

    fn prepare_pool(&self) {
        if self.effective_min_idle() < 1 {
            return;
        }
        self.ensure_min_idle();
    }

    /// The idle floor, clamped by `max_idle`.
    fn effective_min_idle(&self) -> usize {
        match self.config.max_idle {
            Some(max) if max < self.config.min_idle => max,
            _ => self.config.min_idle,
        }
    }

    /// Idle objects to examine in one sweep.
    fn num_tests(&self) -> usize {
        let per_run = self.config.num_tests_per_eviction_run;
        let idle = self.idle.len();
        if per_run >= 0 {
            (per_run as usize).min(idle)
        } else {
            idle.div_ceil(per_run.unsigned_abs() as usize)
        }
    }

    fn eviction_snapshot(&self) -> std::vec::IntoIter<Arc<PooledItem<T>>> {
        // LIFO keeps fresh items at the head, so the sweep walks from the
        // tail to probe the stalest objects first.
        self.idle.snapshot(self.config.lifo).into_iter()
    }

    /// One maintenance pass: the eviction sweep, then the abandoned reap
    /// when it is configured. The reap runs even when the sweep bails out.
    fn evict(&self) {
        self.evict_sweep();
        if let Some(abandoned) = &self.abandoned {
            if abandoned.remove_abandoned_on_maintenance {
                self.remove_abandoned(abandoned);
            }
        }
    }

    /// Examine up to `num_tests` idle objects, destroy the ones the policy
    /// rejects, and optionally exercise the survivors.
    fn evict_sweep(&self) {
        if self.idle.is_empty() {
            return;
        }
        let policy = eviction_policy(&self.config.eviction_policy_name);
        let eviction_config = EvictionConfig {
            idle_evict_time: self.config.min_evictable_idle_time,
            idle_soft_evict_time: self.config.soft_min_evictable_idle_time,
            min_idle: self.config.min_idle,
        };
        let test_while_idle = self.config.test_while_idle;

        let mut eviction = self.eviction.lock();
        let num_tests = self.num_tests();
        let mut tested = 0;
        while tested < num_tests {
            if eviction.cursor.as_ref().is_none_or(|c| c.len() == 0) {
                eviction.cursor = Some(self.eviction_snapshot());
            }
            let Some(under_test) = eviction.cursor.as_mut().and_then(Iterator::next) else {
                // Idle set drained mid-sweep; nothing left to examine.
                return;
            };
            if !self.idle.contains(&under_test) {
                // Borrowed since the snapshot was taken. The snapshot is
                // stale; rebuild it and do not count the probe.
                eviction.cursor = None;
                continue;
            }
            if !under_test.start_eviction_test() {
                // Borrowed between the queue check and the state claim;
                // do not count the probe.
                continue;
            }
            tested += 1;

            if policy.evict(&eviction_config, under_test.idle_time(), self.idle.len()) {
                debug!("evicting idle object");
                self.destroy(&under_test);
                self.destroyed_by_evictor_count.fetch_add(1, Ordering::Relaxed);
            } else {
                if test_while_idle && !self.exercise_idle(&under_test) {
                    self.destroy(&under_test);
                    self.destroyed_by_evictor_count.fetch_add(1, Ordering::Relaxed);
                }
                PooledItem::end_eviction_test(&under_test, &self.idle);
            }
        }
    }

    /// Activate, validate, and passivate an idle object under eviction
    /// test. False means the object failed and must be destroyed.
    fn exercise_idle(&self, item: &Arc<PooledItem<T>>) -> bool {
        if let Err(err) = self.factory.activate_object(item.payload()) {
            warn!(error = %err, "idle activation failed");
            return false;
        }
        if !self.factory.validate_object(item.payload()) {
            return false;
        }
        if let Err(err) = self.factory.passivate_object(item.payload()) {
            warn!(error = %err, "idle passivation failed");
            return false;
        }
        true
    }

    /// Mark-then-reap scan over every item in the pool: lent objects unused
    /// past the abandonment timeout are marked under their own lock, then
    /// invalidated outside it.
    fn remove_abandoned(&self, config: &AbandonedConfig) {
        let cutoff = now_millis().saturating_sub(config.remove_abandoned_timeout.as_millis() as u64);
        let mut reaped = Vec::new();
        for entry in self.all.iter() {
            let item = entry.value();
            if item.try_mark_abandoned(cutoff) {
                reaped.push(Arc::clone(item));
            }
        }
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaping abandoned objects");
        }
        for item in reaped {
            self.destroy(&item);
            self.ensure_idle(1, false);
        }
    }

    /// (Re)start the maintenance thread with the configured period. A
    /// `None` or zero period stops maintenance entirely.
    fn start_evictor(self: &Arc<Self>) {
        let period = self
            .config
            .time_between_eviction_runs
            .filter(|period| !period.is_zero());

        let mut eviction = self.eviction.lock();
        // Dropping the old handle disconnects its stop channel and ends
        // that thread's loop.
        eviction.evictor = None;
        eviction.cursor = None;

        let Some(period) = period else {
            return;
        };
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let weak: Weak<PoolInner<T>> = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("lendpool-evictor".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(pool) = weak.upgrade() else {
                            break;
                        };
                        pool.evict();
                        pool.ensure_min_idle();
                    }
                    _ => break,
                }
            });
        match spawned {
            Ok(_handle) => {
                eviction.evictor = Some(Evictor { _stop: stop_tx });
            }
            Err(err) => {
                warn!(error = %err, "failed to spawn evictor thread");
            }
        }
    }

    /// Borrow-path statistics hook; wait-time accounting attaches here.
    fn update_stats_borrow(&self, _item: &Arc<PooledItem<T>>, _wait_time: Duration) {}

    /// Return-path statistics hook; active-time accounting attaches here.
    fn update_stats_return(&self, _active_time: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::BoxError;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    #[derive(Default)]
    struct TestFactory {
        made: AtomicUsize,
        destroyed: AtomicUsize,
        activated: AtomicUsize,
        passivated: AtomicUsize,
        fail_make: AtomicBool,
        fail_activate: AtomicBool,
        fail_passivate: AtomicBool,
        validate_broken: AtomicBool,
        validate_script: Mutex<VecDeque<bool>>,
    }

    impl TestFactory {
        fn script_validation(&self, outcomes: &[bool]) {
            self.validate_script.lock().extend(outcomes.iter().copied());
        }

        fn live_objects(&self) -> usize {
            self.made.load(Ordering::SeqCst) - self.destroyed.load(Ordering::SeqCst)
        }
    }

    impl PooledObjectFactory<usize> for TestFactory {
        fn make_object(&self) -> Result<usize, BoxError> {
            if self.fail_make.load(Ordering::SeqCst) {
                return Err("make refused".into());
            }
            Ok(self.made.fetch_add(1, Ordering::SeqCst))
        }

        fn activate_object(&self, _obj: &usize) -> Result<(), BoxError> {
            if self.fail_activate.load(Ordering::SeqCst) {
                return Err("activate refused".into());
            }
            self.activated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn validate_object(&self, _obj: &usize) -> bool {
            if let Some(next) = self.validate_script.lock().pop_front() {
                return next;
            }
            !self.validate_broken.load(Ordering::SeqCst)
        }

        fn passivate_object(&self, _obj: &usize) -> Result<(), BoxError> {
            if self.fail_passivate.load(Ordering::SeqCst) {
                return Err("passivate refused".into());
            }
            self.passivated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy_object(&self, _obj: &usize) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool_with(config: PoolConfig) -> (ObjectPool<usize>, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let pool = ObjectPool::new(Arc::clone(&factory) as Arc<dyn PooledObjectFactory<usize>>, config);
        (pool, factory)
    }

    #[test]
    fn borrow_and_return_round_trip() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.borrow_object().unwrap());
        }
        assert_eq!(pool.num_active(), 3);
        assert_eq!(pool.num_idle(), 0);

        for payload in &held {
            pool.return_object(payload).unwrap();
        }
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 3);
        assert_eq!(factory.made.load(Ordering::SeqCst), 3);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blocked_borrow_receives_returned_object() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_max_total(2));

        let a = pool.borrow_object().unwrap();
        let _b = pool.borrow_object().unwrap();
        assert_eq!(pool.num_active(), 2);

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow_object().unwrap())
        };
        // Give the third borrower time to block on the empty idle deque.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.num_active(), 2);

        pool.return_object(&a).unwrap();
        let got = waiter.join().unwrap();
        assert!(Arc::ptr_eq(&got, &a));
        assert_eq!(pool.num_active(), 2);
        assert_eq!(pool.num_idle(), 0);
    }

    #[test]
    fn borrow_times_out_when_exhausted() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_max_total(2)
                .with_max_wait(Duration::from_millis(50)),
        );

        let _a = pool.borrow_object().unwrap();
        let _b = pool.borrow_object().unwrap();

        let start = Instant::now();
        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::BorrowTimeout);
        assert!(err.is_no_such_element());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn borrow_timeout_override_beats_config() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_max_total(1));
        let _a = pool.borrow_object().unwrap();
        let err = pool
            .borrow_object_timeout(Some(Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err, PoolError::BorrowTimeout);
    }

    #[test]
    fn non_blocking_borrow_fails_fast() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_max_total(1)
                .with_block_when_exhausted(false),
        );

        let _a = pool.borrow_object().unwrap();
        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::Exhausted);
    }

    #[test]
    fn waiting_borrowers_are_served_fifo() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_max_total(1));
        let first = pool.borrow_object().unwrap();

        let (tx, rx) = mpsc::channel();
        let mut waiters = Vec::new();
        for id in 0..2u32 {
            let pool = pool.clone();
            let tx = tx.clone();
            waiters.push(thread::spawn(move || {
                let payload = pool.borrow_object().unwrap();
                tx.send(id).unwrap();
                thread::sleep(Duration::from_millis(50));
                pool.return_object(&payload).unwrap();
            }));
            // Stagger registration so arrival order is deterministic.
            thread::sleep(Duration::from_millis(80));
        }

        pool.return_object(&first).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn return_rejects_unknown_and_double_returns() {
        let (pool, _factory) = pool_with(PoolConfig::default());

        let stranger = Arc::new(99usize);
        assert_eq!(
            pool.return_object(&stranger).unwrap_err(),
            PoolError::NotPartOfPool
        );

        let payload = pool.borrow_object().unwrap();
        pool.return_object(&payload).unwrap();
        assert_eq!(
            pool.return_object(&payload).unwrap_err(),
            PoolError::AlreadyReturned
        );
    }

    #[test]
    fn lifo_returns_most_recent_first() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_lifo(true));
        let a = pool.borrow_object().unwrap();
        let b = pool.borrow_object().unwrap();
        pool.return_object(&a).unwrap();
        pool.return_object(&b).unwrap();

        let next = pool.borrow_object().unwrap();
        assert!(Arc::ptr_eq(&next, &b));
    }

    #[test]
    fn fifo_returns_oldest_first() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_lifo(false));
        let a = pool.borrow_object().unwrap();
        let b = pool.borrow_object().unwrap();
        pool.return_object(&a).unwrap();
        pool.return_object(&b).unwrap();

        let next = pool.borrow_object().unwrap();
        assert!(Arc::ptr_eq(&next, &a));
    }

    #[test]
    fn returns_beyond_max_idle_destroy() {
        let (pool, factory) = pool_with(PoolConfig::new().with_max_total(2).with_max_idle(1));
        let a = pool.borrow_object().unwrap();
        let b = pool.borrow_object().unwrap();
        pool.return_object(&a).unwrap();
        pool.return_object(&b).unwrap();

        assert_eq!(pool.num_idle(), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.destroyed_count(), 1);
    }

    #[test]
    fn flaky_borrow_validation_destroys_then_succeeds() {
        let (pool, factory) = pool_with(
            PoolConfig::new()
                .with_max_total(3)
                .with_test_on_borrow(true)
                .with_test_on_create(true),
        );
        pool.prefill(2);
        factory.script_validation(&[false, false]);

        let payload = pool.borrow_object().unwrap();
        assert_eq!(pool.destroyed_by_borrow_validation_count(), 2);
        assert_eq!(factory.made.load(Ordering::SeqCst), 3);
        assert_eq!(factory.live_objects(), 1);
        assert_eq!(pool.num_active(), 1);
        pool.return_object(&payload).unwrap();
    }

    #[test]
    fn fresh_create_validation_failure_is_terminal() {
        let (pool, factory) = pool_with(PoolConfig::new().with_test_on_create(true));
        factory.script_validation(&[false]);

        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::ValidationFailed);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(factory.live_objects(), 0);
    }

    #[test]
    fn fresh_create_activation_failure_is_terminal() {
        let (pool, factory) = pool_with(PoolConfig::default());
        factory.fail_activate.store(true, Ordering::SeqCst);

        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::ActivationFailed);
        assert_eq!(factory.live_objects(), 0);
    }

    #[test]
    fn idle_activation_failure_destroys_and_loops() {
        let (pool, factory) = pool_with(PoolConfig::default());
        let a = pool.borrow_object().unwrap();
        pool.return_object(&a).unwrap();

        // The idle object fails activation and is destroyed; the borrow
        // loops and serves a fresh one instead.
        factory.fail_activate.store(true, Ordering::SeqCst);
        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::ActivationFailed);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);

        factory.fail_activate.store(false, Ordering::SeqCst);
        let b = pool.borrow_object().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn return_validation_failure_is_swallowed() {
        let (pool, factory) = pool_with(PoolConfig::new().with_test_on_return(true));
        let payload = pool.borrow_object().unwrap();
        factory.script_validation(&[false]);

        pool.return_object(&payload).unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(factory.live_objects(), 0);
        assert_eq!(pool.destroyed_count(), 1);
    }

    #[test]
    fn passivation_failure_on_return_is_swallowed() {
        let (pool, factory) = pool_with(PoolConfig::default());
        let payload = pool.borrow_object().unwrap();
        factory.fail_passivate.store(true, Ordering::SeqCst);

        pool.return_object(&payload).unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(factory.live_objects(), 0);
    }

    #[test]
    fn invalidate_destroys_borrowed_object() {
        let (pool, factory) = pool_with(PoolConfig::default());
        let payload = pool.borrow_object().unwrap();

        pool.invalidate_object(&payload).unwrap();
        assert_eq!(pool.num_active(), 0);
        assert_eq!(factory.live_objects(), 0);

        let stranger = Arc::new(42usize);
        assert_eq!(
            pool.invalidate_object(&stranger).unwrap_err(),
            PoolError::NotPartOfPool
        );
    }

    #[test]
    fn add_object_passivates_and_queues() {
        let (pool, factory) = pool_with(PoolConfig::default());
        pool.add_object().unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(factory.passivated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prefill_respects_max_total() {
        let (pool, factory) = pool_with(PoolConfig::new().with_max_total(2));
        pool.prefill(5);
        assert_eq!(pool.num_idle(), 2);
        assert_eq!(factory.made.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn prepare_pool_tops_up_to_min_idle() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_min_idle(3));
        pool.prepare_pool();
        assert_eq!(pool.num_idle(), 3);
    }

    #[test]
    fn failed_creation_releases_budget() {
        let (pool, factory) = pool_with(
            PoolConfig::new()
                .with_max_total(1)
                .with_block_when_exhausted(false),
        );
        factory.fail_make.store(true, Ordering::SeqCst);
        assert_eq!(pool.borrow_object().unwrap_err(), PoolError::Exhausted);

        factory.fail_make.store(false, Ordering::SeqCst);
        let payload = pool.borrow_object().unwrap();
        pool.return_object(&payload).unwrap();
    }

    #[test]
    fn clear_destroys_only_idle_objects() {
        let (pool, factory) = pool_with(PoolConfig::default());
        let held = pool.borrow_object().unwrap();
        pool.prefill(2);

        pool.clear();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.num_active(), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
        pool.return_object(&held).unwrap();
    }

    #[test]
    fn close_destroys_idle_and_rejects_borrows() {
        let (pool, factory) = pool_with(PoolConfig::default());
        pool.prefill(3);

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(factory.live_objects(), 0);
        assert_eq!(pool.destroyed_count(), 3);

        let err = pool.borrow_object().unwrap_err();
        assert_eq!(err, PoolError::Closed);
        assert!(err.is_illegal_state());

        // Idempotent.
        pool.close();
        assert_eq!(pool.destroyed_count(), 3);
    }

    #[test]
    fn close_interrupts_blocked_borrowers() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_max_total(1));
        let _held = pool.borrow_object().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow_object())
        };
        thread::sleep(Duration::from_millis(100));

        pool.close();
        let outcome = waiter.join().unwrap();
        assert_eq!(outcome.unwrap_err(), PoolError::BorrowTimeout);
    }

    #[test]
    fn returning_to_closed_pool_destroys_object() {
        let (pool, factory) = pool_with(PoolConfig::default());
        let payload = pool.borrow_object().unwrap();
        pool.close();

        pool.return_object(&payload).unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(factory.live_objects(), 0);
    }

    #[test]
    fn evictor_destroys_stale_objects_down_to_min_idle() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_max_total(3)
                .with_min_idle(1)
                .with_min_evictable_idle_time(Duration::from_millis(100))
                .with_time_between_eviction_runs(Duration::from_millis(30))
                .with_num_tests_per_eviction_run(-1),
        );
        pool.prefill(3);
        assert_eq!(pool.num_idle(), 3);

        thread::sleep(Duration::from_millis(250));
        assert_eq!(pool.destroyed_by_evictor_count(), 2);
        assert_eq!(pool.num_idle(), 1);
        pool.close();
    }

    #[test]
    fn evictor_refills_to_min_idle() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_min_idle(2)
                .with_time_between_eviction_runs(Duration::from_millis(20)),
        );
        assert_eq!(pool.num_idle(), 0);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(pool.num_idle(), 2);
        pool.close();
    }

    #[test]
    fn test_while_idle_destroys_broken_objects() {
        let (pool, factory) = pool_with(
            PoolConfig::new()
                .with_test_while_idle(true)
                .with_time_between_eviction_runs(Duration::from_millis(20)),
        );
        pool.prefill(1);
        factory.validate_broken.store(true, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(pool.destroyed_by_evictor_count(), 1);
        assert_eq!(factory.live_objects(), 0);
        pool.close();
    }

    #[test]
    fn evictor_stops_after_close() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_min_idle(1)
                .with_time_between_eviction_runs(Duration::from_millis(20)),
        );
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.num_idle(), 1);

        pool.close();
        thread::sleep(Duration::from_millis(100));
        // No refill happens once the pool is closed.
        assert_eq!(pool.num_idle(), 0);
    }

    #[test]
    fn abandoned_objects_are_reaped_on_borrow() {
        let factory = Arc::new(TestFactory::default());
        let pool = ObjectPool::with_abandoned_config(
            Arc::clone(&factory) as Arc<dyn PooledObjectFactory<usize>>,
            PoolConfig::new().with_max_total(1),
            AbandonedConfig::new()
                .with_remove_on_borrow(true)
                .with_timeout(Duration::from_millis(200)),
        );

        let forgotten = pool.borrow_object().unwrap();
        thread::sleep(Duration::from_millis(300));

        // Near exhaustion with a stale lease: the next borrow reaps it and
        // serves a fresh object within the max_total budget.
        let fresh = pool.borrow_object().unwrap();
        assert!(!Arc::ptr_eq(&forgotten, &fresh));
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);

        // The reaped lease is silently ignored on return.
        pool.return_object(&forgotten).unwrap();
        assert_eq!(pool.num_idle(), 0);
        pool.return_object(&fresh).unwrap();
    }

    #[test]
    fn abandoned_objects_are_reaped_by_maintenance() {
        let factory = Arc::new(TestFactory::default());
        let pool = ObjectPool::with_abandoned_config(
            Arc::clone(&factory) as Arc<dyn PooledObjectFactory<usize>>,
            PoolConfig::new().with_time_between_eviction_runs(Duration::from_millis(30)),
            AbandonedConfig::new()
                .with_remove_on_maintenance(true)
                .with_timeout(Duration::from_millis(100)),
        );

        let _forgotten = pool.borrow_object().unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.num_active(), 0);
        pool.close();
    }

    #[test]
    fn concurrent_borrowers_never_exceed_max_total() {
        let (pool, factory) = pool_with(PoolConfig::new().with_max_total(4));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..25 {
                    let payload = pool.borrow_object().unwrap();
                    thread::sleep(Duration::from_micros(200));
                    pool.return_object(&payload).unwrap();
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(pool.num_active(), 0);
        assert!(pool.num_idle() <= 4);
        assert!(factory.made.load(Ordering::SeqCst) <= 4);
        assert_eq!(factory.live_objects(), pool.num_idle());
    }

    #[tokio::test]
    async fn async_borrow_round_trips() {
        let (pool, _factory) = pool_with(PoolConfig::default());
        let payload = pool.borrow_object_async().await.unwrap();
        assert_eq!(pool.num_active(), 1);
        pool.return_object(&payload).unwrap();
        assert_eq!(pool.num_idle(), 1);
    }

    #[tokio::test]
    async fn async_borrow_times_out_when_exhausted() {
        let (pool, _factory) = pool_with(
            PoolConfig::new()
                .with_max_total(1)
                .with_max_wait(Duration::from_millis(50)),
        );
        let _held = pool.borrow_object().unwrap();

        let err = pool.borrow_object_async().await.unwrap_err();
        assert_eq!(err, PoolError::BorrowTimeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_borrow_waits_for_return() {
        let (pool, _factory) = pool_with(PoolConfig::new().with_max_total(1));
        let held = pool.borrow_object().unwrap();

        let returner = {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            tokio::task::spawn_blocking(move || {
                thread::sleep(Duration::from_millis(50));
                pool.return_object(&held).unwrap();
            })
        };

        let payload = pool.borrow_object_async().await.unwrap();
        assert!(Arc::ptr_eq(&payload, &held));
        returner.await.unwrap();
        pool.return_object(&payload).unwrap();
    }
}
