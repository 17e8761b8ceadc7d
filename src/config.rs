//! Pool configuration options

use std::time::Duration;

use crate::eviction::DEFAULT_EVICTION_POLICY_NAME;

/// Configuration for object pool behavior
///
/// # Examples
///
/// ```
/// use lendpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_total(100)
///     .with_max_idle(20)
///     .with_max_wait(Duration::from_secs(30));
///
/// assert_eq!(config.max_total, Some(100));
/// assert_eq!(config.max_idle, Some(20));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on the total number of objects alive at once (idle + lent +
    /// in-flight create). `None` is unbounded.
    pub max_total: Option<usize>,

    /// Cap on the idle set; a return that would exceed it destroys the
    /// object instead. `None` is unbounded.
    pub max_idle: Option<usize>,

    /// Idle floor maintained by the maintenance loop.
    pub min_idle: usize,

    /// Idle insertion discipline: most-recently-returned first when true.
    pub lifo: bool,

    /// Whether a borrow against an exhausted pool waits for a return.
    pub block_when_exhausted: bool,

    /// Default borrow wait. `None` waits indefinitely; `Some(ZERO)` fails
    /// immediately when no object is available.
    pub max_wait: Option<Duration>,

    /// Validate freshly created objects before handing them out.
    pub test_on_create: bool,

    /// Validate objects on every borrow.
    pub test_on_borrow: bool,

    /// Validate objects on return.
    pub test_on_return: bool,

    /// Activate, validate, and passivate idle objects during eviction sweeps.
    pub test_while_idle: bool,

    /// Period of the maintenance loop. `None` disables it.
    pub time_between_eviction_runs: Option<Duration>,

    /// Idle objects examined per sweep. A negative value tests
    /// `ceil(idle / |n|)` objects instead.
    pub num_tests_per_eviction_run: i32,

    /// Idle age past which objects become eviction candidates.
    pub min_evictable_idle_time: Option<Duration>,

    /// Softer idle age applied to objects surplus to the idle floor.
    pub soft_min_evictable_idle_time: Option<Duration>,

    /// Eviction policy to consult during sweeps; unknown names fall back to
    /// the default policy.
    pub eviction_policy_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            lifo: true,
            block_when_exhausted: true,
            max_wait: None,
            test_on_create: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: 3,
            min_evictable_idle_time: Some(Duration::from_secs(60 * 30)),
            soft_min_evictable_idle_time: None,
            eviction_policy_name: DEFAULT_EVICTION_POLICY_NAME.to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total object population.
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = Some(max_total);
        self
    }

    /// Lift the total population cap.
    pub fn with_unbounded_total(mut self) -> Self {
        self.max_total = None;
        self
    }

    /// Cap the idle set.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Set the idle floor maintained by the maintenance loop.
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Choose LIFO (true) or FIFO (false) idle ordering.
    pub fn with_lifo(mut self, lifo: bool) -> Self {
        self.lifo = lifo;
        self
    }

    /// Make borrows wait (true) or fail fast (false) when exhausted.
    pub fn with_block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    /// Bound the default borrow wait.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Validate freshly created objects before first hand-out.
    pub fn with_test_on_create(mut self, test: bool) -> Self {
        self.test_on_create = test;
        self
    }

    /// Validate objects on every borrow.
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Validate objects on return.
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    /// Exercise idle objects during eviction sweeps.
    pub fn with_test_while_idle(mut self, test: bool) -> Self {
        self.test_while_idle = test;
        self
    }

    /// Enable the maintenance loop with the given period.
    pub fn with_time_between_eviction_runs(mut self, period: Duration) -> Self {
        self.time_between_eviction_runs = Some(period);
        self
    }

    /// Set how many idle objects each sweep examines.
    pub fn with_num_tests_per_eviction_run(mut self, num_tests: i32) -> Self {
        self.num_tests_per_eviction_run = num_tests;
        self
    }

    /// Set the hard idle age for eviction.
    pub fn with_min_evictable_idle_time(mut self, idle_time: Duration) -> Self {
        self.min_evictable_idle_time = Some(idle_time);
        self
    }

    /// Set the soft idle age for eviction of surplus objects.
    pub fn with_soft_min_evictable_idle_time(mut self, idle_time: Duration) -> Self {
        self.soft_min_evictable_idle_time = Some(idle_time);
        self
    }

    /// Select the eviction policy by registry name.
    pub fn with_eviction_policy_name(mut self, name: impl Into<String>) -> Self {
        self.eviction_policy_name = name.into();
        self
    }
}

/// Configuration for reclaiming borrowed objects their holder never returned
///
/// # Examples
///
/// ```
/// use lendpool::AbandonedConfig;
/// use std::time::Duration;
///
/// let config = AbandonedConfig::new()
///     .with_remove_on_borrow(true)
///     .with_timeout(Duration::from_secs(60));
///
/// assert!(config.remove_abandoned_on_borrow);
/// ```
#[derive(Debug, Clone)]
pub struct AbandonedConfig {
    /// Reap abandoned objects when a borrow finds the pool near exhaustion.
    pub remove_abandoned_on_borrow: bool,

    /// Reap abandoned objects on every maintenance tick.
    pub remove_abandoned_on_maintenance: bool,

    /// How long since last use before a lent object counts as abandoned.
    pub remove_abandoned_timeout: Duration,
}

impl Default for AbandonedConfig {
    fn default() -> Self {
        Self {
            remove_abandoned_on_borrow: false,
            remove_abandoned_on_maintenance: false,
            remove_abandoned_timeout: Duration::from_secs(300),
        }
    }
}

impl AbandonedConfig {
    /// Create a new abandoned-object configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Reap during near-exhaustion borrows.
    pub fn with_remove_on_borrow(mut self, remove: bool) -> Self {
        self.remove_abandoned_on_borrow = remove;
        self
    }

    /// Reap on every maintenance tick.
    pub fn with_remove_on_maintenance(mut self, remove: bool) -> Self {
        self.remove_abandoned_on_maintenance = remove;
        self
    }

    /// Set the last-use age past which a lent object is abandoned.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.remove_abandoned_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PoolConfig::default();
        assert_eq!(config.max_total, Some(8));
        assert_eq!(config.max_idle, Some(8));
        assert_eq!(config.min_idle, 0);
        assert!(config.lifo);
        assert!(config.block_when_exhausted);
        assert_eq!(config.max_wait, None);
        assert_eq!(config.num_tests_per_eviction_run, 3);
        assert_eq!(config.time_between_eviction_runs, None);
    }

    #[test]
    fn builders_compose() {
        let config = PoolConfig::new()
            .with_max_total(4)
            .with_min_idle(2)
            .with_lifo(false)
            .with_test_on_borrow(true)
            .with_time_between_eviction_runs(Duration::from_millis(50))
            .with_num_tests_per_eviction_run(-2);

        assert_eq!(config.max_total, Some(4));
        assert_eq!(config.min_idle, 2);
        assert!(!config.lifo);
        assert!(config.test_on_borrow);
        assert_eq!(
            config.time_between_eviction_runs,
            Some(Duration::from_millis(50))
        );
        assert_eq!(config.num_tests_per_eviction_run, -2);
    }

    #[test]
    fn unbounded_total_clears_cap() {
        let config = PoolConfig::new().with_max_total(5).with_unbounded_total();
        assert_eq!(config.max_total, None);
    }
}
