//! Eviction policies for automatic object removal

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;

/// Name the default policy is registered under.
pub const DEFAULT_EVICTION_POLICY_NAME: &str = "default";

/// Thresholds handed to an eviction policy for each candidate.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Hard idle age past which a candidate should be evicted.
    pub idle_evict_time: Option<Duration>,
    /// Softer idle age applied to candidates surplus to the idle floor.
    pub idle_soft_evict_time: Option<Duration>,
    /// Idle floor the pool maintains.
    pub min_idle: usize,
}

/// Decides whether idle objects examined by the maintenance sweep should be
/// destroyed.
///
/// # Examples
///
/// ```
/// use lendpool::{register_eviction_policy, EvictionConfig, EvictionPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct EvictEverything;
///
/// impl EvictionPolicy for EvictEverything {
///     fn evict(&self, _config: &EvictionConfig, _idle_time: Duration, _idle_count: usize) -> bool {
///         true
///     }
/// }
///
/// register_eviction_policy("aggressive", Arc::new(EvictEverything));
/// ```
pub trait EvictionPolicy: Send + Sync {
    /// Returns true when the candidate, idle for `idle_time` with
    /// `idle_count` objects currently idle, should be destroyed.
    fn evict(&self, config: &EvictionConfig, idle_time: Duration, idle_count: usize) -> bool;
}

/// Evicts objects idle past the hard or soft threshold, but never shrinks
/// the idle set below the configured floor.
#[derive(Debug, Default)]
pub struct DefaultEvictionPolicy;

impl EvictionPolicy for DefaultEvictionPolicy {
    fn evict(&self, config: &EvictionConfig, idle_time: Duration, idle_count: usize) -> bool {
        if idle_count <= config.min_idle {
            return false;
        }
        let past = |threshold: Option<Duration>| threshold.is_some_and(|t| idle_time > t);
        past(config.idle_evict_time) || past(config.idle_soft_evict_time)
    }
}

type Registry = RwLock<HashMap<String, Arc<dyn EvictionPolicy>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut policies: HashMap<String, Arc<dyn EvictionPolicy>> = HashMap::new();
        policies.insert(
            DEFAULT_EVICTION_POLICY_NAME.to_string(),
            Arc::new(DefaultEvictionPolicy),
        );
        RwLock::new(policies)
    })
}

/// Registers `policy` under `name`, replacing any previous registration.
pub fn register_eviction_policy(name: &str, policy: Arc<dyn EvictionPolicy>) {
    registry().write().insert(name.to_string(), policy);
}

/// Looks up a policy by name. Unknown names fall back to the default policy.
pub(crate) fn eviction_policy(name: &str) -> Arc<dyn EvictionPolicy> {
    let policies = registry().read();
    policies
        .get(name)
        .or_else(|| policies.get(DEFAULT_EVICTION_POLICY_NAME))
        .cloned()
        .unwrap_or_else(|| Arc::new(DefaultEvictionPolicy))
}
