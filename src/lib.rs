//! # lendpool
//!
//! Thread-safe generic object pool with factory-managed lifecycles.
//!
//! The pool amortizes the cost of expensive-to-construct, reusable
//! resources (database connections, network sessions, worker contexts) by
//! lending validated instances to borrowers and reclaiming them for reuse.
//!
//! ## Features
//!
//! - Bounded total population with blocking, timed, or fail-fast borrows
//! - FIFO service order for waiting borrowers
//! - LIFO or FIFO idle discipline with min/max idle enforcement
//! - Factory hooks for activation, validation, and passivation
//! - Background eviction of stale idle objects with pluggable policies
//! - Reclamation of abandoned (never-returned) objects
//! - Async borrow support with timeout
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lendpool::{BoxError, ObjectPool, PoolConfig, PooledObjectFactory};
//!
//! struct ConnectionFactory;
//!
//! impl PooledObjectFactory<String> for ConnectionFactory {
//!     fn make_object(&self) -> Result<String, BoxError> {
//!         Ok("connection".to_string())
//!     }
//! }
//!
//! let pool = ObjectPool::new(Arc::new(ConnectionFactory), PoolConfig::default());
//! let conn = pool.borrow_object().unwrap();
//! println!("Got: {}", *conn);
//! pool.return_object(&conn).unwrap();
//! ```

mod config;
mod deque;
mod errors;
mod eviction;
mod factory;
mod object;
mod pool;

pub use config::{AbandonedConfig, PoolConfig};
pub use errors::{PoolError, PoolResult};
pub use eviction::{
    register_eviction_policy, DefaultEvictionPolicy, EvictionConfig, EvictionPolicy,
    DEFAULT_EVICTION_POLICY_NAME,
};
pub use factory::{BoxError, PooledObjectFactory};
pub use pool::ObjectPool;
