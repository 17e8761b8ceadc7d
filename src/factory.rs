//! Factory contract for payload lifecycle callbacks

use std::error::Error;

/// Boxed error type factories may surface from fallible lifecycle callbacks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Collaborator that constructs, wakes, checks, quiesces, and releases the
/// payloads managed by a pool.
///
/// Only [`make_object`](PooledObjectFactory::make_object) is required; the
/// remaining hooks default to no-ops for payloads that need no per-lease
/// preparation.
pub trait PooledObjectFactory<T>: Send + Sync {
    /// Constructs a new payload instance.
    fn make_object(&self) -> Result<T, BoxError>;

    /// Prepares an idle payload for use by a borrower.
    fn activate_object(&self, obj: &T) -> Result<(), BoxError> {
        let _ = obj;
        Ok(())
    }

    /// Liveness check. A `false` result marks the payload for destruction;
    /// this hook must not fail.
    fn validate_object(&self, obj: &T) -> bool {
        let _ = obj;
        true
    }

    /// Quiesces a payload before it re-enters the idle set.
    fn passivate_object(&self, obj: &T) -> Result<(), BoxError> {
        let _ = obj;
        Ok(())
    }

    /// Releases the payload's resources. Failures are the factory's to
    /// swallow; the pool has already forgotten the object when this runs.
    fn destroy_object(&self, obj: &T) {
        let _ = obj;
    }
}
