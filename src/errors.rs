//! Error types for the object pool

use thiserror::Error;

/// Errors surfaced by pool operations.
///
/// Variants fall into two kinds: illegal-state errors (API misuse or an
/// operation against a closed pool) and no-such-element errors (a borrow
/// that could not produce an object).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool not open")]
    Closed,

    #[error("Returned object not currently part of this pool")]
    NotPartOfPool,

    #[error("Object has already been returned to this pool or is invalid")]
    AlreadyReturned,

    #[error("Timeout waiting for idle object")]
    BorrowTimeout,

    #[error("Pool exhausted")]
    Exhausted,

    #[error("Unable to activate object")]
    ActivationFailed,

    #[error("Unable to validate object")]
    ValidationFailed,
}

impl PoolError {
    /// True for misuse of the pool API or operations on a closed pool.
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            PoolError::Closed | PoolError::NotPartOfPool | PoolError::AlreadyReturned
        )
    }

    /// True when a borrow could not yield an object.
    pub fn is_no_such_element(&self) -> bool {
        !self.is_illegal_state()
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
