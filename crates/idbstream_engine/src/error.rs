//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a storage engine.
///
/// The variants mirror the failure classes a browser object-store engine
/// reports through its request error callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The named object store does not exist in the connection's schema.
    #[error("object store not found: {store}")]
    NotFound {
        /// Name of the missing store.
        store: String,
    },

    /// A write violated a store constraint (duplicate key on `add`,
    /// duplicate store name on creation).
    #[error("constraint violated: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// The supplied key or value cannot be used with this store.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The connection or transaction is no longer usable.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state problem.
        message: String,
    },

    /// The requested version is lower than the stored version, or zero.
    #[error("requested version {requested} is invalid (stored version {stored})")]
    Version {
        /// Version the caller asked for.
        requested: u64,
        /// Version currently stored.
        stored: u64,
    },

    /// Other connections stayed open after a version-change notification.
    #[error("database {name} is blocked by {open} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Number of connections that stayed open.
        open: usize,
    },

    /// The transaction was aborted before it could commit.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },

    /// The engine is not available on this host.
    #[error("storage engine unavailable on this host")]
    Unavailable,
}

impl EngineError {
    /// Creates a store-not-found error.
    pub fn not_found(store: impl Into<String>) -> Self {
        Self::NotFound {
            store: store.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a blocked open or deletion.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}
