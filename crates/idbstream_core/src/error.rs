//! Error types for idbstream core.
//!
//! Only connection-level and deletion-level failures reach callers. Once a
//! pipeline holds a resolved store, failures of individual requests are
//! reported as [`OperationFailure`] internally and turn into silent
//! completion at the stream boundary.

use crate::request::RequestState;
use idbstream_engine::EngineError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A database could not be opened or upgraded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The engine rejected the open request.
    #[error("failed to open database {name}: {source}")]
    Open {
        /// Database name.
        name: String,
        /// Engine error.
        source: EngineError,
    },

    /// The version-upgrade open failed.
    #[error("failed to upgrade database {name} to version {version}: {source}")]
    Upgrade {
        /// Database name.
        name: String,
        /// Version the upgrade targeted.
        version: u64,
        /// Engine error.
        source: EngineError,
    },

    /// The database disappeared before it could be upgraded.
    #[error("cannot upgrade database {name}: it does not exist")]
    DatabaseMissing {
        /// Database name.
        name: String,
    },

    /// A store could not be verified or created.
    #[error("object store {store} in {database} is unusable: {source}")]
    Schema {
        /// Database name.
        database: String,
        /// Store name.
        store: String,
        /// Engine error.
        source: EngineError,
    },

    /// The storage engine is not available on this host.
    #[error("cannot open database {name}: storage engine unavailable")]
    Unavailable {
        /// Database name.
        name: String,
    },
}

impl ConnectionError {
    /// Returns the database the error refers to.
    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::Open { name, .. }
            | Self::Upgrade { name, .. }
            | Self::DatabaseMissing { name }
            | Self::Unavailable { name } => name,
            Self::Schema { database, .. } => database,
        }
    }
}

/// A database could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeletionError {
    /// The database does not exist.
    #[error("database {name} does not exist")]
    NotFound {
        /// Database name.
        name: String,
    },

    /// Open connections prevented the deletion.
    #[error("deletion of database {name} is blocked by {open} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Connections that stayed open.
        open: usize,
    },

    /// The storage engine is not available on this host.
    #[error("cannot delete database {name}: storage engine unavailable")]
    Unavailable {
        /// Database name.
        name: String,
    },

    /// Any other engine failure.
    #[error("failed to delete database {name}: {source}")]
    Engine {
        /// Database name.
        name: String,
        /// Engine error.
        source: EngineError,
    },
}

impl DeletionError {
    pub(crate) fn from_engine(name: &str, source: EngineError) -> Self {
        match source {
            EngineError::Blocked { open, .. } => Self::Blocked {
                name: name.to_string(),
                open,
            },
            EngineError::Unavailable => Self::Unavailable {
                name: name.to_string(),
            },
            source => Self::Engine {
                name: name.to_string(),
                source,
            },
        }
    }
}

/// Names the request an [`OperationFailure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read every key.
    GetAllKeys,
    /// Read every value.
    GetAll,
    /// Read keys and values from one snapshot.
    GetAllEntries,
    /// Read one value.
    Get,
    /// Remove one value.
    Delete,
    /// Insert or replace a value.
    Put,
    /// Insert a value under a generated key.
    Add,
    /// Remove every value.
    Clear,
}

impl OperationKind {
    /// Returns true for requests that write.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Delete | Self::Put | Self::Add | Self::Clear)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetAllKeys => "getAllKeys",
            Self::GetAll => "getAll",
            Self::GetAllEntries => "getAllEntries",
            Self::Get => "get",
            Self::Delete => "delete",
            Self::Put => "put",
            Self::Add => "add",
            Self::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The engine reported an error.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// No connection could be leased for the request.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The request state machine was driven out of order.
    #[error(transparent)]
    State(#[from] RequestStateError),

    /// The value could not be converted for storage.
    #[error("value could not be encoded: {0}")]
    Encode(String),

    /// A stored value could not be converted into the requested type.
    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

/// A single store operation failed after its store was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on {database}/{store} failed: {reason}")]
pub struct OperationFailure {
    /// Database name.
    pub database: String,
    /// Store name.
    pub store: String,
    /// The failed request.
    pub operation: OperationKind,
    /// The underlying cause.
    #[source]
    pub reason: FailureReason,
}

/// A request state machine was asked to make an illegal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid request state transition from {from:?} to {to:?}")]
pub struct RequestStateError {
    /// Current state.
    pub from: RequestState,
    /// Attempted target state.
    pub to: RequestState,
}

/// Any error produced by idbstream core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Connection-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Deletion failure.
    #[error(transparent)]
    Deletion(#[from] DeletionError),

    /// Operation failure.
    #[error(transparent)]
    Operation(#[from] OperationFailure),

    /// Request state machine misuse.
    #[error(transparent)]
    RequestState(#[from] RequestStateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_engine_error_maps_to_blocked_deletion() {
        let error = DeletionError::from_engine(
            "db",
            EngineError::Blocked {
                name: "db".into(),
                open: 2,
            },
        );
        assert_eq!(
            error,
            DeletionError::Blocked {
                name: "db".into(),
                open: 2
            }
        );
    }

    #[test]
    fn operation_failure_display_names_the_request() {
        let failure = OperationFailure {
            database: "db".into(),
            store: "s".into(),
            operation: OperationKind::Add,
            reason: EngineError::data("no key generator").into(),
        };
        assert_eq!(
            failure.to_string(),
            "add on db/s failed: data error: no key generator"
        );
    }

    #[test]
    fn connection_error_reports_database() {
        let error = ConnectionError::DatabaseMissing { name: "db".into() };
        assert_eq!(error.database(), "db");
        let core: CoreError = error.into();
        assert!(matches!(core, CoreError::Connection(_)));
    }
}
