//! Storage engine contract.

use crate::error::EngineResult;
use crate::key::{Key, Value};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Future returned by every engine request.
pub type EngineFuture<'a, T> = BoxFuture<'a, EngineResult<T>>;

/// Callback run inside the upgrade transaction of an `open` request.
///
/// Schema edits are only legal through the [`SchemaEditor`] handed to this
/// callback. Returning an error aborts the upgrade and the version bump.
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn SchemaEditor) -> EngineResult<()> + Send>;

/// Callback invoked on an open connection when another caller requests a
/// version upgrade or deletion of its database.
pub type VersionChangeHandler = Arc<dyn Fn(&dyn Connection) + Send + Sync>;

/// Identifies one physical connection within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Creation options for an object store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreParameters {
    /// Whether the store generates its own integer keys.
    pub auto_increment: bool,
}

impl StoreParameters {
    /// Parameters for a plain key-value store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auto_increment: false,
        }
    }

    /// Parameters for a store with a key generator.
    #[must_use]
    pub const fn auto_increment() -> Self {
        Self {
            auto_increment: true,
        }
    }
}

/// Name and stored version of a database, as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored schema version.
    pub version: u64,
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// An `open` request.
pub struct OpenRequest {
    /// Database to open (created if absent).
    pub name: String,
    /// Version to open at. `None` opens at the stored version, or 1 for a
    /// new database.
    pub version: Option<u64>,
    /// Runs exactly once if the open changes the stored version.
    pub on_upgrade: Option<UpgradeHandler>,
}

impl OpenRequest {
    /// Creates a request that opens `name` at its stored version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            on_upgrade: None,
        }
    }

    /// Sets the version to open at.
    #[must_use]
    pub fn version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    /// Sets the upgrade callback.
    #[must_use]
    pub fn on_upgrade(
        mut self,
        handler: impl FnOnce(&mut dyn SchemaEditor) -> EngineResult<()> + Send + 'static,
    ) -> Self {
        self.on_upgrade = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("on_upgrade", &self.on_upgrade.is_some())
            .finish()
    }
}

/// A versioned, transactional key-value engine hosting named databases.
///
/// This is the seam between the reactive layer and the host's embedded
/// storage engine. Every request is asynchronous; implementations resume the
/// returned future when the engine reports success or failure.
///
/// # Invariants
///
/// - `open` runs the upgrade callback exactly once when, and only when, the
///   stored version changes
/// - before an upgrade or deletion, every other open connection to the
///   database receives its version-change callbacks; connections still open
///   afterwards make the request fail with [`EngineError::Blocked`]
/// - committed writes are visible to every later transaction
///
/// [`EngineError::Blocked`]: crate::EngineError::Blocked
pub trait Engine: Send + Sync {
    /// Returns false if the engine cannot be used on this host.
    fn is_available(&self) -> bool {
        true
    }

    /// Opens a connection, creating or upgrading the database as needed.
    fn open(&self, request: OpenRequest) -> EngineFuture<'_, Arc<dyn Connection>>;

    /// Deletes a database. Deleting a database that does not exist succeeds.
    fn delete_database(&self, name: &str) -> EngineFuture<'_, ()>;

    /// Lists databases, or `None` if this engine cannot enumerate them.
    fn databases(&self) -> EngineFuture<'_, Option<Vec<DatabaseInfo>>>;
}

/// One open connection to a database.
///
/// The schema (store names and parameters) is fixed for the lifetime of the
/// connection; a schema change requires a new connection at a higher
/// version.
pub trait Connection: Send + Sync {
    /// Engine-unique connection identifier.
    fn id(&self) -> ConnectionId;

    /// Database name.
    fn name(&self) -> &str;

    /// Version this connection was opened at.
    fn version(&self) -> u64;

    /// Names of the object stores in this connection's schema, sorted.
    fn object_store_names(&self) -> Vec<String>;

    /// Creation parameters of a store, if it exists in this schema.
    fn store_parameters(&self, store: &str) -> Option<StoreParameters>;

    /// Returns true if `store` exists in this connection's schema.
    fn contains_store(&self, store: &str) -> bool {
        self.store_parameters(store).is_some()
    }

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self);

    /// Returns true once the connection is closed.
    fn is_closed(&self) -> bool;

    /// Registers a version-change callback.
    fn on_version_change(&self, handler: VersionChangeHandler);

    /// Starts a transaction scoped to `stores`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or a store is not part
    /// of the schema.
    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn Transaction>>;
}

/// A transaction over one or more object stores.
///
/// Requests observe the transaction's own earlier writes. Writes become
/// visible to other transactions only after [`Transaction::commit`]
/// succeeds.
pub trait Transaction: Send {
    /// Reads the value stored under `key`.
    fn get<'a>(&'a mut self, store: &'a str, key: &'a Key) -> EngineFuture<'a, Option<Value>>;

    /// Reads every value in key order.
    fn get_all<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, Vec<Value>>;

    /// Reads every key in order.
    fn get_all_keys<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, Vec<Key>>;

    /// Inserts or replaces a value. `key` may only be omitted on stores with
    /// a key generator. Returns the key written.
    fn put<'a>(&'a mut self, store: &'a str, key: Option<Key>, value: Value)
        -> EngineFuture<'a, Key>;

    /// Inserts a value, failing if the key already exists. `key` may only be
    /// omitted on stores with a key generator. Returns the key written.
    fn add<'a>(&'a mut self, store: &'a str, key: Option<Key>, value: Value)
        -> EngineFuture<'a, Key>;

    /// Removes the value under `key`. Removing a missing key succeeds.
    fn delete<'a>(&'a mut self, store: &'a str, key: &'a Key) -> EngineFuture<'a, ()>;

    /// Removes every value in the store.
    fn clear<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, ()>;

    /// Commits the transaction.
    fn commit(self: Box<Self>) -> EngineFuture<'static, ()>;

    /// Discards the transaction's writes.
    fn abort(self: Box<Self>);
}

/// Schema edits available inside an upgrade transaction.
pub trait SchemaEditor {
    /// Database being upgraded.
    fn database(&self) -> &str;

    /// Version before the upgrade (0 for a new database).
    fn old_version(&self) -> u64;

    /// Version after the upgrade.
    fn new_version(&self) -> u64;

    /// Names of the stores currently in the schema, sorted.
    fn object_store_names(&self) -> Vec<String>;

    /// Creates a store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Constraint`](crate::EngineError::Constraint)
    /// if the store already exists.
    fn create_object_store(&mut self, name: &str, parameters: StoreParameters)
        -> EngineResult<()>;
}
