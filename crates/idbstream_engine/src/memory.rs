//! In-memory storage engine.

use crate::engine::{
    Connection, ConnectionId, DatabaseInfo, Engine, EngineFuture, OpenRequest, SchemaEditor,
    StoreParameters, Transaction, TransactionMode, VersionChangeHandler,
};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, Value};
use futures::future;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// An in-memory engine with the same version, upgrade and transaction
/// semantics as the browser's object-store engine.
///
/// This engine is suitable for:
/// - Unit and integration tests
/// - Hosts without a native engine that still want the reactive layer
///
/// Requests complete immediately; the returned futures are always ready.
///
/// # Example
///
/// ```rust
/// use futures::executor::block_on;
/// use idbstream_engine::{Engine, MemoryEngine, OpenRequest, StoreParameters};
///
/// let engine = MemoryEngine::new();
/// let conn = block_on(engine.open(OpenRequest::new("app").on_upgrade(|schema| {
///     schema.create_object_store("todos", StoreParameters::auto_increment())
/// })))
/// .unwrap();
/// assert_eq!(conn.version(), 1);
/// assert!(conn.contains_store("todos"));
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    enumerate: bool,
    available: bool,
}

#[derive(Default)]
struct EngineState {
    databases: BTreeMap<String, DatabaseState>,
    connections: Vec<Weak<MemoryConnection>>,
    next_connection: u64,
}

impl EngineState {
    fn version_of(&self, name: &str) -> u64 {
        self.databases.get(name).map_or(0, |db| db.version)
    }

    fn open_connections(&self, name: &str) -> usize {
        self.connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| conn.name == name && !conn.is_closed())
            .count()
    }
}

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    version: u64,
    stores: BTreeMap<String, StoreState>,
}

#[derive(Debug, Clone)]
struct StoreState {
    parameters: StoreParameters,
    next_key: i64,
    entries: BTreeMap<Key, Value>,
}

impl StoreState {
    fn new(parameters: StoreParameters) -> Self {
        Self {
            parameters,
            next_key: 1,
            entries: BTreeMap::new(),
        }
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Key::Int(value) = key {
            if self.parameters.auto_increment && *value >= self.next_key {
                self.next_key = value.saturating_add(1);
            }
        }
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            enumerate: true,
            available: true,
        }
    }

    /// Creates an engine that cannot enumerate its databases.
    ///
    /// Models hosts where database listing is unsupported.
    #[must_use]
    pub fn without_enumeration() -> Self {
        Self {
            enumerate: false,
            ..Self::new()
        }
    }

    /// Creates an engine that reports itself unavailable and rejects every
    /// request.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Returns the stored version of a database.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.state.lock().databases.get(name).map(|db| db.version)
    }

    /// Returns true if the database exists.
    #[must_use]
    pub fn contains_database(&self, name: &str) -> bool {
        self.state.lock().databases.contains_key(name)
    }

    /// Returns the number of open connections to a database.
    #[must_use]
    pub fn open_connections(&self, name: &str) -> usize {
        self.state.lock().open_connections(name)
    }

    /// Returns the number of entries committed to a store.
    #[must_use]
    pub fn entry_count(&self, database: &str, store: &str) -> Option<usize> {
        let state = self.state.lock();
        state
            .databases
            .get(database)
            .and_then(|db| db.stores.get(store))
            .map(|s| s.entries.len())
    }

    fn live_connections(&self, name: &str) -> Vec<Arc<MemoryConnection>> {
        let state = self.state.lock();
        state
            .connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| conn.name == name && !conn.is_closed())
            .collect()
    }

    /// Fires version-change callbacks on every open connection to `name`.
    /// Must be called without the state lock held.
    fn notify_version_change(&self, name: &str) {
        for conn in self.live_connections(name) {
            let handlers = conn.handlers.lock().clone();
            let target: &dyn Connection = &*conn;
            for handler in handlers {
                handler(target);
            }
        }
    }

    fn open_now(&self, request: OpenRequest) -> EngineResult<Arc<dyn Connection>> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        let OpenRequest {
            name,
            version,
            on_upgrade,
        } = request;

        let mut state = self.state.lock();
        let stored = state.version_of(&name);
        let target = match version {
            Some(0) => {
                return Err(EngineError::Version {
                    requested: 0,
                    stored,
                })
            }
            Some(requested) => requested,
            None => stored.max(1),
        };
        if target < stored {
            return Err(EngineError::Version {
                requested: target,
                stored,
            });
        }

        if target > stored {
            if stored > 0 {
                // Handlers run unlocked; the schema is re-checked afterwards.
                drop(state);
                self.notify_version_change(&name);
                state = self.state.lock();
                let current = state.version_of(&name);
                if current != stored {
                    return Err(EngineError::Version {
                        requested: target,
                        stored: current,
                    });
                }
                let open = state.open_connections(&name);
                if open > 0 {
                    return Err(EngineError::Blocked { name, open });
                }
            }

            let mut working = state.databases.get(&name).cloned().unwrap_or_default();
            if let Some(handler) = on_upgrade {
                let mut editor = MemorySchemaEditor {
                    database: &name,
                    old_version: stored,
                    new_version: target,
                    db: &mut working,
                };
                handler(&mut editor)?;
            }
            working.version = target;
            state.databases.insert(name.clone(), working);
            tracing::debug!(database = %name, from = stored, to = target, "database upgraded");
        }

        let (version, schema) = {
            let db = state
                .databases
                .get(&name)
                .ok_or_else(|| EngineError::invalid_state("database vanished during open"))?;
            let schema = db
                .stores
                .iter()
                .map(|(store, s)| (store.clone(), s.parameters))
                .collect();
            (db.version, schema)
        };
        state.next_connection += 1;
        let conn = Arc::new(MemoryConnection {
            id: ConnectionId(state.next_connection),
            name,
            version,
            schema,
            closed: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            state: Arc::clone(&self.state),
        });
        state.connections.retain(|weak| weak.strong_count() > 0);
        state.connections.push(Arc::downgrade(&conn));
        tracing::trace!(connection = %conn.id, database = %conn.name, version, "connection opened");
        Ok(conn as Arc<dyn Connection>)
    }

    fn delete_now(&self, name: &str) -> EngineResult<()> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        self.notify_version_change(name);
        let mut state = self.state.lock();
        let open = state.open_connections(name);
        if open > 0 {
            return Err(EngineError::Blocked {
                name: name.to_string(),
                open,
            });
        }
        state.databases.remove(name);
        Ok(())
    }

    fn databases_now(&self) -> EngineResult<Option<Vec<DatabaseInfo>>> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        if !self.enumerate {
            return Ok(None);
        }
        let state = self.state.lock();
        Ok(Some(
            state
                .databases
                .iter()
                .map(|(name, db)| DatabaseInfo {
                    name: name.clone(),
                    version: db.version,
                })
                .collect(),
        ))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryEngine")
            .field("databases", &state.databases.keys().collect::<Vec<_>>())
            .field("enumerate", &self.enumerate)
            .field("available", &self.available)
            .finish()
    }
}

impl Engine for MemoryEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn open(&self, request: OpenRequest) -> EngineFuture<'_, Arc<dyn Connection>> {
        Box::pin(future::ready(self.open_now(request)))
    }

    fn delete_database(&self, name: &str) -> EngineFuture<'_, ()> {
        Box::pin(future::ready(self.delete_now(name)))
    }

    fn databases(&self) -> EngineFuture<'_, Option<Vec<DatabaseInfo>>> {
        Box::pin(future::ready(self.databases_now()))
    }
}

/// A connection to a database held by a [`MemoryEngine`].
struct MemoryConnection {
    id: ConnectionId,
    name: String,
    version: u64,
    schema: BTreeMap<String, StoreParameters>,
    closed: AtomicBool,
    handlers: Mutex<Vec<VersionChangeHandler>>,
    state: Arc<Mutex<EngineState>>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.schema.keys().cloned().collect()
    }

    fn store_parameters(&self, store: &str) -> Option<StoreParameters> {
        self.schema.get(store).copied()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::trace!(connection = %self.id, database = %self.name, "connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_version_change(&self, handler: VersionChangeHandler) {
        self.handlers.lock().push(handler);
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn Transaction>> {
        if self.is_closed() {
            return Err(EngineError::invalid_state("connection is closed"));
        }
        if let Some(missing) = stores.iter().find(|store| !self.schema.contains_key(**store)) {
            return Err(EngineError::not_found(*missing));
        }

        let state = self.state.lock();
        let db = state
            .databases
            .get(&self.name)
            .filter(|db| db.version == self.version)
            .ok_or_else(|| EngineError::invalid_state("database changed since connection opened"))?;
        let working = stores
            .iter()
            .map(|store| {
                let snapshot = db
                    .stores
                    .get(*store)
                    .cloned()
                    .unwrap_or_else(|| StoreState::new(self.schema[*store]));
                (store.to_string(), snapshot)
            })
            .collect();

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            database: self.name.clone(),
            version: self.version,
            mode,
            working,
            log: Vec::new(),
        }))
    }
}

enum WriteOp {
    Put { store: String, key: Key, value: Value },
    Delete { store: String, key: Key },
    Clear { store: String },
}

/// Reads run against a snapshot taken when the transaction started plus its
/// own writes; writes are replayed onto the committed state at commit.
struct MemoryTransaction {
    state: Arc<Mutex<EngineState>>,
    database: String,
    version: u64,
    mode: TransactionMode,
    working: BTreeMap<String, StoreState>,
    log: Vec<WriteOp>,
}

impl MemoryTransaction {
    fn store(&mut self, store: &str) -> EngineResult<&mut StoreState> {
        self.working
            .get_mut(store)
            .ok_or_else(|| EngineError::not_found(store))
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(EngineError::ReadOnly),
        }
    }

    fn write(
        &mut self,
        store: &str,
        key: Option<Key>,
        value: Value,
        overwrite: bool,
    ) -> EngineResult<Key> {
        self.ensure_writable()?;
        let target = self.store(store)?;
        let key = match key {
            Some(key) => {
                target.bump_generator(&key);
                key
            }
            None if target.parameters.auto_increment => {
                let key = Key::Int(target.next_key);
                target.next_key = target.next_key.saturating_add(1);
                key
            }
            None => {
                return Err(EngineError::data(format!(
                    "store {store} has no key generator and no key was provided"
                )))
            }
        };
        if !overwrite && target.entries.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "key {key} already exists in store {store}"
            )));
        }
        target.entries.insert(key.clone(), value.clone());
        self.log.push(WriteOp::Put {
            store: store.to_string(),
            key: key.clone(),
            value,
        });
        Ok(key)
    }

    fn remove(&mut self, store: &str, key: &Key) -> EngineResult<()> {
        self.ensure_writable()?;
        self.store(store)?.entries.remove(key);
        self.log.push(WriteOp::Delete {
            store: store.to_string(),
            key: key.clone(),
        });
        Ok(())
    }

    fn clear_store(&mut self, store: &str) -> EngineResult<()> {
        self.ensure_writable()?;
        self.store(store)?.entries.clear();
        self.log.push(WriteOp::Clear {
            store: store.to_string(),
        });
        Ok(())
    }

    fn commit_now(self) -> EngineResult<()> {
        if self.log.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let db = state
            .databases
            .get_mut(&self.database)
            .filter(|db| db.version == self.version)
            .ok_or_else(|| EngineError::aborted("database was deleted or upgraded"))?;

        for op in self.log {
            match op {
                WriteOp::Put { store, key, value } => {
                    let parameters = self.working[&store].parameters;
                    let target = db
                        .stores
                        .entry(store)
                        .or_insert_with(|| StoreState::new(parameters));
                    target.bump_generator(&key);
                    target.entries.insert(key, value);
                }
                WriteOp::Delete { store, key } => {
                    if let Some(target) = db.stores.get_mut(&store) {
                        target.entries.remove(&key);
                    }
                }
                WriteOp::Clear { store } => {
                    if let Some(target) = db.stores.get_mut(&store) {
                        target.entries.clear();
                    }
                }
            }
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction {
    fn get<'a>(&'a mut self, store: &'a str, key: &'a Key) -> EngineFuture<'a, Option<Value>> {
        let result = self.store(store).map(|s| s.entries.get(key).cloned());
        Box::pin(future::ready(result))
    }

    fn get_all<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, Vec<Value>> {
        let result = self
            .store(store)
            .map(|s| s.entries.values().cloned().collect());
        Box::pin(future::ready(result))
    }

    fn get_all_keys<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, Vec<Key>> {
        let result = self.store(store).map(|s| s.entries.keys().cloned().collect());
        Box::pin(future::ready(result))
    }

    fn put<'a>(
        &'a mut self,
        store: &'a str,
        key: Option<Key>,
        value: Value,
    ) -> EngineFuture<'a, Key> {
        Box::pin(future::ready(self.write(store, key, value, true)))
    }

    fn add<'a>(
        &'a mut self,
        store: &'a str,
        key: Option<Key>,
        value: Value,
    ) -> EngineFuture<'a, Key> {
        Box::pin(future::ready(self.write(store, key, value, false)))
    }

    fn delete<'a>(&'a mut self, store: &'a str, key: &'a Key) -> EngineFuture<'a, ()> {
        Box::pin(future::ready(self.remove(store, key)))
    }

    fn clear<'a>(&'a mut self, store: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(future::ready(self.clear_store(store)))
    }

    fn commit(self: Box<Self>) -> EngineFuture<'static, ()> {
        Box::pin(future::ready((*self).commit_now()))
    }

    fn abort(self: Box<Self>) {}
}

struct MemorySchemaEditor<'a> {
    database: &'a str,
    old_version: u64,
    new_version: u64,
    db: &'a mut DatabaseState,
}

impl SchemaEditor for MemorySchemaEditor<'_> {
    fn database(&self) -> &str {
        self.database
    }

    fn old_version(&self) -> u64 {
        self.old_version
    }

    fn new_version(&self) -> u64 {
        self.new_version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.db.stores.keys().cloned().collect()
    }

    fn create_object_store(
        &mut self,
        name: &str,
        parameters: StoreParameters,
    ) -> EngineResult<()> {
        if self.db.stores.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "object store {name} already exists in {}",
                self.database
            )));
        }
        self.db
            .stores
            .insert(name.to_string(), StoreState::new(parameters));
        tracing::debug!(database = %self.database, store = %name, ?parameters, "object store created");
        Ok(())
    }
}
