//! Connection arena and database handles.
//!
//! Physical engine connections are shared per database name. Every
//! [`DatabaseHandle`] is one lease on a shared connection; the connection
//! closes when its last lease is released, when another caller upgrades or
//! deletes the database, or when the arena evicts it before a deletion.

use crate::client::Shared;
use crate::error::ConnectionError;
use futures::stream::BoxStream;
use futures::Stream;
use idbstream_engine::{Connection, ConnectionId, StoreParameters};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// One shared physical connection and its outstanding leases.
struct ArenaEntry {
    connection: Arc<dyn Connection>,
    leases: usize,
}

#[derive(Default)]
struct Slots {
    /// The connection new leases attach to, per database.
    current: HashMap<String, ArenaEntry>,
    /// Connections replaced by a newer version but still leased.
    retired: HashMap<ConnectionId, ArenaEntry>,
}

/// Lease-counted table of shared physical connections.
#[derive(Default)]
pub(crate) struct Arena {
    slots: Mutex<Slots>,
    upgrade_locks: Mutex<HashMap<String, Arc<futures::lock::Mutex<()>>>>,
}

impl Arena {
    /// Leases the current connection to `name` if it is open and matches
    /// `version`.
    pub(crate) fn try_share(&self, name: &str, version: Option<u64>) -> Option<Arc<dyn Connection>> {
        let mut slots = self.slots.lock();
        let entry = slots.current.get_mut(name)?;
        if entry.connection.is_closed() {
            return None;
        }
        if version.is_some_and(|v| v != entry.connection.version()) {
            return None;
        }
        entry.leases += 1;
        tracing::trace!(
            connection = %entry.connection.id(),
            database = name,
            leases = entry.leases,
            "connection shared"
        );
        Some(Arc::clone(&entry.connection))
    }

    /// Registers a freshly opened connection and leases it once.
    ///
    /// If a concurrent open already registered a live connection at the same
    /// version, the fresh one is closed and the existing one is leased
    /// instead.
    pub(crate) fn insert(&self, connection: Arc<dyn Connection>) -> Arc<dyn Connection> {
        let name = connection.name().to_string();
        let mut slots = self.slots.lock();

        if let Some(existing) = slots.current.get_mut(&name) {
            if !existing.connection.is_closed()
                && existing.connection.version() == connection.version()
            {
                existing.leases += 1;
                let shared = Arc::clone(&existing.connection);
                drop(slots);
                connection.close();
                return shared;
            }
        }

        if let Some(previous) = slots.current.remove(&name) {
            if !previous.connection.is_closed() {
                slots.retired.insert(previous.connection.id(), previous);
            }
        }
        tracing::debug!(connection = %connection.id(), database = %name, version = connection.version(), "connection opened");
        slots.current.insert(
            name,
            ArenaEntry {
                connection: Arc::clone(&connection),
                leases: 1,
            },
        );
        connection
    }

    /// Releases one lease. Closes the connection when no lease remains.
    ///
    /// A lease whose connection is no longer tracked (evicted, or closed by a
    /// version change) closes only its own connection.
    pub(crate) fn release(&self, connection: &Arc<dyn Connection>) {
        let id = connection.id();
        let name = connection.name();
        let mut slots = self.slots.lock();

        let close = match slots.current.get_mut(name) {
            Some(entry) if entry.connection.id() == id => {
                entry.leases = entry.leases.saturating_sub(1);
                entry.leases == 0
            }
            _ => match slots.retired.get_mut(&id) {
                Some(entry) => {
                    entry.leases = entry.leases.saturating_sub(1);
                    entry.leases == 0
                }
                None => true,
            },
        };

        if close {
            if slots
                .current
                .get(name)
                .is_some_and(|entry| entry.connection.id() == id)
            {
                slots.current.remove(name);
            }
            slots.retired.remove(&id);
            drop(slots);
            connection.close();
            tracing::trace!(connection = %id, database = name, "connection closed");
        }
    }

    /// Forgets a connection that is closing because of a version change.
    pub(crate) fn forget(&self, connection: &dyn Connection) {
        let id = connection.id();
        let mut slots = self.slots.lock();
        if slots
            .current
            .get(connection.name())
            .is_some_and(|entry| entry.connection.id() == id)
        {
            slots.current.remove(connection.name());
        }
        slots.retired.remove(&id);
    }

    /// Drops every connection to `name` from the arena and closes them.
    pub(crate) fn evict(&self, name: &str) {
        let mut evicted = Vec::new();
        {
            let mut slots = self.slots.lock();
            if let Some(entry) = slots.current.remove(name) {
                evicted.push(entry.connection);
            }
            let retired: Vec<ConnectionId> = slots
                .retired
                .iter()
                .filter(|(_, entry)| entry.connection.name() == name)
                .map(|(id, _)| *id)
                .collect();
            for id in retired {
                if let Some(entry) = slots.retired.remove(&id) {
                    evicted.push(entry.connection);
                }
            }
        }
        for connection in evicted {
            tracing::debug!(connection = %connection.id(), database = name, "connection evicted");
            connection.close();
        }
    }

    /// Returns the number of leases on the current connection to `name`.
    pub(crate) fn leases(&self, name: &str) -> usize {
        self.slots
            .lock()
            .current
            .get(name)
            .map_or(0, |entry| entry.leases)
    }

    /// Returns the lock serializing upgrades of `name`.
    pub(crate) fn upgrade_lock(&self, name: &str) -> Arc<futures::lock::Mutex<()>> {
        let mut locks = self.upgrade_locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drops the upgrade lock of `name` unless an upgrade still holds it.
    pub(crate) fn discard_upgrade_lock(&self, name: &str) {
        let mut locks = self.upgrade_locks.lock();
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    pub(crate) fn upgrade_lock_count(&self) -> usize {
        self.upgrade_locks.lock().len()
    }
}

/// One open connection lease on a named, versioned database.
///
/// A handle is owned by whichever primitive acquired it and is released
/// exactly once: explicitly through [`close`](Self::close), or on drop.
pub struct DatabaseHandle {
    connection: Arc<dyn Connection>,
    shared: Arc<Shared>,
    released: bool,
}

impl DatabaseHandle {
    pub(crate) fn new(connection: Arc<dyn Connection>, shared: Arc<Shared>) -> Self {
        Self {
            connection,
            shared,
            released: false,
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        self.connection.name()
    }

    /// Version the underlying connection was opened at.
    pub fn version(&self) -> u64 {
        self.connection.version()
    }

    /// Identifier of the shared physical connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Returns true if `store` exists in this handle's schema.
    pub fn contains_store(&self, store: &str) -> bool {
        self.connection.contains_store(store)
    }

    /// Creation parameters of `store`, if it exists.
    pub fn store_parameters(&self, store: &str) -> Option<StoreParameters> {
        self.connection.store_parameters(store)
    }

    /// Names of the object stores in this handle's schema.
    pub fn store_names(&self) -> Vec<String> {
        self.connection.object_store_names()
    }

    /// Returns true if the physical connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Releases the lease.
    pub fn close(mut self) {
        self.release();
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        &*self.connection
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.arena.release(&self.connection);
        }
    }
}

impl Drop for DatabaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("connection", &self.connection.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Stream returned by [`Client::connect`](crate::Client::connect).
///
/// Emits one handle, or one error, and completes when the database is
/// deleted.
pub struct ConnectionStream {
    inner: BoxStream<'static, Result<DatabaseHandle, ConnectionError>>,
}

impl ConnectionStream {
    pub(crate) fn new(
        inner: impl Stream<Item = Result<DatabaseHandle, ConnectionError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl Stream for ConnectionStream {
    type Item = Result<DatabaseHandle, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ConnectionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use idbstream_engine::{Engine, MemoryEngine, OpenRequest};

    fn open(engine: &MemoryEngine, name: &str) -> Arc<dyn Connection> {
        block_on(engine.open(OpenRequest::new(name))).unwrap()
    }

    #[test]
    fn leases_share_one_connection() {
        let engine = MemoryEngine::new();
        let arena = Arena::default();

        let first = arena.insert(open(&engine, "db"));
        let second = arena.try_share("db", None).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(arena.leases("db"), 2);

        arena.release(&first);
        assert!(!second.is_closed());
        arena.release(&second);
        assert!(second.is_closed());
        assert_eq!(arena.leases("db"), 0);
        assert_eq!(engine.open_connections("db"), 0);
    }

    #[test]
    fn version_mismatch_is_not_shared() {
        let engine = MemoryEngine::new();
        let arena = Arena::default();
        let conn = arena.insert(open(&engine, "db"));
        assert!(arena.try_share("db", Some(conn.version() + 1)).is_none());
        assert!(arena.try_share("db", Some(conn.version())).is_some());
    }

    #[test]
    fn concurrent_open_reuses_existing() {
        let engine = MemoryEngine::new();
        let arena = Arena::default();
        let first = arena.insert(open(&engine, "db"));
        let duplicate = open(&engine, "db");
        let leased = arena.insert(Arc::clone(&duplicate));

        assert_eq!(leased.id(), first.id());
        assert!(duplicate.is_closed());
        assert_eq!(arena.leases("db"), 2);
    }

    #[test]
    fn evicted_lease_closes_only_itself() {
        let engine = MemoryEngine::new();
        let arena = Arena::default();
        let conn = arena.insert(open(&engine, "db"));
        arena.evict("db");
        assert!(conn.is_closed());

        let fresh = arena.insert(open(&engine, "db"));
        arena.release(&conn);
        assert!(!fresh.is_closed());
        assert_eq!(arena.leases("db"), 1);
    }

    #[test]
    fn upgrade_lock_is_per_database() {
        let arena = Arena::default();
        let a = arena.upgrade_lock("a");
        let again = arena.upgrade_lock("a");
        let b = arena.upgrade_lock("b");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn held_upgrade_lock_survives_discard() {
        let arena = Arena::default();
        let held = arena.upgrade_lock("db");
        arena.discard_upgrade_lock("db");
        assert!(Arc::ptr_eq(&held, &arena.upgrade_lock("db")));

        drop(held);
        arena.discard_upgrade_lock("db");
        assert_eq!(arena.upgrade_lock_count(), 0);
    }
}
