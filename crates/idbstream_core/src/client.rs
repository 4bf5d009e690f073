//! Client entry point and connection manager.

use crate::bus::ChangeBus;
use crate::config::Config;
use crate::connection::{Arena, ConnectionStream, DatabaseHandle};
use crate::error::ConnectionError;
use async_stream::stream;
use futures::StreamExt;
use idbstream_engine::{
    Connection, DatabaseInfo, Engine, EngineError, EngineResult, OpenRequest,
    VersionChangeHandler,
};
use std::fmt;
use std::sync::{Arc, Weak};

/// State shared by a client and every handle and pipeline derived from it.
pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) bus: Arc<ChangeBus>,
    pub(crate) arena: Arc<Arena>,
    pub(crate) config: Config,
}

impl Shared {
    /// Acquires a lease on `name`, sharing an open connection when possible.
    pub(crate) async fn lease(
        self: &Arc<Self>,
        name: &str,
        version: Option<u64>,
    ) -> Result<DatabaseHandle, ConnectionError> {
        if let Some(connection) = self.arena.try_share(name, version) {
            return Ok(DatabaseHandle::new(connection, Arc::clone(self)));
        }

        let connection = self
            .engine
            .open(OpenRequest::new(name).version(version))
            .await
            .map_err(|source| match source {
                EngineError::Unavailable => ConnectionError::Unavailable {
                    name: name.to_string(),
                },
                source => ConnectionError::Open {
                    name: name.to_string(),
                    source,
                },
            })?;
        self.track(&connection);
        let connection = self.arena.insert(connection);
        Ok(DatabaseHandle::new(connection, Arc::clone(self)))
    }

    /// Registers the version-change reaction on a new physical connection.
    pub(crate) fn track(&self, connection: &Arc<dyn Connection>) {
        if !self.config.close_on_version_change {
            return;
        }
        let arena: Weak<Arena> = Arc::downgrade(&self.arena);
        let handler: VersionChangeHandler = Arc::new(move |connection: &dyn Connection| {
            if let Some(arena) = arena.upgrade() {
                arena.forget(connection);
            }
            connection.close();
            tracing::debug!(
                connection = %connection.id(),
                database = connection.name(),
                "connection closed for version change"
            );
        });
        connection.on_version_change(handler);
    }

    /// Looks up a database in the engine's listing.
    pub(crate) async fn lookup(&self, name: &str) -> EngineResult<Presence> {
        if !self.config.enumerate_databases {
            return Ok(Presence::Unknown);
        }
        let presence = match self.engine.databases().await? {
            None => Presence::Unknown,
            Some(databases) => databases
                .into_iter()
                .find(|db| db.name == name)
                .map_or(Presence::Absent, |db| Presence::Present(db.version)),
        };
        Ok(presence)
    }
}

/// What the engine's listing says about a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presence {
    /// Listed at this version.
    Present(u64),
    /// Not listed.
    Absent,
    /// Enumeration is disabled or unsupported; callers assume existence.
    Unknown,
}

/// Entry point to the reactive layer.
///
/// A client owns the engine, the change bus and the connection arena.
/// Cloning a client is cheap; clones share all three.
///
/// # Example
///
/// ```rust,ignore
/// use idbstream_core::{Client, ConnectionStreamExt, StoreStreamExt};
/// use idbstream_engine::{MemoryEngine, StoreParameters};
///
/// let client = Client::new(MemoryEngine::new());
/// let store = client
///     .connect("app", None)
///     .object_store("settings", StoreParameters::new());
///
/// let mut theme = store.clone().read::<String>("theme");
/// store.set_item("theme", "dark").next().await;
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

impl Client {
    /// Creates a client with the default configuration and a private bus.
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self::with_config(engine, Config::default())
    }

    /// Creates a client with the given configuration and a private bus.
    pub fn with_config(engine: impl Engine + 'static, config: Config) -> Self {
        Self::with_bus(engine, config, Arc::new(ChangeBus::new()))
    }

    /// Creates a client publishing on an existing bus.
    pub fn with_bus(engine: impl Engine + 'static, config: Config, bus: Arc<ChangeBus>) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine: Arc::new(engine),
                bus,
                arena: Arc::new(Arena::default()),
                config,
            }),
        }
    }

    /// Returns the change bus.
    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.shared.bus
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the number of leases held on the shared connection to `name`.
    pub fn lease_count(&self, name: &str) -> usize {
        self.shared.arena.leases(name)
    }

    /// Opens `name`, optionally at a specific version.
    ///
    /// The stream emits the open handle, or a [`ConnectionError`] after
    /// which it ends. Otherwise it stays open until the database is deleted
    /// through this client's bus, then completes. On a host without a
    /// storage engine it completes without emitting.
    pub fn connect(&self, name: impl Into<String>, version: Option<u64>) -> ConnectionStream {
        let shared = Arc::clone(&self.shared);
        let name = name.into();
        ConnectionStream::new(stream! {
            if !shared.engine.is_available() {
                tracing::warn!(database = %name, "storage engine unavailable, connection stream completes empty");
                return;
            }

            let mut deleted = shared.bus.database_deleted();
            match shared.lease(&name, version).await {
                Ok(handle) => yield Ok(handle),
                Err(error) => {
                    tracing::debug!(database = %name, %error, "connection failed");
                    yield Err(error);
                    return;
                }
            }

            while let Some(deleted_name) = deleted.next().await {
                if deleted_name == name {
                    tracing::trace!(database = %name, "connection stream completed by deletion");
                    break;
                }
            }
        })
    }

    /// Lists databases, or `None` if the engine cannot enumerate them.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, typically [`EngineError::Unavailable`].
    pub async fn databases(&self) -> EngineResult<Option<Vec<DatabaseInfo>>> {
        self.shared.engine.databases().await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.shared.config)
            .field("bus", &self.shared.bus)
            .finish_non_exhaustive()
    }
}
