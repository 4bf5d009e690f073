//! Version upgrade.

use crate::client::{Client, Presence, Shared};
use crate::connection::DatabaseHandle;
use crate::error::ConnectionError;
use idbstream_engine::{EngineError, EngineResult, OpenRequest, SchemaEditor};
use std::sync::Arc;

impl Client {
    /// Reopens the handle's database at the next version, running `edit`
    /// inside the upgrade transaction.
    ///
    /// The supplied handle is closed first. The stored version is re-read
    /// from the engine's listing, falling back to the handle's own version
    /// when the listing is unavailable. Upgrades of one database are
    /// serialized.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::DatabaseMissing`] if the database was deleted
    /// - [`ConnectionError::Upgrade`] if the engine rejected the open or
    ///   `edit` failed, in which case the version is unchanged
    pub async fn upgrade<F>(
        &self,
        handle: DatabaseHandle,
        edit: F,
    ) -> Result<DatabaseHandle, ConnectionError>
    where
        F: FnOnce(&mut dyn SchemaEditor) -> EngineResult<()> + Send + 'static,
    {
        let lock = self.shared.arena.upgrade_lock(handle.name());
        let _guard = lock.lock().await;
        self.shared.upgrade_locked(handle, edit).await
    }
}

impl Shared {
    /// Performs an upgrade. The caller holds the database's upgrade lock.
    pub(crate) async fn upgrade_locked<F>(
        self: &Arc<Self>,
        handle: DatabaseHandle,
        edit: F,
    ) -> Result<DatabaseHandle, ConnectionError>
    where
        F: FnOnce(&mut dyn SchemaEditor) -> EngineResult<()> + Send + 'static,
    {
        let name = handle.name().to_string();
        let fallback = handle.version();
        handle.close();

        let stored = match self.lookup(&name).await {
            Ok(Presence::Present(version)) => version,
            Ok(Presence::Unknown) => fallback,
            Ok(Presence::Absent) => return Err(ConnectionError::DatabaseMissing { name }),
            Err(EngineError::Unavailable) => return Err(ConnectionError::Unavailable { name }),
            Err(source) => return Err(ConnectionError::Open { name, source }),
        };
        let version = stored.checked_add(1).ok_or_else(|| ConnectionError::Upgrade {
            name: name.clone(),
            version: stored,
            source: EngineError::Version {
                requested: stored,
                stored,
            },
        })?;

        let connection = self
            .engine
            .open(
                OpenRequest::new(name.clone())
                    .version(Some(version))
                    .on_upgrade(edit),
            )
            .await
            .map_err(|source| ConnectionError::Upgrade {
                name: name.clone(),
                version,
                source,
            })?;

        tracing::debug!(database = %name, from = stored, to = version, "database upgraded");
        self.track(&connection);
        let connection = self.arena.insert(connection);
        Ok(DatabaseHandle::new(connection, Arc::clone(self)))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Client, Config, ConnectionError};
    use futures::StreamExt;
    use idbstream_engine::{EngineError, MemoryEngine, StoreParameters};

    #[tokio::test]
    async fn upgrade_bumps_version_and_runs_edit() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let handle = client.connect("db", None).next().await.unwrap().unwrap();

        let upgraded = client
            .upgrade(handle, |schema| {
                assert_eq!(schema.old_version(), 1);
                assert_eq!(schema.new_version(), 2);
                schema.create_object_store("s", StoreParameters::auto_increment())
            })
            .await
            .unwrap();

        assert_eq!(upgraded.version(), 2);
        assert!(upgraded.contains_store("s"));
        assert_eq!(engine.version_of("db"), Some(2));
        assert_eq!(client.lease_count("db"), 1);
    }

    #[tokio::test]
    async fn upgrade_closes_other_leases() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let other = client.connect("db", None).next().await.unwrap().unwrap();
        let handle = client.connect("db", None).next().await.unwrap().unwrap();

        let upgraded = client.upgrade(handle, |_| Ok(())).await.unwrap();
        assert!(other.is_closed());
        assert!(!upgraded.is_closed());

        drop(other);
        assert!(!upgraded.is_closed());
    }

    #[tokio::test]
    async fn failed_edit_leaves_version_unchanged() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let handle = client.connect("db", None).next().await.unwrap().unwrap();

        let error = client
            .upgrade(handle, |_| Err(EngineError::aborted("edit failed")))
            .await
            .unwrap_err();

        assert!(matches!(error, ConnectionError::Upgrade { version: 2, .. }));
        assert_eq!(engine.version_of("db"), Some(1));
    }

    #[tokio::test]
    async fn upgrade_past_the_last_version_fails() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let handle = client
            .connect("db", Some(u64::MAX))
            .next()
            .await
            .unwrap()
            .unwrap();

        let error = client.upgrade(handle, |_| Ok(())).await.unwrap_err();
        assert!(matches!(
            error,
            ConnectionError::Upgrade {
                version: u64::MAX,
                source: EngineError::Version { .. },
                ..
            }
        ));
        assert_eq!(engine.version_of("db"), Some(u64::MAX));
    }

    #[tokio::test]
    async fn upgrade_of_deleted_database_fails() {
        let engine = MemoryEngine::new();
        let client = Client::with_config(
            engine.clone(),
            Config::new().close_on_version_change(true),
        );
        let handle = client.connect("db", None).next().await.unwrap().unwrap();
        client.delete_database("db").await.unwrap();

        let error = client.upgrade(handle, |_| Ok(())).await.unwrap_err();
        assert_eq!(error, ConnectionError::DatabaseMissing { name: "db".into() });
    }

    #[tokio::test]
    async fn without_enumeration_handle_version_is_used() {
        let engine = MemoryEngine::without_enumeration();
        let client = Client::new(engine.clone());
        let handle = client.connect("db", None).next().await.unwrap().unwrap();

        let upgraded = client.upgrade(handle, |_| Ok(())).await.unwrap();
        assert_eq!(upgraded.version(), 2);
    }
}
