//! Database deletion.

use crate::client::{Client, Presence};
use crate::error::DeletionError;

impl Client {
    /// Deletes a database and announces it on the bus.
    ///
    /// The shared connection to `name` is evicted first so the deletion is
    /// not blocked by this client's own leases. On success every subscriber
    /// of [`ChangeBus::database_deleted`](crate::ChangeBus::database_deleted)
    /// receives `name` before this future resolves, which completes the
    /// connection and store streams derived from it.
    ///
    /// Deletions of the same name must not be pipelined; await each one.
    ///
    /// # Errors
    ///
    /// - [`DeletionError::NotFound`] if the engine's listing lacks `name`
    /// - [`DeletionError::Blocked`] if connections stayed open
    /// - [`DeletionError::Unavailable`] on a host without a storage engine
    pub async fn delete_database(&self, name: &str) -> Result<(), DeletionError> {
        let shared = &self.shared;
        if !shared.engine.is_available() {
            return Err(DeletionError::Unavailable {
                name: name.to_string(),
            });
        }

        match shared.lookup(name).await {
            Ok(Presence::Absent) => {
                return Err(DeletionError::NotFound {
                    name: name.to_string(),
                })
            }
            Ok(Presence::Present(_) | Presence::Unknown) => {}
            Err(source) => return Err(DeletionError::from_engine(name, source)),
        }

        if shared.config.close_on_version_change {
            shared.arena.evict(name);
        }
        shared
            .engine
            .delete_database(name)
            .await
            .map_err(|source| DeletionError::from_engine(name, source))?;

        shared.arena.discard_upgrade_lock(name);
        tracing::debug!(database = name, "database deleted");
        shared.bus.publish_deleted(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Client, Config, DeletionError};
    use futures::StreamExt;
    use idbstream_engine::MemoryEngine;

    #[tokio::test]
    async fn deletion_completes_connection_stream() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let mut stream = client.connect("db", None);
        let handle = stream.next().await.unwrap().unwrap();

        client.delete_database("db").await.unwrap();
        assert!(handle.is_closed());
        assert!(stream.next().await.is_none());
        assert!(!engine.contains_database("db"));
    }

    #[tokio::test]
    async fn deletion_drops_the_upgrade_lock() {
        let client = Client::new(MemoryEngine::new());
        let handle = client.connect("db", None).next().await.unwrap().unwrap();
        client.upgrade(handle, |_| Ok(())).await.unwrap().close();
        assert_eq!(client.shared.arena.upgrade_lock_count(), 1);

        client.delete_database("db").await.unwrap();
        assert_eq!(client.shared.arena.upgrade_lock_count(), 0);
    }

    #[tokio::test]
    async fn deleting_a_missing_database_fails() {
        let client = Client::new(MemoryEngine::new());
        let error = client.delete_database("nope").await.unwrap_err();
        assert_eq!(error, DeletionError::NotFound { name: "nope".into() });
    }

    #[tokio::test]
    async fn without_enumeration_existence_is_assumed() {
        let client = Client::new(MemoryEngine::without_enumeration());
        client.delete_database("nope").await.unwrap();

        let client = Client::with_config(
            MemoryEngine::new(),
            Config::new().enumerate_databases(false),
        );
        client.delete_database("nope").await.unwrap();
    }

    #[tokio::test]
    async fn held_lease_blocks_when_connections_stay_open() {
        let engine = MemoryEngine::new();
        let client = Client::with_config(
            engine.clone(),
            Config::new().close_on_version_change(false),
        );
        let mut stream = client.connect("db", None);
        let handle = stream.next().await.unwrap().unwrap();

        let error = client.delete_database("db").await.unwrap_err();
        assert!(matches!(error, DeletionError::Blocked { open: 1, .. }));

        handle.close();
        client.delete_database("db").await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_engine_fails_deletion() {
        let client = Client::new(MemoryEngine::unavailable());
        let error = client.delete_database("db").await.unwrap_err();
        assert_eq!(error, DeletionError::Unavailable { name: "db".into() });
    }

    #[tokio::test]
    async fn deletion_is_broadcast() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine);
        client.connect("db", None).next().await.unwrap().unwrap().close();

        let mut deleted = client.bus().database_deleted();
        client.delete_database("db").await.unwrap();
        assert_eq!(deleted.next().await.as_deref(), Some("db"));
    }
}
