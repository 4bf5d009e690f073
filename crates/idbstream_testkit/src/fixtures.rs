//! Test fixtures.
//!
//! Every fixture gets its own database name so tests sharing a bus, or a
//! process, never observe each other's events.

use idbstream_core::{Client, Config, ConnectionStreamExt, StoreStream};
use idbstream_engine::{MemoryEngine, StoreParameters};
use uuid::Uuid;

/// Returns a database name unique to this process run.
pub fn unique_database_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// A client over a fresh [`MemoryEngine`] with a unique database name.
pub struct TestClient {
    /// The client under test.
    pub client: Client,
    /// The engine behind the client, for direct inspection.
    pub engine: MemoryEngine,
    /// Database name reserved for this fixture.
    pub database: String,
}

impl TestClient {
    /// Creates a fixture with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a fixture with `config`.
    pub fn with_config(config: Config) -> Self {
        Self::with_engine(MemoryEngine::new(), config)
    }

    /// Creates a fixture over an existing engine.
    pub fn with_engine(engine: MemoryEngine, config: Config) -> Self {
        crate::tracing_init::init_tracing();
        Self {
            client: Client::with_config(engine.clone(), config),
            engine,
            database: unique_database_name("db"),
        }
    }

    /// Connects to the fixture database and resolves `store` on it.
    pub fn store(&self, store: &str, parameters: StoreParameters) -> StoreStream {
        self.client
            .connect(self.database.clone(), None)
            .object_store(store, parameters)
    }

    /// Resolves an auto-incrementing `store`.
    pub fn auto_increment_store(&self, store: &str) -> StoreStream {
        self.store(store, StoreParameters::auto_increment())
    }

    /// Deletes the fixture database.
    pub async fn delete(&self) {
        self.client
            .delete_database(&self.database)
            .await
            .expect("failed to delete fixture database");
    }

    /// Stored version of the fixture database.
    pub fn version(&self) -> Option<u64> {
        self.engine.version_of(&self.database)
    }

    /// Number of open physical connections to the fixture database.
    pub fn open_connections(&self) -> usize {
        self.engine.open_connections(&self.database)
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let a = unique_database_name("db");
        let b = unique_database_name("db");
        assert_ne!(a, b);
        assert!(a.starts_with("db-"));
    }

    #[test]
    fn fixture_starts_empty() {
        let fx = TestClient::new();
        assert_eq!(fx.version(), None);
        assert_eq!(fx.open_connections(), 0);
    }
}
