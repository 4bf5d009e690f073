//! Object-store resolver.
//!
//! Turns a stream of database handles into a stream of [`StoreHandle`]s,
//! creating the store through a version upgrade the first time it is
//! missing. The resulting [`StoreStream`] is multicast: clones share one
//! resolution and late clones receive the resolved handle immediately.

use crate::client::Shared;
use crate::connection::DatabaseHandle;
use crate::error::{ConnectionError, FailureReason, OperationFailure};
use crate::guard::filter_if_store_does_not_exist;
use crate::operation::{perform_object_store_operation, Operation, Outcome};
use crate::operators::SwitchMapExt;
use crate::share::ReplayShared;
use futures::{future, stream, FutureExt, Stream, StreamExt};
use idbstream_engine::{EngineError, StoreParameters, TransactionMode};
use std::fmt;
use std::sync::Arc;

/// A logical reference to an object store.
///
/// A store handle owns no connection. Every operation leases one by
/// database name, so handles stay valid across upgrades of their database.
#[derive(Clone)]
pub struct StoreHandle {
    name: String,
    database: String,
    auto_increment: bool,
    pub(crate) shared: Arc<Shared>,
}

impl StoreHandle {
    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the database holding the store.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether the store generates its own keys.
    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Leases a connection, checks that the store exists and performs
    /// `operation`.
    ///
    /// Returns `Ok(None)` when the store no longer exists. Publishes no
    /// change events.
    ///
    /// # Errors
    ///
    /// Returns the tagged [`OperationFailure`] if no connection could be
    /// leased or the request failed.
    pub async fn execute(&self, operation: Operation) -> Result<Option<Outcome>, OperationFailure> {
        let handle = match self.shared.lease(&self.database, None).await {
            Ok(handle) => handle,
            Err(error) => {
                return Err(OperationFailure {
                    database: self.database.clone(),
                    store: self.name.clone(),
                    operation: operation.kind(),
                    reason: FailureReason::Connection(error),
                })
            }
        };
        let Some(handle) = filter_if_store_does_not_exist(handle, &self.name) else {
            return Ok(None);
        };
        perform_object_store_operation(handle, &self.name, operation)
            .await
            .map(Some)
    }
}

impl PartialEq for StoreHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.database == other.database
            && self.auto_increment == other.auto_increment
            && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for StoreHandle {}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("auto_increment", &self.auto_increment)
            .finish()
    }
}

/// Multicast stream of resolved store handles.
pub type StoreStream = ReplayShared<Result<StoreHandle, ConnectionError>>;

/// Adds [`object_store`](ConnectionStreamExt::object_store) to connection
/// streams.
pub trait ConnectionStreamExt:
    Stream<Item = Result<DatabaseHandle, ConnectionError>> + Sized + Send + 'static
{
    /// Resolves `name` on every database handle, creating it with
    /// `parameters` if it does not exist.
    ///
    /// An existing store is verified with a committed read-write
    /// transaction. A missing store is created through a version upgrade;
    /// creation is serialized per database and re-checked on a fresh lease,
    /// so concurrent resolvers of the same store upgrade at most once.
    /// Connection errors are forwarded as `Err` items. The stream completes
    /// when the database is deleted.
    fn object_store(self, name: impl Into<String>, parameters: StoreParameters) -> StoreStream {
        let name = name.into();
        let resolved = self.switch_map(move |result| match result {
            Ok(handle) => resolve(handle, name.clone(), parameters).into_stream().boxed(),
            Err(error) => stream::once(future::ready(Err(error))).boxed(),
        });
        ReplayShared::new(resolved)
    }
}

impl<S> ConnectionStreamExt for S where
    S: Stream<Item = Result<DatabaseHandle, ConnectionError>> + Sized + Send + 'static
{
}

async fn resolve(
    handle: DatabaseHandle,
    name: String,
    parameters: StoreParameters,
) -> Result<StoreHandle, ConnectionError> {
    let shared = Arc::clone(handle.shared());
    let database = handle.name().to_string();

    if handle.contains_store(&name) {
        let verified = verify(&handle, &name).await;
        handle.close();
        return verified.map(|params| store_handle(&shared, &database, &name, params));
    }
    handle.close();

    let lock = shared.arena.upgrade_lock(&database);
    let _guard = lock.lock().await;

    let fresh = shared.lease(&database, None).await?;
    if fresh.contains_store(&name) {
        let verified = verify(&fresh, &name).await;
        fresh.close();
        return verified.map(|params| store_handle(&shared, &database, &name, params));
    }

    let store = name.clone();
    let upgraded = shared
        .upgrade_locked(fresh, move |schema| {
            schema.create_object_store(&store, parameters)
        })
        .await?;
    tracing::debug!(database = %database, store = %name, version = upgraded.version(), "object store created");
    let params = upgraded.store_parameters(&name).unwrap_or(parameters);
    upgraded.close();
    Ok(store_handle(&shared, &database, &name, params))
}

async fn verify(handle: &DatabaseHandle, store: &str) -> Result<StoreParameters, ConnectionError> {
    let schema_error = |source: EngineError| ConnectionError::Schema {
        database: handle.name().to_string(),
        store: store.to_string(),
        source,
    };
    let txn = handle
        .connection()
        .transaction(&[store], TransactionMode::ReadWrite)
        .map_err(schema_error)?;
    txn.commit().await.map_err(schema_error)?;
    handle
        .store_parameters(store)
        .ok_or_else(|| schema_error(EngineError::not_found(store)))
}

fn store_handle(
    shared: &Arc<Shared>,
    database: &str,
    name: &str,
    params: StoreParameters,
) -> StoreHandle {
    StoreHandle {
        name: name.to_string(),
        database: database.to_string(),
        auto_increment: params.auto_increment,
        shared: Arc::clone(shared),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;
    use idbstream_engine::MemoryEngine;
    use serde_json::json;

    #[tokio::test]
    async fn missing_store_is_created_once() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());

        let mut first = client
            .connect("db", None)
            .object_store("s", StoreParameters::auto_increment());
        let store = first.next().await.unwrap().unwrap();
        assert!(store.auto_increment());
        assert_eq!(engine.version_of("db"), Some(2));

        let mut second = client
            .connect("db", None)
            .object_store("s", StoreParameters::auto_increment());
        let again = second.next().await.unwrap().unwrap();
        assert_eq!(again, store);
        assert_eq!(engine.version_of("db"), Some(2));
        assert_eq!(client.lease_count("db"), 0);
    }

    #[tokio::test]
    async fn concurrent_resolvers_upgrade_once() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());

        let a = client.connect("db", None).object_store("s", StoreParameters::new());
        let b = client.connect("db", None).object_store("s", StoreParameters::new());
        let (a, b) = futures::join!(a.take(1).collect::<Vec<_>>(), b.take(1).collect::<Vec<_>>());

        assert!(a[0].is_ok());
        assert!(b[0].is_ok());
        assert_eq!(engine.version_of("db"), Some(2));
    }

    #[tokio::test]
    async fn clones_share_one_resolution() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let stream = client.connect("db", None).object_store("s", StoreParameters::new());
        let mut a = stream.clone();
        let mut b = stream;

        let first = a.next().await.unwrap().unwrap();
        let second = b.next().await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.version_of("db"), Some(2));
    }

    #[tokio::test]
    async fn connection_errors_are_forwarded() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine);
        client.connect("db", Some(5)).next().await.unwrap().unwrap().close();

        let mut stream = client.connect("db", Some(1)).object_store("s", StoreParameters::new());
        assert!(matches!(
            stream.next().await,
            Some(Err(ConnectionError::Open { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn store_stream_completes_on_deletion() {
        let client = Client::new(MemoryEngine::new());
        let mut stream = client.connect("db", None).object_store("s", StoreParameters::new());
        stream.next().await.unwrap().unwrap();

        client.delete_database("db").await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn execute_reports_tagged_results() {
        let client = Client::new(MemoryEngine::new());
        let store = client
            .connect("db", None)
            .object_store("s", StoreParameters::new())
            .next()
            .await
            .unwrap()
            .unwrap();

        let outcome = store
            .execute(Operation::Put("k".into(), json!(1)))
            .await
            .unwrap();
        assert_eq!(outcome, Some(Outcome::Written(Some("k".into()))));

        let failure = store.execute(Operation::Add(json!(2))).await.unwrap_err();
        assert!(matches!(failure.reason, FailureReason::Engine(EngineError::Data { .. })));
    }

    #[tokio::test]
    async fn execute_skips_missing_store() {
        let client = Client::new(MemoryEngine::new());
        let store = client
            .connect("db", None)
            .object_store("s", StoreParameters::new())
            .next()
            .await
            .unwrap()
            .unwrap();
        let ghost = StoreHandle {
            name: "ghost".into(),
            ..store
        };
        assert_eq!(ghost.execute(Operation::GetAllKeys).await.unwrap(), None);
    }
}
