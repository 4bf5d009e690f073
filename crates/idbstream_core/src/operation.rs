//! Operation helper.
//!
//! Wraps each single-request store operation in the same scope: open a
//! read-write transaction on the store, issue the request, await the
//! commit, and close the handle on every path.

use crate::connection::DatabaseHandle;
use crate::error::{FailureReason, OperationFailure, OperationKind};
use crate::request::{PendingRequest, RequestState};
use idbstream_engine::{Connection, Key, TransactionMode, Value};

/// A single request against one object store.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read every key.
    GetAllKeys,
    /// Read every value.
    GetAll,
    /// Read every key and value from the same transaction.
    GetAllEntries,
    /// Read the value under a key.
    Get(Key),
    /// Remove the value under a key.
    Delete(Key),
    /// Insert or replace the value under a key.
    Put(Key, Value),
    /// Insert a value under a generated key.
    Add(Value),
    /// Remove every value.
    Clear,
}

impl Operation {
    /// Kind of request this operation issues.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::GetAllKeys => OperationKind::GetAllKeys,
            Self::GetAll => OperationKind::GetAll,
            Self::GetAllEntries => OperationKind::GetAllEntries,
            Self::Get(_) => OperationKind::Get,
            Self::Delete(_) => OperationKind::Delete,
            Self::Put(..) => OperationKind::Put,
            Self::Add(_) => OperationKind::Add,
            Self::Clear => OperationKind::Clear,
        }
    }
}

/// Result of a successful [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Keys in order.
    Keys(Vec<Key>),
    /// Values in key order.
    Values(Vec<Value>),
    /// Key-value pairs in key order.
    Entries(Vec<(Key, Value)>),
    /// A single value, if present.
    Value(Option<Value>),
    /// A write was committed. Carries the written key for put and add.
    Written(Option<Key>),
}

impl Outcome {
    /// Returns the keys of a key read.
    pub fn into_keys(self) -> Option<Vec<Key>> {
        match self {
            Self::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    /// Returns the values of a value read.
    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            Self::Values(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the pairs of an entry read.
    pub fn into_entries(self) -> Option<Vec<(Key, Value)>> {
        match self {
            Self::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns the value of a single read.
    pub fn into_value(self) -> Option<Option<Value>> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Performs `operation` on `store` through `handle`, then closes `handle`.
///
/// The handle is closed whether the operation succeeds or fails.
///
/// # Errors
///
/// Returns an [`OperationFailure`] naming the store and request if the
/// transaction could not be started, the request failed, or the commit
/// failed. A failed request aborts its transaction.
pub async fn perform_object_store_operation(
    handle: DatabaseHandle,
    store: &str,
    operation: Operation,
) -> Result<Outcome, OperationFailure> {
    let kind = operation.kind();
    let mut request = PendingRequest::new(handle.name(), store, kind);
    let result = issue(handle.connection(), store, operation, &mut request).await;
    let database = handle.name().to_string();
    handle.close();

    match result {
        Ok(outcome) => {
            request
                .transition(RequestState::Closed)
                .map_err(|error| failure(&database, store, kind, error.into()))?;
            Ok(outcome)
        }
        Err(reason) => {
            request.fail();
            Err(failure(&database, store, kind, reason))
        }
    }
}

fn failure(database: &str, store: &str, operation: OperationKind, reason: FailureReason) -> OperationFailure {
    OperationFailure {
        database: database.to_string(),
        store: store.to_string(),
        operation,
        reason,
    }
}

async fn issue(
    connection: &dyn Connection,
    store: &str,
    operation: Operation,
    request: &mut PendingRequest,
) -> Result<Outcome, FailureReason> {
    request.transition(RequestState::Opening)?;
    let mut txn = connection.transaction(&[store], TransactionMode::ReadWrite)?;
    request.transition(RequestState::TransactionPending)?;

    let result = match operation {
        Operation::GetAllKeys => txn.get_all_keys(store).await.map(Outcome::Keys),
        Operation::GetAll => txn.get_all(store).await.map(Outcome::Values),
        Operation::GetAllEntries => match txn.get_all_keys(store).await {
            Ok(keys) => txn
                .get_all(store)
                .await
                .map(|values| Outcome::Entries(keys.into_iter().zip(values).collect())),
            Err(error) => Err(error),
        },
        Operation::Get(key) => txn.get(store, &key).await.map(Outcome::Value),
        Operation::Delete(key) => txn
            .delete(store, &key)
            .await
            .map(|()| Outcome::Written(None)),
        Operation::Put(key, value) => txn
            .put(store, Some(key), value)
            .await
            .map(|key| Outcome::Written(Some(key))),
        Operation::Add(value) => txn
            .add(store, None, value)
            .await
            .map(|key| Outcome::Written(Some(key))),
        Operation::Clear => txn.clear(store).await.map(|()| Outcome::Written(None)),
    };

    match result {
        Ok(outcome) => {
            txn.commit().await?;
            Ok(outcome)
        }
        Err(error) => {
            txn.abort();
            Err(error.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;
    use idbstream_engine::{EngineError, MemoryEngine, StoreParameters};
    use serde_json::json;

    async fn store_handle(client: &Client, params: StoreParameters) -> DatabaseHandle {
        let handle = client.shared.lease("db", None).await.unwrap();
        client
            .upgrade(handle, move |schema| schema.create_object_store("s", params))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get() {
        let client = Client::new(MemoryEngine::new());
        let handle = store_handle(&client, StoreParameters::new()).await;

        let written = perform_object_store_operation(
            handle,
            "s",
            Operation::Put(Key::from("k"), json!({"n": 1})),
        )
        .await
        .unwrap();
        assert_eq!(written, Outcome::Written(Some(Key::from("k"))));

        let handle = client.shared.lease("db", None).await.unwrap();
        let read = perform_object_store_operation(handle, "s", Operation::Get(Key::from("k")))
            .await
            .unwrap();
        assert_eq!(read, Outcome::Value(Some(json!({"n": 1}))));
    }

    #[tokio::test]
    async fn handle_is_closed_on_both_paths() {
        let engine = MemoryEngine::new();
        let client = Client::new(engine.clone());
        let handle = store_handle(&client, StoreParameters::new()).await;
        perform_object_store_operation(handle, "s", Operation::GetAllKeys)
            .await
            .unwrap();
        assert_eq!(engine.open_connections("db"), 0);

        let handle = client.shared.lease("db", None).await.unwrap();
        let failure = perform_object_store_operation(handle, "s", Operation::Add(json!(1)))
            .await
            .unwrap_err();
        assert_eq!(failure.operation, OperationKind::Add);
        assert!(matches!(failure.reason, FailureReason::Engine(EngineError::Data { .. })));
        assert_eq!(engine.open_connections("db"), 0);
        assert_eq!(client.lease_count("db"), 0);
    }

    #[tokio::test]
    async fn missing_store_fails_without_writing() {
        let client = Client::new(MemoryEngine::new());
        let handle = client.shared.lease("db", None).await.unwrap();
        let failure = perform_object_store_operation(handle, "absent", Operation::Clear)
            .await
            .unwrap_err();
        assert_eq!(failure.store, "absent");
        assert_eq!(failure.database, "db");
    }

    #[tokio::test]
    async fn entries_come_from_one_snapshot() {
        let client = Client::new(MemoryEngine::new());
        let handle = store_handle(&client, StoreParameters::auto_increment()).await;
        perform_object_store_operation(handle, "s", Operation::Add(json!("a")))
            .await
            .unwrap();
        let handle = client.shared.lease("db", None).await.unwrap();
        perform_object_store_operation(handle, "s", Operation::Add(json!("b")))
            .await
            .unwrap();

        let handle = client.shared.lease("db", None).await.unwrap();
        let entries = perform_object_store_operation(handle, "s", Operation::GetAllEntries)
            .await
            .unwrap()
            .into_entries()
            .unwrap();
        assert_eq!(
            entries,
            vec![(Key::Int(1), json!("a")), (Key::Int(2), json!("b"))]
        );
    }
}
