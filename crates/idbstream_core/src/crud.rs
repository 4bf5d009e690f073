//! CRUD primitives over store streams.
//!
//! Mutations lease a connection, perform one request, and publish change
//! events once it has committed. Reads re-run whenever a matching change is
//! published and end with `None` when the database is deleted.

use crate::bus::{ChangeEvent, ChangeKind};
use crate::error::{ConnectionError, FailureReason, OperationFailure, OperationKind};
use crate::metadata::{self, Entry};
use crate::object_store::StoreHandle;
use crate::operation::{Operation, Outcome};
use crate::reactive::{mutation, reactive, Query, Scope};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream};
use idbstream_engine::{Key, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Stream of store handles emitted after a mutation committed.
pub type MutationStream = BoxStream<'static, Result<StoreHandle, ConnectionError>>;

/// Reactive stream of query results.
pub type QueryStream<T> = BoxStream<'static, Result<T, ConnectionError>>;

/// CRUD and metadata primitives on streams of store handles.
///
/// Implemented for every stream of `Result<StoreHandle, ConnectionError>`,
/// including [`StoreStream`](crate::StoreStream).
pub trait StoreStreamExt:
    Stream<Item = Result<StoreHandle, ConnectionError>> + Sized + Send + 'static
{
    /// Adds `value` under a generated key.
    ///
    /// Only meaningful on auto-incrementing stores; elsewhere the request
    /// fails and the stream emits nothing for that store. Publishes
    /// store-level key and value changes.
    fn add_item<V: Serialize>(self, value: V) -> MutationStream {
        let value = encode(&value);
        mutation(self, move |store| {
            let operation = value.clone().map(Operation::Add);
            write(store, operation, OperationKind::Add, |store, _| {
                publish(store, ChangeKind::Key, None);
                publish(store, ChangeKind::Value, None);
            })
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Publishes a value change for `key`.
    fn set_item<V: Serialize>(self, key: impl Into<Key>, value: V) -> MutationStream {
        let key = key.into();
        let value = encode(&value);
        mutation(self, move |store| {
            let operation = value.clone().map(|value| Operation::Put(key.clone(), value));
            let key = key.clone();
            write(store, operation, OperationKind::Put, move |store, _| {
                publish(store, ChangeKind::Value, Some(key));
            })
        })
    }

    /// Removes the value under `key`.
    ///
    /// Publishes key and value changes for `key`.
    fn delete_item(self, key: impl Into<Key>) -> MutationStream {
        let key = key.into();
        mutation(self, move |store| {
            let operation = Ok(Operation::Delete(key.clone()));
            let key = key.clone();
            write(store, operation, OperationKind::Delete, move |store, _| {
                publish(store, ChangeKind::Key, Some(key.clone()));
                publish(store, ChangeKind::Value, Some(key));
            })
        })
    }

    /// Removes every value in the store.
    ///
    /// Publishes store-level key and value changes.
    fn clear(self) -> MutationStream {
        mutation(self, |store| {
            write(store, Ok(Operation::Clear), OperationKind::Clear, |store, _| {
                publish(store, ChangeKind::Key, None);
                publish(store, ChangeKind::Value, None);
            })
        })
    }

    /// Reads the value under `key`, then again after every change to it
    /// or to the whole store.
    ///
    /// Emits `Ok(None)` while the key is absent and as the final item when
    /// the database is deleted. Values that do not decode into `T` are
    /// dropped.
    fn read<T>(self, key: impl Into<Key>) -> QueryStream<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.into();
        let scope_key = key.clone();
        let query: Query<Option<T>> =
            Arc::new(move |store: StoreHandle| read_value::<T>(store, key.clone()).boxed());
        reactive(
            self,
            ChangeKind::Value,
            move |store| Scope::key(store, scope_key.clone()),
            || None,
            query,
        )
    }

    /// Every key in the store, refreshed on every key change.
    fn keys(self) -> QueryStream<Vec<Key>> {
        metadata::keys(self)
    }

    /// Every value in the store, refreshed on every value change.
    fn values(self) -> QueryStream<Vec<Value>> {
        metadata::values(self)
    }

    /// Every entry in the store, refreshed on every value change.
    fn entries(self) -> QueryStream<Vec<Entry>> {
        metadata::entries(self)
    }
}

impl<S> StoreStreamExt for S where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Sized + Send + 'static
{
}

fn encode<V: Serialize>(value: &V) -> Result<Value, FailureReason> {
    serde_json::to_value(value).map_err(|error| FailureReason::Encode(error.to_string()))
}

async fn read_value<T: DeserializeOwned>(
    store: StoreHandle,
    key: Key,
) -> Result<Option<Option<T>>, OperationFailure> {
    let outcome = store.execute(Operation::Get(key)).await?;
    match outcome.and_then(Outcome::into_value) {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(value)) => decode(&store, value).map(|value| Some(Some(value))),
    }
}

fn decode<T: DeserializeOwned>(store: &StoreHandle, value: Value) -> Result<T, OperationFailure> {
    serde_json::from_value(value).map_err(|error| OperationFailure {
        database: store.database().to_string(),
        store: store.name().to_string(),
        operation: OperationKind::Get,
        reason: FailureReason::Decode(error.to_string()),
    })
}

fn publish(store: &StoreHandle, kind: ChangeKind, key: Option<Key>) {
    let event = match kind {
        ChangeKind::Key => ChangeEvent::key(store.database(), store.name(), key),
        ChangeKind::Value => ChangeEvent::value(store.database(), store.name(), key),
    };
    store.shared.bus.publish(event);
}

/// Performs a write and runs `after_commit` if it committed.
fn write(
    store: StoreHandle,
    operation: Result<Operation, FailureReason>,
    kind: OperationKind,
    after_commit: impl FnOnce(&StoreHandle, Outcome) + Send + 'static,
) -> BoxFuture<'static, Option<StoreHandle>> {
    async move {
        let result = match operation {
            Ok(operation) => store.execute(operation).await,
            Err(reason) => Err(OperationFailure {
                database: store.database().to_string(),
                store: store.name().to_string(),
                operation: kind,
                reason,
            }),
        };
        match result {
            Ok(Some(outcome)) => {
                after_commit(&store, outcome);
                Some(store)
            }
            Ok(None) => None,
            Err(failure) => {
                tracing::debug!(error = %failure, "operation failed");
                None
            }
        }
    }
    .boxed()
}
