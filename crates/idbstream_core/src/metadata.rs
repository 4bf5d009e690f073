//! Metadata primitives: keys, values and entries.
//!
//! Each query re-runs in full on any change to its store and ends with an
//! empty vector when the database is deleted.

use crate::bus::ChangeKind;
use crate::crud::QueryStream;
use crate::error::{ConnectionError, OperationFailure};
use crate::object_store::StoreHandle;
use crate::operation::{Operation, Outcome};
use crate::reactive::{reactive, Query, Scope};
use futures::{FutureExt, Stream};
use idbstream_engine::{Key, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One key-value pair of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Key.
    pub key: Key,
    /// Value stored under the key.
    pub value: Value,
}

impl From<(Key, Value)> for Entry {
    fn from((key, value): (Key, Value)) -> Self {
        Self { key, value }
    }
}

pub(crate) fn keys<S>(stores: S) -> QueryStream<Vec<Key>>
where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Send + 'static,
{
    let query: Query<Vec<Key>> = Arc::new(|store: StoreHandle| read_keys(store).boxed());
    reactive(stores, ChangeKind::Key, Scope::store, Vec::new, query)
}

pub(crate) fn values<S>(stores: S) -> QueryStream<Vec<Value>>
where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Send + 'static,
{
    let query: Query<Vec<Value>> = Arc::new(|store: StoreHandle| read_values(store).boxed());
    reactive(stores, ChangeKind::Value, Scope::store, Vec::new, query)
}

pub(crate) fn entries<S>(stores: S) -> QueryStream<Vec<Entry>>
where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Send + 'static,
{
    let query: Query<Vec<Entry>> =
        Arc::new(|store: StoreHandle| read_entries(store).boxed());
    reactive(stores, ChangeKind::Value, Scope::store, Vec::new, query)
}

async fn read_keys(store: StoreHandle) -> Result<Option<Vec<Key>>, OperationFailure> {
    let outcome = store.execute(Operation::GetAllKeys).await?;
    Ok(outcome.and_then(Outcome::into_keys))
}

async fn read_values(store: StoreHandle) -> Result<Option<Vec<Value>>, OperationFailure> {
    let outcome = store.execute(Operation::GetAll).await?;
    Ok(outcome.and_then(Outcome::into_values))
}

async fn read_entries(store: StoreHandle) -> Result<Option<Vec<Entry>>, OperationFailure> {
    if store.shared.config.atomic_entries {
        let outcome = store.execute(Operation::GetAllEntries).await?;
        return Ok(outcome
            .and_then(Outcome::into_entries)
            .map(|pairs| pairs.into_iter().map(Entry::from).collect()));
    }

    // Two independent requests; a write landing between them can pair a key
    // with the wrong value.
    let keys = store
        .execute(Operation::GetAllKeys)
        .await?
        .and_then(Outcome::into_keys);
    let values = store
        .execute(Operation::GetAll)
        .await?
        .and_then(Outcome::into_values);
    Ok(keys.zip(values).map(|(keys, values)| {
        keys.into_iter()
            .zip(values)
            .map(Entry::from)
            .collect()
    }))
}
