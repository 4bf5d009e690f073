//! Existence guard.

use crate::connection::DatabaseHandle;
use futures::{future, Stream, StreamExt};

/// Passes `handle` through if `store` exists in its schema.
///
/// Otherwise the handle is closed and dropped. A missing store is not an
/// error; the operation that asked simply does not happen.
pub fn filter_if_store_does_not_exist(handle: DatabaseHandle, store: &str) -> Option<DatabaseHandle> {
    if handle.contains_store(store) {
        return Some(handle);
    }
    tracing::trace!(database = handle.name(), store, "store absent, operation dropped");
    handle.close();
    None
}

/// Stream form of [`filter_if_store_does_not_exist`].
pub fn filter_stream_if_store_does_not_exist<S>(
    handles: S,
    store: impl Into<String>,
) -> impl Stream<Item = DatabaseHandle> + Send
where
    S: Stream<Item = DatabaseHandle> + Send,
{
    let store = store.into();
    handles.filter_map(move |handle| future::ready(filter_if_store_does_not_exist(handle, &store)))
}
