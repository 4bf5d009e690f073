//! Re-query pipelines driven by the change bus.
//!
//! Reads and metadata queries share one shape: run the query once on
//! subscription, run it again on every matching change event, and emit a
//! terminal value when the database is deleted. A newer trigger drops the
//! query in flight.

use crate::bus::{ChangeBus, ChangeEvent, ChangeKind};
use crate::error::{ConnectionError, OperationFailure};
use crate::object_store::StoreHandle;
use crate::operators::SwitchMapExt;
use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{future, stream, FutureExt, Stream, StreamExt};
use idbstream_engine::Key;
use std::sync::Arc;

/// Why a query should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// Initial run, or a matching change.
    Refresh,
    /// The database was deleted; emit the terminal value and stop.
    Deleted,
}

/// Which change events concern a pipeline.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub(crate) database: String,
    pub(crate) store: String,
    pub(crate) key: Option<Key>,
}

impl Scope {
    pub(crate) fn store(store: &StoreHandle) -> Self {
        Self {
            database: store.database().to_string(),
            store: store.name().to_string(),
            key: None,
        }
    }

    pub(crate) fn key(store: &StoreHandle, key: Key) -> Self {
        Self {
            key: Some(key),
            ..Self::store(store)
        }
    }

    /// Store-level events (no key) match every key scope.
    fn matches(&self, event: &ChangeEvent) -> bool {
        match (&self.key, &event.key) {
            (Some(key), Some(_)) => event.concerns_key(&self.database, &self.store, key),
            _ => event.concerns(&self.database, &self.store),
        }
    }
}

enum Signal {
    Deleted(Option<String>),
    Changed(Option<ChangeEvent>),
}

/// Builds the trigger stream for `scope`.
///
/// Subscriptions are taken immediately, so a change published after this
/// call returns is never missed.
pub(crate) fn triggers(bus: &ChangeBus, scope: Scope, kind: ChangeKind) -> BoxStream<'static, Trigger> {
    let mut changes = bus.changes(kind);
    let mut deleted = bus.database_deleted();

    stream! {
        yield Trigger::Refresh;
        loop {
            let signal = futures::select_biased! {
                name = deleted.next() => Signal::Deleted(name),
                event = changes.next() => Signal::Changed(event),
            };
            match signal {
                Signal::Deleted(Some(name)) if name == scope.database => {
                    yield Trigger::Deleted;
                    break;
                }
                Signal::Deleted(Some(_)) => {}
                Signal::Changed(Some(event)) if scope.matches(&event) => yield Trigger::Refresh,
                Signal::Changed(Some(_)) => {}
                Signal::Deleted(None) | Signal::Changed(None) => break,
            }
        }
    }
    .boxed()
}

/// Query run on each refresh. `Ok(None)` means nothing to emit.
pub(crate) type Query<T> =
    Arc<dyn Fn(StoreHandle) -> BoxFuture<'static, Result<Option<T>, OperationFailure>> + Send + Sync>;

/// Runs `query` for every store handle, re-running it whenever a `kind`
/// event matching the scope built by `scope` is published.
///
/// Operation failures are logged and dropped. Connection errors from the
/// upstream are forwarded. `terminal` builds the value emitted when the
/// database is deleted, after which the per-store pipeline ends.
pub(crate) fn reactive<S, T>(
    stores: S,
    kind: ChangeKind,
    scope: impl Fn(&StoreHandle) -> Scope + Send + Sync + 'static,
    terminal: fn() -> T,
    query: Query<T>,
) -> BoxStream<'static, Result<T, ConnectionError>>
where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Send + 'static,
    T: Send + 'static,
{
    let scope = Arc::new(scope);
    stores
        .switch_map(move |result| match result {
            Ok(store) => {
                let triggers = triggers(&store.shared.bus, (*scope)(&store), kind);
                let query = Arc::clone(&query);
                triggers
                    .switch_map(move |trigger| match trigger {
                        Trigger::Refresh => run(&query, store.clone()),
                        Trigger::Deleted => stream::once(future::ready(Ok(terminal()))).boxed(),
                    })
                    .boxed()
            }
            Err(error) => stream::once(future::ready(Err(error))).boxed(),
        })
        .boxed()
}

fn run<T: Send + 'static>(
    query: &Query<T>,
    store: StoreHandle,
) -> BoxStream<'static, Result<T, ConnectionError>> {
    (**query)(store)
        .into_stream()
        .filter_map(|result| {
            future::ready(match result {
                Ok(Some(value)) => Some(Ok(value)),
                Ok(None) => None,
                Err(failure) => {
                    tracing::debug!(error = %failure, "operation failed");
                    None
                }
            })
        })
        .boxed()
}

/// Maps a store-stream item through a mutation, forwarding connection
/// errors and dropping failed or skipped attempts.
pub(crate) fn mutation<S>(
    stores: S,
    perform: impl Fn(StoreHandle) -> BoxFuture<'static, Option<StoreHandle>> + Send + Sync + 'static,
) -> BoxStream<'static, Result<StoreHandle, ConnectionError>>
where
    S: Stream<Item = Result<StoreHandle, ConnectionError>> + Send + 'static,
{
    let perform = Arc::new(perform);
    stores
        .filter_map(move |result| {
            let perform = Arc::clone(&perform);
            async move {
                match result {
                    Ok(store) => (*perform)(store).await.map(Ok),
                    Err(error) => Some(Err(error)),
                }
            }
        })
        .boxed()
}
