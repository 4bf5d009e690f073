//! Change event bus.
//!
//! The bus is how independent pipelines learn that a store changed without
//! sharing anything but a database name, a store name and optionally a key.
//! Mutation primitives publish after their transaction commits; read and
//! metadata primitives subscribe and re-query.
//!
//! # Usage
//!
//! ```rust,ignore
//! use idbstream_core::{ChangeBus, ChangeEvent};
//!
//! let bus = ChangeBus::new();
//! let mut values = bus.value_changed();
//!
//! bus.publish(ChangeEvent::value("db", "store", Some("k".into())));
//! let event = values.next().await;
//! ```

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use idbstream_engine::Key;
use parking_lot::Mutex;

/// Which channel a change event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A key was created or removed.
    Key,
    /// A value was created, replaced or removed.
    Value,
}

/// A payload-free notification that a store changed.
///
/// Change events carry identity only; consumers re-fetch whatever they
/// display. A missing key means the change is store-wide or the key is not
/// known to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    /// Channel of the event.
    pub kind: ChangeKind,
    /// Database name.
    pub database: String,
    /// Store name.
    pub store: String,
    /// Affected key, if known.
    pub key: Option<Key>,
}

impl ChangeEvent {
    /// Creates a key-changed event.
    pub fn key(database: impl Into<String>, store: impl Into<String>, key: Option<Key>) -> Self {
        Self {
            kind: ChangeKind::Key,
            database: database.into(),
            store: store.into(),
            key,
        }
    }

    /// Creates a value-changed event.
    pub fn value(database: impl Into<String>, store: impl Into<String>, key: Option<Key>) -> Self {
        Self {
            kind: ChangeKind::Value,
            database: database.into(),
            store: store.into(),
            key,
        }
    }

    /// Returns true if this event concerns `store` in `database`.
    #[must_use]
    pub fn concerns(&self, database: &str, store: &str) -> bool {
        self.database == database && self.store == store
    }

    /// Returns true if this event concerns `key` of `store` in `database`.
    #[must_use]
    pub fn concerns_key(&self, database: &str, store: &str, key: &Key) -> bool {
        self.concerns(database, store) && self.key.as_ref() == Some(key)
    }
}

/// A multicast channel, optionally replaying its last message to late
/// subscribers.
///
/// Publishing pushes into every subscriber's unbounded queue before
/// returning, so a subscriber registered before a publish always observes
/// it. Subscribers whose receiver was dropped are pruned on publish.
#[derive(Debug)]
pub struct Channel<T> {
    subscribers: Mutex<Vec<UnboundedSender<T>>>,
    last: Mutex<Option<T>>,
    replay: bool,
}

impl<T: Clone> Channel<T> {
    /// Creates a channel that replays its last message.
    pub fn replaying() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            last: Mutex::new(None),
            replay: true,
        }
    }

    /// Creates a channel without replay.
    pub fn transient() -> Self {
        Self {
            replay: false,
            ..Self::replaying()
        }
    }

    /// Subscribes to future messages (and the last one, if replaying).
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded();
        let mut subscribers = self.subscribers.lock();
        if let Some(last) = self.last.lock().clone() {
            let _ = tx.unbounded_send(last);
        }
        subscribers.push(tx);
        rx
    }

    /// Sends a message to every subscriber.
    pub fn publish(&self, message: T) {
        let mut subscribers = self.subscribers.lock();
        if self.replay {
            *self.last.lock() = Some(message.clone());
        }
        subscribers.retain(|tx| tx.unbounded_send(message.clone()).is_ok());
    }

    /// Returns the message a new subscriber would receive first.
    pub fn latest(&self) -> Option<T> {
        self.last.lock().clone()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// The process-wide invalidation bus.
///
/// One bus is shared by every primitive of a [`Client`](crate::Client).
/// Clients built with [`Client::with_bus`](crate::Client::with_bus) can share
/// a bus; tests isolate themselves with separate buses or distinct database
/// names.
#[derive(Debug)]
pub struct ChangeBus {
    key_changed: Channel<ChangeEvent>,
    value_changed: Channel<ChangeEvent>,
    database_deleted: Channel<String>,
}

impl ChangeBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            key_changed: Channel::replaying(),
            value_changed: Channel::replaying(),
            database_deleted: Channel::transient(),
        }
    }

    /// Publishes a change event on the channel matching its kind.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::trace!(kind = ?event.kind, database = %event.database, store = %event.store, key = ?event.key, "change published");
        match event.kind {
            ChangeKind::Key => self.key_changed.publish(event),
            ChangeKind::Value => self.value_changed.publish(event),
        }
    }

    /// Publishes a database deletion.
    pub fn publish_deleted(&self, database: impl Into<String>) {
        let database = database.into();
        tracing::trace!(%database, "deletion published");
        self.database_deleted.publish(database);
    }

    /// Subscribes to key changes, starting with the last one published.
    pub fn key_changed(&self) -> UnboundedReceiver<ChangeEvent> {
        self.key_changed.subscribe()
    }

    /// Subscribes to value changes, starting with the last one published.
    pub fn value_changed(&self) -> UnboundedReceiver<ChangeEvent> {
        self.value_changed.subscribe()
    }

    /// Subscribes to changes of one kind.
    pub fn changes(&self, kind: ChangeKind) -> UnboundedReceiver<ChangeEvent> {
        match kind {
            ChangeKind::Key => self.key_changed(),
            ChangeKind::Value => self.value_changed(),
        }
    }

    /// Subscribes to database deletions published from now on.
    pub fn database_deleted(&self) -> UnboundedReceiver<String> {
        self.database_deleted.subscribe()
    }

    /// Returns the key-changed channel.
    pub fn key_channel(&self) -> &Channel<ChangeEvent> {
        &self.key_changed
    }

    /// Returns the value-changed channel.
    pub fn value_channel(&self) -> &Channel<ChangeEvent> {
        &self.value_changed
    }

    /// Returns the deletion channel.
    pub fn deletion_channel(&self) -> &Channel<String> {
        &self.database_deleted
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
