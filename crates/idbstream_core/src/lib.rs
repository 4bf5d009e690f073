//! # idbstream core
//!
//! Reactive streams over a versioned, transactional key-value engine.
//!
//! Application code opens a connection stream, resolves an object store on
//! it, and pipes the resulting store stream through CRUD and metadata
//! primitives:
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use idbstream_core::{Client, ConnectionStreamExt, StoreStreamExt};
//! use idbstream_engine::{MemoryEngine, StoreParameters};
//!
//! let client = Client::new(MemoryEngine::new());
//! let notes = client
//!     .connect("app", None)
//!     .object_store("notes", StoreParameters::auto_increment());
//!
//! let mut keys = notes.clone().keys();
//! notes.clone().add_item("first note").next().await;
//! assert_eq!(keys.next().await, Some(Ok(vec![1.into()])));
//! ```
//!
//! ## Architecture
//!
//! - [`ChangeBus`] carries payload-free change and deletion signals
//! - [`Client::connect`] leases shared physical connections from an arena
//! - [`ConnectionStreamExt::object_store`] resolves or creates a store,
//!   upgrading the database at most once per missing store
//! - [`StoreStreamExt`] performs each operation on its own short-lived
//!   lease and transaction, publishing after commit
//! - reads and metadata queries re-run on matching bus events and end when
//!   the database is deleted
//!
//! Only connection and deletion failures surface to callers. A failed
//! store operation ends its attempt silently (logged at debug level); use
//! [`StoreHandle::execute`] to observe the tagged [`OperationFailure`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod client;
mod config;
mod connection;
mod crud;
mod delete;
mod error;
mod guard;
mod metadata;
mod object_store;
mod operation;
mod operators;
mod reactive;
mod request;
mod share;
mod upgrade;

pub use bus::{ChangeBus, ChangeEvent, ChangeKind, Channel};
pub use client::Client;
pub use config::Config;
pub use connection::{ConnectionStream, DatabaseHandle};
pub use crud::{MutationStream, QueryStream, StoreStreamExt};
pub use error::{
    ConnectionError, CoreError, CoreResult, DeletionError, FailureReason, OperationFailure,
    OperationKind, RequestStateError,
};
pub use guard::{filter_if_store_does_not_exist, filter_stream_if_store_does_not_exist};
pub use metadata::Entry;
pub use object_store::{ConnectionStreamExt, StoreHandle, StoreStream};
pub use operation::{perform_object_store_operation, Operation, Outcome};
pub use operators::{SwitchMap, SwitchMapExt};
pub use request::{PendingRequest, RequestState};
pub use share::ReplayShared;

pub use idbstream_engine::{Key, StoreParameters, Value};
