//! # idbstream engine
//!
//! The host storage-engine contract for idbstream.
//!
//! This crate describes the lowest layer the reactive primitives talk to: a
//! versioned, transactional key-value engine hosting named databases, each
//! holding named object stores. It mirrors the browser's embedded
//! object-store engine closely enough that an adapter over the real thing
//! only has to translate callbacks into futures.
//!
//! ## Design Principles
//!
//! - Every request is asynchronous and returns an [`EngineFuture`]
//! - Schema edits are only legal inside an upgrade callback
//! - A connection's schema never changes; upgrades open a new connection
//! - Other connections are notified before an upgrade or deletion and can
//!   close themselves to let it proceed
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - A complete in-process engine for tests and hosts
//!   without a native engine
//!
//! ## Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use idbstream_engine::{Engine, Key, MemoryEngine, OpenRequest, StoreParameters, TransactionMode};
//!
//! let engine = MemoryEngine::new();
//! let conn = block_on(engine.open(OpenRequest::new("app").on_upgrade(|schema| {
//!     schema.create_object_store("kv", StoreParameters::new())
//! })))
//! .unwrap();
//!
//! let mut txn = conn.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
//! block_on(txn.put("kv", Some(Key::from("greeting")), "hello".into())).unwrap();
//! block_on(txn.commit()).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;

pub use engine::{
    Connection, ConnectionId, DatabaseInfo, Engine, EngineFuture, OpenRequest, SchemaEditor,
    StoreParameters, Transaction, TransactionMode, UpgradeHandler, VersionChangeHandler,
};
pub use error::{EngineError, EngineResult};
pub use key::{Key, Value};
pub use memory::MemoryEngine;
