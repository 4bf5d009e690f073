//! # idbstream testkit
//!
//! Test utilities for idbstream.
//!
//! This crate provides:
//! - Client fixtures over an in-memory engine with unique database names
//! - Stream assertions with timeouts
//! - Property-based test generators using proptest
//! - A tracing bootstrap honoring `RUST_LOG`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idbstream_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reads_what_was_written() {
//!     let fx = TestClient::new();
//!     let store = fx.store("kv", StoreParameters::new());
//!     let mut read = store.clone().read::<String>("k");
//!     assert_eq!(expect_next(&mut read).await, Ok(None));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod streams;
pub mod tracing_init;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::streams::*;
    pub use crate::tracing_init::*;
    pub use futures::StreamExt;
    pub use idbstream_core::{
        ChangeBus, Client, Config, ConnectionError, ConnectionStreamExt, DeletionError, Entry,
        Operation, Outcome, StoreStreamExt,
    };
    pub use idbstream_engine::{Key, MemoryEngine, StoreParameters, Value};
}

pub use fixtures::*;
pub use generators::*;
pub use streams::*;
pub use tracing_init::*;
