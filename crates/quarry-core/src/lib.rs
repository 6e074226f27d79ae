#![forbid(unsafe_code)]
//! quarry-core: the leaf crate every other quarry crate builds on.
//!
//! Holds hierarchical identifiers, the canonical error taxonomy, engine
//! configuration, schemas, the catalog lookup interface, node/slot
//! descriptors, and stable hashing for plan fingerprints.
//!
//! No async, no transport, no SQL execution here.

pub mod catalog;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod node;
pub mod prelude;
pub mod schema;

pub use error::{Error, ErrorKind, Result};

/// Engine version string recorded in run manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
