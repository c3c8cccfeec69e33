//! chatrelay store - embedded JSON document store with live change feeds.
//!
//! Tables hold schemaless JSON objects keyed by a string `id`. Any filtered
//! query can be opened as a [`ChangeFeed`], an ordered stream of
//! before/after pairs, optionally starting with the current matching rows.

pub mod config;
pub mod error;
pub mod feed;
pub mod query;
pub mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use feed::{Change, ChangeFeed};
pub use query::{Direction, FieldFilter, OrderBy, Query};
pub use store::{SharedStore, Store, ID_FIELD};
