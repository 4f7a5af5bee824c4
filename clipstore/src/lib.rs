//! Clip Store - storage and search engine for clipboard history
//!
//! SQLite (WAL, pooled connections) holds the clips, a key/value stats table and an
//! FTS5 shadow index kept in sync by triggers. On top of it sit a tiered search query
//! builder, a retention/compaction engine and an async facade, [`ClipStore`].

pub mod config;
pub mod database;
pub mod interface;
pub mod maintenance;
pub mod models;
pub mod schema;
mod search;
mod stats;
mod store;

pub use config::{RetentionPolicy, StoreConfig};
pub use interface::*;
pub use models::clip_types;
pub use store::{ClipStore, STREAM_PAGE_SIZE};
