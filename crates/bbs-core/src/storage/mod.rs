//! Storage layer
//!
//! SQLite schema and storage errors. The board tables, the outbox and the
//! sync watermark share a single database file.

pub mod error;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
