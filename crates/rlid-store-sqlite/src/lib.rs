//! SQLite backend for the land-information warehouse.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Each dataset path maps to its
//! own table; a registry table remembers schemas, views and embedded
//! metadata.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
