//! Core types and trait definitions for the regional land-information ETL
//! engine.
//!
//! This crate is deliberately free of database and runtime dependencies.
//! Every other crate depends on it; storage backends implement its traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// ETLs run serially on one task, so the futures need not be `Send`.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod mail;
pub mod record;
pub mod store;
pub mod values;

pub use error::{Error, Result};
pub use record::{Record, Value};
