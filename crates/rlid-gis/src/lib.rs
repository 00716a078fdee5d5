//! Geoprocessing helpers layered over [`rlid_core::store::GisStore`].
//!
//! Backends only provide raw cursors and schema primitives. Everything here
//! (keyed updates, bulk attribute updates, feature-set operations, scoped
//! temporary artifacts, the closest-facility solver and the retry
//! combinator) is written once against the trait.
//!
//! All functions fail with [`rlid_core::Error`].

pub mod attributes;
pub mod cursor;
pub mod features;
pub mod network;
pub mod retry;
pub mod schema;
pub mod scoped;

pub use rlid_core::{Error, Result};
