//! Error types for `rlid-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown dataset: {0:?}")]
  UnknownDataset(String),

  #[error("dataset {dataset:?} has no path tagged {tag:?}")]
  UnknownTag { dataset: String, tag: String },

  #[error("dataset {dataset:?} has no field {field:?}")]
  UnknownField { dataset: String, field: String },

  #[error("domain {name:?} not found in workspace {workspace:?}")]
  UnknownDomain { workspace: String, name: String },

  #[error("configuration error: {0}")]
  Config(String),

  /// Non-transient geoprocessing failure (schema, lock, constraint).
  #[error("gis error: {0}")]
  Gis(String),

  /// Transient I/O or connection failure; callers may retry.
  #[error("transient gis error: {0}")]
  GisTransient(String),

  #[error("invalid geometry: {0}")]
  InvalidGeometry(String),

  #[error("parse error: {0}")]
  Parse(String),

  #[error("{program} exited with {status}")]
  Subprocess { program: String, status: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether a retry has a chance of succeeding.
  pub fn is_transient(&self) -> bool { matches!(self, Self::GisTransient(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
