//! Error types for the ETL runtime.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] rlid_core::Error),

  #[error("store error: {0}")]
  Store(#[from] rlid_store_sqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("xml error: {0}")]
  Xml(String),

  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("no pipeline named {0:?}")]
  UnknownPipeline(String),

  /// Some datasets of a warehouse batch failed; the rest were updated.
  #[error("{} of {total} dataset updates failed: {}", failed.len(), failed.join(", "))]
  DatasetUpdates { failed: Vec<String>, total: usize },

  #[error("share {share:?}: {message}")]
  Share { share: String, message: String },

  /// The share was not connected when we tried to release it.
  #[error("share {0:?} is already released")]
  AlreadyReleased(String),

  /// A pipeline failed; `history_id` is its open history row, if any.
  #[error("pipeline {name:?} failed: {source}")]
  Pipeline {
    name:       String,
    history_id: Option<Uuid>,
    #[source]
    source:     Box<Error>,
  },
}

impl Error {
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Core(e) => e.is_transient(),
      Self::Store(e) => e.is_transient(),
      Self::Pipeline { source, .. } => source.is_transient(),
      _ => false,
    }
  }

  /// A configuration problem that is not a deserialization failure.
  pub fn config(message: impl Into<String>) -> Self { Self::Core(rlid_core::Error::Config(message.into())) }
}

impl From<quick_xml::Error> for Error {
  fn from(e: quick_xml::Error) -> Self { Self::Xml(e.to_string()) }
}

impl From<walkdir::Error> for Error {
  fn from(e: walkdir::Error) -> Self { Self::Io(e.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
