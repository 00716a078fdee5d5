//! Error type for `rlid-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rlid_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("dataset not found: {0:?}")]
  DatasetNotFound(String),

  #[error("dataset already exists: {0:?}")]
  DatasetExists(String),

  #[error("dataset {0:?} is a read-only view")]
  ReadOnlyView(String),

  #[error("dataset {path:?} has no field {field:?}")]
  UnknownField { path: String, field: String },

  #[error("cannot update a record without an object id in {0:?}")]
  MissingOid(String),

  #[error("domain {name:?} not found in workspace {workspace:?}")]
  DomainNotFound { workspace: String, name: String },

  #[error("edit session error: {0}")]
  EditSession(String),

  #[error("no metadata on dataset {0:?}")]
  NoMetadata(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Busy/locked databases and dropped connections clear up on their own.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
      Self::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
        matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      }
      _ => false,
    }
  }
}

impl From<Error> for rlid_core::Error {
  fn from(e: Error) -> Self {
    if e.is_transient() {
      return Self::GisTransient(e.to_string());
    }
    match e {
      Error::Core(inner) => inner,
      Error::Json(inner) => Self::Serialization(inner),
      Error::DomainNotFound { workspace, name } => Self::UnknownDomain { workspace, name },
      other => Self::Gis(other.to_string()),
    }
  }
}
