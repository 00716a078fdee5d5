//! The `GisStore` trait, the contract surface over the geodatabase layer.
//!
//! Storage backends (e.g. `rlid-store-sqlite`) implement the primitives here.
//! Everything richer (bulk attribute updates, feature-set operations,
//! scoped views) is built on top of them in `rlid-gis`, so every backend
//! gets it for free.
//!
//! Paths are value identifiers: a file-system location or a qualified
//! database table name. Selection predicates are plain SQL-style `where`
//! strings handed through to the backend.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
  Result,
  dataset::{DatasetSchema, Field},
  record::Record,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`GisStore::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
  /// Attribute fields to return; `None` returns every field.
  pub fields:   Option<Vec<String>>,
  pub where_:   Option<String>,
  /// Field names to sort by, ascending.
  pub order_by: Vec<String>,
  /// Whether to load geometry.
  pub shape:    bool,
}

impl ReadQuery {
  /// Every field plus geometry.
  pub fn all() -> Self { Self { shape: true, ..Self::default() } }

  pub fn fields<S: AsRef<str>>(fields: &[S]) -> Self {
    Self { fields: Some(fields.iter().map(|f| f.as_ref().to_owned()).collect()), ..Self::default() }
  }

  pub fn filter(mut self, where_: Option<&str>) -> Self {
    self.where_ = where_.map(str::to_owned);
    self
  }

  pub fn with_shape(mut self) -> Self {
    self.shape = true;
    self
  }

  pub fn order_by<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
    self.order_by = fields.iter().map(|f| f.as_ref().to_owned()).collect();
    self
  }
}

// ─── Counts ──────────────────────────────────────────────────────────────────

/// Per-action row counts of a load or differential update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCounts {
  pub inserted:  usize,
  pub altered:   usize,
  pub deleted:   usize,
  pub unchanged: usize,
}

impl UpdateCounts {
  /// All rows an update touched or inspected.
  pub fn total(&self) -> usize { self.inserted + self.altered + self.deleted + self.unchanged }

  /// Rows changed by the update. Truncate-and-load deletes are bookkeeping
  /// and do not count.
  pub fn updated(&self, truncate_load: bool) -> usize {
    if truncate_load {
      self.inserted + self.altered
    } else {
      self.inserted + self.altered + self.deleted
    }
  }

  pub fn has_changes(&self) -> bool { self.inserted + self.altered + self.deleted > 0 }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a geodatabase backend.
///
/// Failures are [`crate::Error::Gis`] (fatal to the current ETL) or
/// [`crate::Error::GisTransient`] (worth retrying).
pub trait GisStore {
  // ── Datasets ──────────────────────────────────────────────────────────

  async fn dataset_exists(&self, path: &str) -> Result<bool>;

  /// Schema of the dataset at `path`.
  async fn describe(&self, path: &str) -> Result<DatasetSchema>;

  /// Create an empty dataset. Fails if `path` already exists.
  async fn create_dataset(&self, path: &str, schema: &DatasetSchema) -> Result<()>;

  /// Drop a dataset or view. Missing datasets are not an error.
  async fn delete_dataset(&self, path: &str) -> Result<()>;

  /// Create a read-only view of `source` filtered by `where_` and
  /// optionally restricted to `fields`.
  async fn create_view(
    &self,
    view_path: &str,
    source: &str,
    where_: Option<&str>,
    fields: Option<&[String]>,
  ) -> Result<()>;

  // ── Schema ────────────────────────────────────────────────────────────

  async fn add_field(&self, path: &str, field: &Field) -> Result<()>;

  async fn delete_field(&self, path: &str, name: &str) -> Result<()>;

  async fn rename_field(&self, path: &str, old: &str, new: &str) -> Result<()>;

  /// Index `fields` (the geometry column may be named to get a spatial
  /// index).
  async fn add_index(&self, path: &str, fields: &[String], unique: bool) -> Result<()>;

  // ── Cursors ───────────────────────────────────────────────────────────

  async fn read(&self, path: &str, query: &ReadQuery) -> Result<Vec<Record>>;

  async fn count(&self, path: &str, where_: Option<&str>) -> Result<usize>;

  /// Insert records, ignoring their `oid`s. Attributes the dataset lacks
  /// are dropped. Returns the number inserted.
  async fn insert(&self, path: &str, records: Vec<Record>) -> Result<usize>;

  /// Overwrite the attributes present on each record (and the shape when
  /// set), matching rows by `oid`. Returns the number updated.
  async fn update(&self, path: &str, records: Vec<Record>) -> Result<usize>;

  /// Delete rows matching `where_`; every row when `None`.
  async fn delete_where(&self, path: &str, where_: Option<&str>) -> Result<usize>;

  async fn delete_oids(&self, path: &str, oids: &[i64]) -> Result<usize>;

  // ── Domains ───────────────────────────────────────────────────────────

  /// Code → description pairs of a coded-value domain.
  async fn domain(&self, workspace: &str, name: &str) -> Result<BTreeMap<String, String>>;

  // ── Edit sessions ─────────────────────────────────────────────────────

  async fn begin_edit(&self, workspace: &str) -> Result<()>;

  async fn commit_edit(&self, workspace: &str) -> Result<()>;

  async fn abort_edit(&self, workspace: &str) -> Result<()>;

  // ── Embedded metadata ─────────────────────────────────────────────────

  async fn export_metadata(&self, path: &str) -> Result<Option<String>>;

  async fn import_metadata(&self, path: &str, xml: &str) -> Result<()>;

  /// Upgrade the dataset's embedded metadata to the current standard.
  async fn upgrade_metadata(&self, path: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncate_load_excludes_deletes_from_updated() {
    let c = UpdateCounts { inserted: 10, altered: 0, deleted: 8, unchanged: 0 };
    assert_eq!(c.updated(true), 10);
    assert_eq!(c.updated(false), 18);
    assert_eq!(c.total(), 18);
  }
}
