//! Keyed cursor helpers and the differential update shared by every
//! load/update path in the engine.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use rlid_core::{
  dataset::DatasetSchema,
  record::Record,
  store::{GisStore, ReadQuery, UpdateCounts},
};

use crate::Result;

/// Coordinate tolerance when comparing stored geometries.
pub const GEOMETRY_TOLERANCE: f64 = 1e-6;

pub type Key = Vec<String>;

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Read `path` into a map keyed by `key_fields`. Later duplicates of a key
/// are dropped with a warning.
pub async fn read_keyed<S: GisStore>(
  store: &S,
  path: &str,
  key_fields: &[String],
  query: &ReadQuery,
) -> Result<HashMap<Key, Record>> {
  let records = store.read(path, query).await?;
  Ok(key_records(path, records, key_fields))
}

fn key_records(path: &str, records: Vec<Record>, key_fields: &[String]) -> HashMap<Key, Record> {
  let mut out = HashMap::with_capacity(records.len());
  for record in records {
    let key = record.key(key_fields);
    if out.contains_key(&key) {
      warn!(dataset = path, ?key, "duplicate key; keeping the first row");
      continue;
    }
    out.insert(key, record);
  }
  out
}

// ─── Keyed writes ────────────────────────────────────────────────────────────

/// Overwrite the rows of `path` whose key matches one of `records`. Rows
/// without a match are left alone; records without a row are ignored.
pub async fn update_rows_by_key<S: GisStore>(
  store: &S,
  path: &str,
  key_fields: &[String],
  records: Vec<Record>,
) -> Result<usize> {
  let existing = read_keyed(store, path, key_fields, &ReadQuery::fields(key_fields)).await?;
  let updates: Vec<Record> = records
    .into_iter()
    .filter_map(|mut r| {
      let oid = existing.get(&r.key(key_fields))?.oid;
      r.oid = oid;
      Some(r)
    })
    .collect();
  store.update(path, updates).await
}

/// Delete the rows of `path` whose key is in `keys`.
pub async fn delete_by_keys<S: GisStore>(
  store: &S,
  path: &str,
  key_fields: &[String],
  keys: &HashSet<Key>,
) -> Result<usize> {
  if keys.is_empty() {
    return Ok(0);
  }
  let oids: Vec<i64> = store
    .read(path, &ReadQuery::fields(key_fields))
    .await?
    .into_iter()
    .filter(|r| keys.contains(&r.key(key_fields)))
    .filter_map(|r| r.oid)
    .collect();
  store.delete_oids(path, &oids).await
}

// ─── Dataset copies ──────────────────────────────────────────────────────────

/// Create `path` with `schema` unless it already exists.
pub async fn ensure_dataset<S: GisStore>(store: &S, path: &str, schema: &DatasetSchema) -> Result<()> {
  if !store.dataset_exists(path).await? {
    store.create_dataset(path, schema).await?;
  }
  Ok(())
}

/// Materialise an independent copy of `source` (rows matching `where_`) at
/// `destination`, which must not exist yet.
pub async fn copy_dataset<S: GisStore>(
  store: &S,
  source: &str,
  destination: &str,
  where_: Option<&str>,
) -> Result<usize> {
  let schema = store.describe(source).await?;
  store.create_dataset(destination, &schema).await?;
  let rows = store.read(source, &ReadQuery::all().filter(where_)).await?;
  let n = store.insert(destination, rows).await?;
  debug!(source, destination, rows = n, "copied dataset");
  Ok(n)
}

/// Truncate `destination` and insert `records`. Deleted counts the rows that
/// were there before.
pub async fn load_records<S: GisStore>(
  store: &S,
  destination: &str,
  records: Vec<Record>,
) -> Result<UpdateCounts> {
  let deleted = store.delete_where(destination, None).await?;
  let inserted = store.insert(destination, records).await?;
  Ok(UpdateCounts { inserted, deleted, ..UpdateCounts::default() })
}

// ─── Differential update ─────────────────────────────────────────────────────

/// Bring `destination` in line with `source` keyed on `id_fields`.
///
/// Source values are coerced to the destination's field types before
/// comparison, and only attributes the source actually carries take part.
/// Unchanged rows are never written.
pub async fn update_from_records<S: GisStore>(
  store: &S,
  destination: &str,
  source: Vec<Record>,
  id_fields: &[String],
  delete_missing: bool,
) -> Result<UpdateCounts> {
  let schema = store.describe(destination).await?;
  let mut current = read_keyed(store, destination, id_fields, &ReadQuery::all()).await?;

  let mut counts = UpdateCounts::default();
  let mut inserts = Vec::new();
  let mut updates = Vec::new();
  let mut replaced = Vec::new();
  let mut seen = HashSet::new();

  for record in source {
    let record = conform(&schema, record);
    let key = record.key(id_fields);
    if !seen.insert(key.clone()) {
      warn!(dataset = destination, ?key, "duplicate source key; keeping the first row");
      continue;
    }
    match current.remove(&key) {
      None => inserts.push(record),
      Some(existing) => match changes(&schema, &existing, &record) {
        Some(Change::Patch(patch)) => updates.push(patch),
        Some(Change::Replace { oid, record }) => {
          replaced.extend(oid);
          inserts.push(Record { oid: None, ..record });
          counts.altered += 1;
        }
        None => counts.unchanged += 1,
      },
    }
  }

  store.delete_oids(destination, &replaced).await?;
  counts.inserted = store.insert(destination, inserts).await?.saturating_sub(replaced.len());
  counts.altered += store.update(destination, updates).await?;
  if delete_missing {
    let stale: Vec<i64> = current.values().filter_map(|r| r.oid).collect();
    counts.deleted = store.delete_oids(destination, &stale).await?;
  } else {
    counts.unchanged += current.len();
  }
  debug!(dataset = destination, ?counts, "differential update");
  Ok(counts)
}

/// Keep only attributes `schema` knows, coerced to their field types.
fn conform(schema: &DatasetSchema, record: Record) -> Record {
  let values = record
    .values
    .into_iter()
    .filter_map(|(name, value)| {
      let field = schema.field(&name)?;
      let value = value.coerce(field.kind);
      Some((name, value))
    })
    .collect();
  let shape = if schema.has_geometry() { record.shape } else { None };
  Record { oid: None, values, shape }
}

enum Change {
  /// Values (and possibly the shape) to write over the existing row.
  Patch(Record),
  /// The shape was cleared, which an in-place update cannot express.
  Replace { oid: Option<i64>, record: Record },
}

/// How to turn `existing` into `incoming`, or `None` if they agree.
fn changes(schema: &DatasetSchema, existing: &Record, incoming: &Record) -> Option<Change> {
  let mut patch = Record { oid: existing.oid, ..Record::new() };
  for (name, value) in &incoming.values {
    if existing.get(name) != value {
      patch.values.insert(name.clone(), value.clone());
    }
  }
  if schema.has_geometry() {
    match (&existing.shape, &incoming.shape) {
      (Some(a), Some(b)) if !a.approx_eq(b, GEOMETRY_TOLERANCE) => patch.shape = Some(b.clone()),
      (None, Some(b)) => patch.shape = Some(b.clone()),
      (Some(_), None) => {
        let mut record = existing.clone();
        record.values.extend(incoming.values.clone());
        record.shape = None;
        return Some(Change::Replace { oid: existing.oid, record });
      }
      _ => {}
    }
  }
  if patch.values.is_empty() && patch.shape.is_none() { None } else { Some(Change::Patch(patch)) }
}

#[cfg(test)]
mod tests {
  use rlid_core::{
    dataset::{Field, FieldType},
    geometry::GeometryType,
    record::Value,
  };

  use super::*;

  fn schema() -> DatasetSchema {
    DatasetSchema {
      fields:        vec![Field::new("id", FieldType::Long).id(), Field::text("name", 10)],
      geometry_type: GeometryType::None,
    }
  }

  #[test]
  fn coercion_hides_representation_differences() {
    let existing = Record { oid: Some(1), ..Record::new() }.with("id", 1_i64).with("name", "A");
    let incoming = conform(&schema(), Record::new().with("id", "1").with("name", "A").with("x", 5_i64));
    assert!(!incoming.values.contains_key("x"));
    assert!(changes(&schema(), &existing, &incoming).is_none());
  }

  #[test]
  fn patch_carries_only_changed_values() {
    let existing = Record { oid: Some(7), ..Record::new() }.with("id", 1_i64).with("name", "A");
    let incoming = Record::new().with("id", 1_i64).with("name", "B");
    let Some(Change::Patch(patch)) = changes(&schema(), &existing, &incoming) else {
      panic!("expected a patch");
    };
    assert_eq!(patch.oid, Some(7));
    assert_eq!(patch.values.len(), 1);
    assert_eq!(patch.get("name"), &Value::from("B"));
  }
}
