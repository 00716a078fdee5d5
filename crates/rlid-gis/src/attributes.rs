//! Bulk attribute updates.
//!
//! Each function rewrites one field across the rows of a dataset (optionally
//! restricted by a `where` predicate) and reports how many rows changed.
//! New values are coerced to the field's type first, and rows whose value
//! would not change are never written.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;
use uuid::Uuid;

use rlid_core::{
  Error,
  dataset::{Field, FieldType},
  geometry::{Geometry, Point},
  record::{Record, Value},
  store::{GisStore, ReadQuery, UpdateCounts},
};

use crate::{Result, cursor::Key};

// ─── Shared driver ───────────────────────────────────────────────────────────

async fn target_field<S: GisStore>(store: &S, path: &str, field: &str) -> Result<Field> {
  store
    .describe(path)
    .await?
    .field(field)
    .cloned()
    .ok_or_else(|| Error::UnknownField { dataset: path.to_owned(), field: field.to_owned() })
}

/// Write `values` (oid-aligned with `records`) into `field` wherever they
/// differ from the current value.
async fn write_changes<S: GisStore>(
  store: &S,
  path: &str,
  field: &Field,
  records: &[Record],
  values: Vec<Value>,
) -> Result<UpdateCounts> {
  let mut counts = UpdateCounts::default();
  let mut patches = Vec::new();
  for (record, value) in records.iter().zip(values) {
    let value = value.coerce(field.kind);
    if record.get(&field.name) == &value {
      counts.unchanged += 1;
    } else {
      patches.push(Record { oid: record.oid, ..Record::new() }.with(&field.name, value));
    }
  }
  counts.altered = store.update(path, patches).await?;
  debug!(dataset = path, field = %field.name, ?counts, "attribute update");
  Ok(counts)
}

async fn update_with<S, F>(
  store: &S,
  path: &str,
  field: &str,
  where_: Option<&str>,
  shape: bool,
  mut compute: F,
) -> Result<UpdateCounts>
where
  S: GisStore,
  F: FnMut(&Record) -> Value,
{
  let field = target_field(store, path, field).await?;
  let mut query = ReadQuery::all().filter(where_);
  query.shape = shape;
  let records = store.read(path, &query).await?;
  let values = records.iter().map(&mut compute).collect();
  write_changes(store, path, &field, &records, values).await
}

// ─── By value, function, mapping ─────────────────────────────────────────────

/// Set `field` to a constant.
pub async fn update_by_value<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  value: Value,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  update_with(store, path, field, where_, false, |_| value.clone()).await
}

/// Set `field` to `func(args)`, where `args` are the values of
/// `arg_fields`, preceded by the field's own value when
/// `field_as_first_arg` is set.
pub async fn update_by_function<S, F>(
  store: &S,
  path: &str,
  field: &str,
  func: F,
  arg_fields: &[String],
  field_as_first_arg: bool,
  where_: Option<&str>,
) -> Result<UpdateCounts>
where
  S: GisStore,
  F: Fn(&[Value]) -> Value,
{
  update_with(store, path, field, where_, false, |r| {
    let mut args = Vec::with_capacity(arg_fields.len() + 1);
    if field_as_first_arg {
      args.push(r.get(field).clone());
    }
    args.extend(arg_fields.iter().map(|f| r.get(f).clone()));
    func(&args)
  })
  .await
}

/// Look up each row's `key_fields` in `mapping`; misses get `default`.
pub async fn update_by_mapping<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  mapping: &HashMap<Key, Value>,
  key_fields: &[String],
  default: Value,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  update_with(store, path, field, where_, false, |r| {
    mapping.get(&r.key(key_fields)).cloned().unwrap_or_else(|| default.clone())
  })
  .await
}

/// Join to `join_path` on `on` (`(this_field, join_field)` pairs) and copy
/// `join_field`. Unmatched rows get `Null`.
pub async fn update_by_joined_value<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  join_path: &str,
  join_field: &str,
  on: &[(String, String)],
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  let (ours, theirs): (Vec<String>, Vec<String>) = on.iter().cloned().unzip();
  let mut lookup: HashMap<Key, Value> = HashMap::new();
  for r in store.read(join_path, &ReadQuery::default()).await? {
    lookup.entry(r.key(&theirs)).or_insert_with(|| r.get(join_field).clone());
  }
  update_with(store, path, field, where_, false, |r| {
    lookup.get(&r.key(&ours)).cloned().unwrap_or_default()
  })
  .await
}

/// Translate the code in `code_field` through a coded-value domain.
pub async fn update_by_domain_code<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  code_field: &str,
  domain_name: &str,
  domain_workspace: &str,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  let domain = store.domain(domain_workspace, domain_name).await?;
  update_with(store, path, field, where_, false, |r| {
    let code = r.get(code_field);
    if code.is_null() {
      return Value::Null;
    }
    domain.get(&code.key_string()).map(|d| Value::from(d.as_str())).unwrap_or_default()
  })
  .await
}

// ─── Spatial ─────────────────────────────────────────────────────────────────

/// Polygons of `overlay_path` paired with their `overlay_field` value.
pub(crate) async fn overlay_polygons<S: GisStore>(
  store: &S,
  overlay_path: &str,
  overlay_field: &str,
) -> Result<Vec<(Geometry, Value)>> {
  Ok(
    store
      .read(overlay_path, &ReadQuery::fields(&[overlay_field]).with_shape())
      .await?
      .into_iter()
      .filter_map(|r| {
        let value = r.get(overlay_field).clone();
        r.shape.filter(|s| matches!(s, Geometry::Polygon(_))).map(|s| (s, value))
      })
      .collect(),
  )
}

/// Value of the overlay polygon covering `shape`. With `central_coincident`
/// the representative point decides; otherwise the polygon holding the most
/// vertices wins, ties to the earlier polygon.
pub(crate) fn overlay_value(
  shape: &Geometry,
  polygons: &[(Geometry, Value)],
  central_coincident: bool,
) -> Option<Value> {
  if central_coincident || matches!(shape, Geometry::Point(_)) {
    let centre = shape.centroid()?;
    return polygons.iter().find(|(p, _)| p.contains(&centre)).map(|(_, v)| v.clone());
  }
  let vertices = shape.points();
  polygons
    .iter()
    .map(|(p, v)| (vertices.iter().filter(|pt| p.contains(pt)).count(), v))
    .filter(|(n, _)| *n > 0)
    .fold(None::<(usize, &Value)>, |best, (n, v)| match best {
      Some((m, _)) if m >= n => best,
      _ => Some((n, v)),
    })
    .map(|(_, v)| v.clone())
}

/// Copy `overlay_field` from the overlay polygon each feature falls in.
/// Features outside every polygon get `Null`.
pub async fn update_by_overlay<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  overlay_path: &str,
  overlay_field: &str,
  central_coincident: bool,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  let polygons = overlay_polygons(store, overlay_path, overlay_field).await?;
  update_with(store, path, field, where_, true, |r| {
    r.shape
      .as_ref()
      .and_then(|s| overlay_value(s, &polygons, central_coincident))
      .unwrap_or_default()
  })
  .await
}

/// Derived geometry measures. Coordinates are in the dataset's native
/// planar system; nothing is reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryProperty {
  CentroidX,
  CentroidY,
  StartX,
  StartY,
  EndX,
  EndY,
  Length,
  Area,
  PartCount,
}

impl GeometryProperty {
  pub fn measure(&self, shape: &Geometry) -> Option<f64> {
    Some(match self {
      Self::CentroidX => shape.centroid()?.x,
      Self::CentroidY => shape.centroid()?.y,
      Self::StartX => shape.start_point()?.x,
      Self::StartY => shape.start_point()?.y,
      Self::EndX => shape.end_point()?.x,
      Self::EndY => shape.end_point()?.y,
      Self::Length => shape.length(),
      Self::Area => shape.area(),
      Self::PartCount => shape.part_count() as f64,
    })
  }
}

pub async fn update_by_geometry<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  property: GeometryProperty,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  update_with(store, path, field, where_, true, |r| {
    r.shape.as_ref().and_then(|s| property.measure(s)).into()
  })
  .await
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Give every row whose `field` is null a fresh unique value: a new UUID for
/// GUID and text fields, or the next unused integer for numeric fields.
pub async fn update_by_unique_id<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  let target = target_field(store, path, field).await?;
  let mut next = store
    .read(path, &ReadQuery::fields(&[field]))
    .await?
    .iter()
    .filter_map(|r| r.get(field).as_f64())
    .fold(0_i64, |max, v| max.max(v.ceil() as i64))
    + 1;
  update_with(store, path, field, where_, false, |r| {
    let current = r.get(field);
    if !current.is_null() {
      return current.clone();
    }
    match target.kind {
      FieldType::Guid => Value::Guid(Uuid::new_v4()),
      kind if kind.is_numeric() => {
        next += 1;
        Value::Int(next - 1)
      }
      _ => Value::Text(Uuid::new_v4().braced().to_string().to_uppercase()),
    }
  })
  .await
}

/// What [`update_by_feature_match`] writes for each match group.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMatchUpdate {
  /// Number of rows sharing the row's id values, itself included.
  MatchCount,
  /// `value` on rows in a group of two or more, otherwise `Null`.
  FlagValue(Value),
  /// 1-based position within the group, ordered by object id.
  SortOrder,
}

/// Compare rows on `id_fields` and annotate matches.
pub async fn update_by_feature_match<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  id_fields: &[String],
  update_type: FeatureMatchUpdate,
  where_: Option<&str>,
) -> Result<UpdateCounts> {
  let target = target_field(store, path, field).await?;
  let mut records = store.read(path, &ReadQuery::all().filter(where_)).await?;
  records.sort_by_key(|r| r.oid);

  let mut groups: HashMap<Key, usize> = HashMap::new();
  for r in &records {
    *groups.entry(r.key(id_fields)).or_default() += 1;
  }
  let mut seen: HashMap<Key, i64> = HashMap::new();
  let values = records
    .iter()
    .map(|r| {
      let key = r.key(id_fields);
      let size = groups.get(&key).copied().unwrap_or(1);
      match &update_type {
        FeatureMatchUpdate::MatchCount => Value::Int(size as i64),
        FeatureMatchUpdate::FlagValue(v) => if size > 1 { v.clone() } else { Value::Null },
        FeatureMatchUpdate::SortOrder => {
          let rank = seen.entry(key).or_default();
          *rank += 1;
          Value::Int(*rank)
        }
      }
    })
    .collect();
  write_changes(store, path, &target, &records, values).await
}

/// Number polyline endpoints so that coincident endpoints (within
/// `tolerance`) share a node id. Existing ids are kept where they agree;
/// new nodes continue after the highest id in use.
pub async fn update_by_node_ids<S: GisStore>(
  store: &S,
  path: &str,
  from_id_field: &str,
  to_id_field: &str,
  tolerance: f64,
) -> Result<UpdateCounts> {
  let from_field = target_field(store, path, from_id_field).await?;
  let to_field = target_field(store, path, to_id_field).await?;
  let records = store.read(path, &ReadQuery::all()).await?;

  let endpoints = |r: &Record| -> Option<(Point, Point)> {
    let shape = r.shape.as_ref()?;
    Some((shape.start_point()?, shape.end_point()?))
  };

  let mut nodes: BTreeMap<(i64, i64), i64> = BTreeMap::new();
  for r in &records {
    let Some((start, end)) = endpoints(r) else { continue };
    for (point, name) in [(start, from_id_field), (end, to_id_field)] {
      if let Some(id) = r.get(name).as_i64() {
        nodes.entry(point.snap_key(tolerance)).or_insert(id);
      }
    }
  }
  let mut next = nodes.values().copied().max().unwrap_or(0) + 1;
  let mut node_id = |p: Point| -> i64 {
    *nodes.entry(p.snap_key(tolerance)).or_insert_with(|| {
      next += 1;
      next - 1
    })
  };

  let mut from_values = Vec::with_capacity(records.len());
  let mut to_values = Vec::with_capacity(records.len());
  for r in &records {
    match endpoints(r) {
      Some((start, end)) => {
        from_values.push(Value::Int(node_id(start)));
        to_values.push(Value::Int(node_id(end)));
      }
      None => {
        from_values.push(Value::Null);
        to_values.push(Value::Null);
      }
    }
  }

  let from = write_changes(store, path, &from_field, &records, from_values).await?;
  let records = store.read(path, &ReadQuery::all()).await?;
  let to = write_changes(store, path, &to_field, &records, to_values).await?;
  Ok(UpdateCounts {
    altered: from.altered.max(to.altered),
    unchanged: from.unchanged.min(to.unchanged),
    ..UpdateCounts::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square(x0: f64, y0: f64, size: f64) -> Geometry {
    Geometry::Polygon(vec![vec![
      Point::new(x0, y0),
      Point::new(x0 + size, y0),
      Point::new(x0 + size, y0 + size),
      Point::new(x0, y0 + size),
      Point::new(x0, y0),
    ]])
  }

  #[test]
  fn central_and_majority_overlay_can_disagree() {
    let polygons =
      vec![(square(0.0, 0.0, 10.0), Value::from("A")), (square(10.0, 0.0, 10.0), Value::from("B"))];
    // Three vertices in A, centroid (length-weighted) in B.
    let line = Geometry::Polyline(vec![vec![
      Point::new(1.0, 5.0),
      Point::new(2.0, 5.0),
      Point::new(3.0, 5.0),
      Point::new(19.5, 5.0),
    ]]);
    assert_eq!(overlay_value(&line, &polygons, true), Some(Value::from("B")));
    assert_eq!(overlay_value(&line, &polygons, false), Some(Value::from("A")));
    assert_eq!(overlay_value(&Geometry::Point(Point::new(50.0, 50.0)), &polygons, true), None);
  }

  #[test]
  fn geometry_properties() {
    let line = Geometry::Polyline(vec![vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)]]);
    assert_eq!(GeometryProperty::Length.measure(&line), Some(5.0));
    assert_eq!(GeometryProperty::EndY.measure(&line), Some(4.0));
    assert_eq!(GeometryProperty::Area.measure(&square(0.0, 0.0, 2.0)), Some(4.0));
  }
}
