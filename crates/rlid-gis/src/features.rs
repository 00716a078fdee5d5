//! Feature-set operations: insert/delete helpers, dissolve, identity,
//! overlay, erase and planarize.
//!
//! Polygon relationships are decided by each feature's representative
//! point (its centroid), which is exact for the point layers the engine
//! mostly handles and a close approximation for small lines and polygons.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use rlid_core::{
  geometry::{Geometry, Point},
  record::{Record, Value},
  store::{GisStore, ReadQuery, UpdateCounts},
};

use crate::{
  Result,
  attributes::{overlay_polygons, overlay_value, update_by_overlay},
  cursor::Key,
};

// ─── Insert / delete ─────────────────────────────────────────────────────────

/// Append the rows of `source` matching `where_` to `destination`.
pub async fn insert_from<S: GisStore>(
  store: &S,
  destination: &str,
  source: &str,
  where_: Option<&str>,
) -> Result<usize> {
  let rows = store.read(source, &ReadQuery::all().filter(where_)).await?;
  store.insert(destination, rows).await
}

pub async fn delete_features<S: GisStore>(store: &S, path: &str, where_: Option<&str>) -> Result<usize> {
  store.delete_where(path, where_).await
}

/// Replace every row of `path` with `records`.
async fn replace_all<S: GisStore>(store: &S, path: &str, records: Vec<Record>) -> Result<UpdateCounts> {
  crate::cursor::load_records(store, path, records).await
}

// ─── Dissolve ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DissolveOptions {
  /// Endpoint snapping distance when chaining lines.
  pub tolerance:     f64,
  /// Keep each group as one multipart feature; otherwise explode parts.
  pub multipart:     bool,
  /// Chain polyline parts that meet end to end into single parts.
  pub unsplit_lines: bool,
}

impl Default for DissolveOptions {
  fn default() -> Self { Self { tolerance: 0.001, multipart: true, unsplit_lines: false } }
}

/// Merge features sharing the values of `fields`. Other attributes are
/// dropped. Returns the resulting feature count.
pub async fn dissolve<S: GisStore>(
  store: &S,
  path: &str,
  fields: &[String],
  options: DissolveOptions,
) -> Result<usize> {
  let records = store.read(path, &ReadQuery::all()).await?;
  let before = records.len();

  let mut order: Vec<Key> = Vec::new();
  let mut groups: HashMap<Key, (Record, Vec<Geometry>)> = HashMap::new();
  for r in records {
    let key = r.key(fields);
    let entry = groups.entry(key.clone()).or_insert_with(|| {
      order.push(key);
      (r.project(fields), Vec::new())
    });
    entry.1.extend(r.shape);
  }

  let mut out = Vec::new();
  for key in order {
    let Some((mut template, shapes)) = groups.remove(&key) else { continue };
    template.oid = None;
    let mut merged = Geometry::merge(&shapes);
    if options.unsplit_lines {
      merged = merged.map(|g| unsplit(g, options.tolerance));
    }
    match merged {
      Some(shape) if !options.multipart => {
        out.extend(shape.parts().into_iter().map(|part| template.clone().with_shape(part)));
      }
      shape => out.push(Record { shape, ..template }),
    }
  }

  let n = out.len();
  replace_all(store, path, out).await?;
  debug!(dataset = path, before, after = n, "dissolved");
  Ok(n)
}

/// Chain the parts of a polyline whose ends meet within `tolerance`.
fn unsplit(shape: Geometry, tolerance: f64) -> Geometry {
  let Geometry::Polyline(mut parts) = shape else { return shape };
  let mut chained: Vec<Vec<Point>> = Vec::new();
  while let Some(mut line) = parts.pop() {
    loop {
      let (Some(&head), Some(&tail)) = (line.first(), line.last()) else { break };
      let near = |p: &Point, q: &Point| p.distance(q) <= tolerance;
      let Some(i) = parts.iter().position(|other| match (other.first(), other.last()) {
        (Some(a), Some(b)) => near(a, &tail) || near(b, &tail) || near(a, &head) || near(b, &head),
        _ => false,
      }) else {
        break;
      };
      let mut other = parts.swap_remove(i);
      let (Some(&a), Some(&b)) = (other.first(), other.last()) else { continue };
      if near(&a, &tail) {
        line.extend(other.into_iter().skip(1));
      } else if near(&b, &tail) {
        other.reverse();
        line.extend(other.into_iter().skip(1));
      } else if near(&b, &head) {
        other.extend(line.into_iter().skip(1));
        line = other;
      } else {
        other.reverse();
        other.extend(line.into_iter().skip(1));
        line = other;
      }
    }
    chained.push(line);
  }
  chained.reverse();
  Geometry::Polyline(chained)
}

// ─── Identity / overlay / erase ──────────────────────────────────────────────

/// Tag each feature with `identity_field` from the identity polygon holding
/// its representative point, or `replacement` when given. Features outside
/// every polygon get `Null`.
pub async fn identity<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  identity_path: &str,
  identity_field: &str,
  replacement: Option<Value>,
) -> Result<UpdateCounts> {
  let polygons = overlay_polygons(store, identity_path, identity_field).await?;
  let records = store.read(path, &ReadQuery::all()).await?;
  let patches: Vec<Record> = records
    .into_iter()
    .map(|r| {
      let value = r
        .shape
        .as_ref()
        .and_then(|s| overlay_value(s, &polygons, true))
        .map(|v| replacement.clone().unwrap_or(v))
        .unwrap_or_default();
      Record { oid: r.oid, ..Record::new() }.with(field, value)
    })
    .collect();
  let altered = store.update(path, patches).await?;
  Ok(UpdateCounts { altered, ..UpdateCounts::default() })
}

/// Overlay attributes from `overlay_path`; see
/// [`crate::attributes::update_by_overlay`].
pub async fn overlay<S: GisStore>(
  store: &S,
  path: &str,
  field: &str,
  overlay_path: &str,
  overlay_field: &str,
  central_coincident: bool,
) -> Result<UpdateCounts> {
  update_by_overlay(store, path, field, overlay_path, overlay_field, central_coincident, None).await
}

/// Delete features whose representative point falls inside a polygon of
/// `erase_path` (restricted by `erase_where`).
pub async fn erase<S: GisStore>(
  store: &S,
  path: &str,
  erase_path: &str,
  erase_where: Option<&str>,
) -> Result<usize> {
  let erasers: Vec<Geometry> = store
    .read(erase_path, &ReadQuery::fields::<&str>(&[]).filter(erase_where).with_shape())
    .await?
    .into_iter()
    .filter_map(|r| r.shape)
    .collect();
  let doomed: Vec<i64> = store
    .read(path, &ReadQuery::fields::<&str>(&[]).with_shape())
    .await?
    .into_iter()
    .filter(|r| {
      r.shape
        .as_ref()
        .and_then(Geometry::centroid)
        .is_some_and(|c| erasers.iter().any(|e| e.contains(&c)))
    })
    .filter_map(|r| r.oid)
    .collect();
  let n = store.delete_oids(path, &doomed).await?;
  debug!(dataset = path, erased = n, "erase");
  Ok(n)
}

// ─── Planarize ───────────────────────────────────────────────────────────────

/// Split polylines at every vertex shared with a different line, so the
/// result only meets at endpoints. Returns the resulting feature count.
pub async fn planarize<S: GisStore>(store: &S, path: &str, tolerance: f64) -> Result<usize> {
  let records = store.read(path, &ReadQuery::all()).await?;

  let mut owners: BTreeMap<(i64, i64), HashSet<usize>> = BTreeMap::new();
  for (i, r) in records.iter().enumerate() {
    if let Some(Geometry::Polyline(parts)) = &r.shape {
      for p in parts.iter().flatten() {
        owners.entry(p.snap_key(tolerance)).or_default().insert(i);
      }
    }
  }
  let is_junction = |p: &Point| owners.get(&p.snap_key(tolerance)).is_some_and(|o| o.len() > 1);

  let mut out = Vec::new();
  for r in records {
    let Some(Geometry::Polyline(parts)) = &r.shape else {
      out.push(Record { oid: None, ..r });
      continue;
    };
    for part in parts {
      let mut piece: Vec<Point> = Vec::new();
      for (j, p) in part.iter().enumerate() {
        piece.push(*p);
        if j > 0 && j + 1 < part.len() && is_junction(p) {
          out.push(Record { oid: None, shape: Some(Geometry::Polyline(vec![piece])), ..r.clone() });
          piece = vec![*p];
        }
      }
      if piece.len() > 1 {
        out.push(Record { oid: None, shape: Some(Geometry::Polyline(vec![piece])), ..r.clone() });
      }
    }
  }

  let n = out.len();
  replace_all(store, path, out).await?;
  debug!(dataset = path, features = n, "planarized");
  Ok(n)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unsplit_chains_touching_parts_in_either_direction() {
    let line = Geometry::Polyline(vec![
      vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
      vec![Point::new(2.0, 0.0), Point::new(1.0, 0.0)],
      vec![Point::new(5.0, 5.0), Point::new(6.0, 5.0)],
    ]);
    let Geometry::Polyline(parts) = unsplit(line, 0.01) else { panic!("polyline expected") };
    assert_eq!(parts.len(), 2);
    let long = parts.iter().find(|p| p.len() == 3).unwrap();
    assert!((Geometry::Polyline(vec![long.clone()]).length() - 2.0).abs() < 1e-9);
  }
}
