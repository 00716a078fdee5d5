//! Planar geometry in the warehouse's native coordinate system (feet).
//!
//! Only the handful of operations the engine needs are implemented here:
//! centroids, hulls and buffers for MSAG ranges, point-in-polygon for
//! overlays, and lengths for network costs. Polygon rings are stored closed
//! (first vertex repeated last).

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub fn new(x: f64, y: f64) -> Self { Self { x, y } }

  pub fn distance(&self, other: &Point) -> f64 {
    (self.x - other.x).hypot(self.y - other.y)
  }

  /// Integer grid key used to decide whether two vertices coincide.
  pub fn snap_key(&self, tolerance: f64) -> (i64, i64) {
    let tol = if tolerance > 0.0 { tolerance } else { 0.001 };
    ((self.x / tol).round() as i64, (self.y / tol).round() as i64)
  }
}

/// Declared geometry kind of a dataset.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
  Point,
  Multipoint,
  Polyline,
  Polygon,
  #[default]
  None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Geometry {
  Point(Point),
  MultiPoint(Vec<Point>),
  /// One vertex list per part.
  Polyline(Vec<Vec<Point>>),
  /// One closed ring per entry; holes follow their outer ring.
  Polygon(Vec<Vec<Point>>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
  pub min_x: f64,
  pub min_y: f64,
  pub max_x: f64,
  pub max_y: f64,
}

// ─── Geometry ops ────────────────────────────────────────────────────────────

impl Geometry {
  pub fn geometry_type(&self) -> GeometryType {
    match self {
      Self::Point(_) => GeometryType::Point,
      Self::MultiPoint(_) => GeometryType::Multipoint,
      Self::Polyline(_) => GeometryType::Polyline,
      Self::Polygon(_) => GeometryType::Polygon,
    }
  }

  /// Every vertex, in storage order.
  pub fn points(&self) -> Vec<Point> {
    match self {
      Self::Point(p) => vec![*p],
      Self::MultiPoint(ps) => ps.clone(),
      Self::Polyline(parts) | Self::Polygon(parts) => parts.iter().flatten().copied().collect(),
    }
  }

  pub fn part_count(&self) -> usize {
    match self {
      Self::Point(_) => 1,
      Self::MultiPoint(ps) => ps.len(),
      Self::Polyline(parts) => parts.len(),
      Self::Polygon(_) => self.parts().len(),
    }
  }

  pub fn is_empty(&self) -> bool { self.points().is_empty() }

  pub fn length(&self) -> f64 {
    match self {
      Self::Polyline(parts) | Self::Polygon(parts) => parts.iter().map(|p| path_length(p)).sum(),
      _ => 0.0,
    }
  }

  pub fn area(&self) -> f64 {
    match self {
      Self::Polygon(rings) => rings.iter().map(|r| signed_area(r)).sum::<f64>().abs(),
      _ => 0.0,
    }
  }

  pub fn envelope(&self) -> Option<Envelope> {
    let pts = self.points();
    let first = pts.first()?;
    Some(pts.iter().fold(
      Envelope { min_x: first.x, min_y: first.y, max_x: first.x, max_y: first.y },
      |e, p| Envelope {
        min_x: e.min_x.min(p.x),
        min_y: e.min_y.min(p.y),
        max_x: e.max_x.max(p.x),
        max_y: e.max_y.max(p.y),
      },
    ))
  }

  /// Representative centre: area centroid for polygons, length-weighted
  /// midpoint for lines, mean position for points.
  pub fn centroid(&self) -> Option<Point> {
    match self {
      Self::Point(p) => Some(*p),
      Self::MultiPoint(ps) => mean_point(ps),
      Self::Polyline(parts) => {
        let mut total = 0.0;
        let (mut cx, mut cy) = (0.0, 0.0);
        for part in parts {
          for seg in part.windows(2) {
            let len = seg[0].distance(&seg[1]);
            total += len;
            cx += len * (seg[0].x + seg[1].x) / 2.0;
            cy += len * (seg[0].y + seg[1].y) / 2.0;
          }
        }
        if total > 0.0 {
          Some(Point::new(cx / total, cy / total))
        } else {
          mean_point(&self.points())
        }
      }
      Self::Polygon(rings) => {
        let mut area = 0.0;
        let (mut cx, mut cy) = (0.0, 0.0);
        for ring in rings {
          for seg in ring.windows(2) {
            let cross = seg[0].x * seg[1].y - seg[1].x * seg[0].y;
            area += cross;
            cx += (seg[0].x + seg[1].x) * cross;
            cy += (seg[0].y + seg[1].y) * cross;
          }
        }
        if area.abs() > f64::EPSILON {
          Some(Point::new(cx / (3.0 * area), cy / (3.0 * area)))
        } else {
          mean_point(&self.points())
        }
      }
    }
  }

  /// Even-odd containment over all rings, so holes are honoured.
  pub fn contains(&self, p: &Point) -> bool {
    let Self::Polygon(rings) = self else { return false };
    rings.iter().filter(|r| ring_contains(r, p)).count() % 2 == 1
  }

  pub fn start_point(&self) -> Option<Point> {
    match self {
      Self::Point(p) => Some(*p),
      _ => self.points().first().copied(),
    }
  }

  pub fn end_point(&self) -> Option<Point> {
    match self {
      Self::Point(p) => Some(*p),
      _ => self.points().last().copied(),
    }
  }

  /// Split into single-part geometries. Polygon holes stay with the outer
  /// ring that contains them.
  pub fn parts(&self) -> Vec<Geometry> {
    match self {
      Self::Point(p) => vec![Self::Point(*p)],
      Self::MultiPoint(ps) => ps.iter().map(|p| Self::Point(*p)).collect(),
      Self::Polyline(parts) => parts.iter().map(|p| Self::Polyline(vec![p.clone()])).collect(),
      Self::Polygon(rings) => {
        let mut out: Vec<Vec<Vec<Point>>> = Vec::new();
        for ring in rings {
          let is_hole = match (out.last(), ring.first()) {
            (Some(current), Some(first)) => ring_contains(&current[0], first),
            _ => false,
          };
          match out.last_mut() {
            Some(current) if is_hole => current.push(ring.clone()),
            _ => out.push(vec![ring.clone()]),
          }
        }
        out.into_iter().map(Self::Polygon).collect()
      }
    }
  }

  /// Merge single- or multi-part geometries of the same kind into one.
  pub fn merge(geometries: &[Geometry]) -> Option<Geometry> {
    let first = geometries.first()?;
    Some(match first.geometry_type() {
      GeometryType::Point | GeometryType::Multipoint => {
        Self::MultiPoint(geometries.iter().flat_map(Geometry::points).collect())
      }
      GeometryType::Polyline => Self::Polyline(
        geometries
          .iter()
          .flat_map(|g| match g {
            Self::Polyline(parts) => parts.clone(),
            other => vec![other.points()],
          })
          .collect(),
      ),
      GeometryType::Polygon | GeometryType::None => Self::Polygon(
        geometries
          .iter()
          .flat_map(|g| match g {
            Self::Polygon(rings) => rings.clone(),
            other => vec![other.points()],
          })
          .collect(),
      ),
    })
  }

  /// Vertex-wise comparison within `tolerance`.
  pub fn approx_eq(&self, other: &Geometry, tolerance: f64) -> bool {
    if self.geometry_type() != other.geometry_type() {
      return false;
    }
    let (a, b) = (self.points(), other.points());
    a.len() == b.len() && a.iter().zip(&b).all(|(p, q)| p.distance(q) <= tolerance)
  }
}

// ─── Construction helpers ────────────────────────────────────────────────────

/// Convex hull by monotone chain; counter-clockwise and closed. Fewer than
/// three distinct points yields the distinct points themselves.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
  let mut pts: Vec<Point> = points.to_vec();
  pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
  pts.dedup_by(|a, b| a.distance(b) < 1e-9);
  if pts.len() < 3 {
    return pts;
  }

  let cross = |o: &Point, a: &Point, b: &Point| (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x);
  let mut lower: Vec<Point> = Vec::new();
  for p in &pts {
    while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
      lower.pop();
    }
    lower.push(*p);
  }
  let mut upper: Vec<Point> = Vec::new();
  for p in pts.iter().rev() {
    while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
      upper.pop();
    }
    upper.push(*p);
  }
  lower.pop();
  upper.pop();
  lower.extend(upper);
  if lower.len() < 3 {
    // Collinear input: the chain collapses to its two extremes.
    return lower;
  }
  let first = lower[0];
  lower.push(first);
  lower
}

/// Buffer the convex hull of `points` by `distance`. Each hull vertex is
/// swept by a circle of `segments` vertices and the hull of the result is
/// taken, which is exact for convex input up to arc discretisation.
pub fn convex_buffer(points: &[Point], distance: f64, segments: usize) -> Option<Geometry> {
  if points.is_empty() {
    return None;
  }
  let hull = convex_hull(points);
  let segments = segments.max(8);
  let swept: Vec<Point> = hull
    .iter()
    .flat_map(|c| {
      (0..segments).map(move |i| {
        let angle = TAU * i as f64 / segments as f64;
        Point::new(c.x + distance * angle.cos(), c.y + distance * angle.sin())
      })
    })
    .collect();
  Some(Geometry::Polygon(vec![convex_hull(&swept)]))
}

/// Minimum-area rectangle enclosing the hull of `points` (rotating calipers
/// over hull edges). Degenerate input yields the axis-aligned envelope.
pub fn hull_rectangle(points: &[Point]) -> Option<Geometry> {
  let hull = convex_hull(points);
  if hull.len() < 4 {
    let env = Geometry::MultiPoint(hull).envelope()?;
    return Some(envelope_polygon(&env));
  }

  let mut best: Option<(f64, [Point; 5])> = None;
  for edge in hull.windows(2) {
    let angle = (edge[1].y - edge[0].y).atan2(edge[1].x - edge[0].x);
    let (sin, cos) = angle.sin_cos();
    let rotated: Vec<Point> =
      hull.iter().map(|p| Point::new(p.x * cos + p.y * sin, -p.x * sin + p.y * cos)).collect();
    let Some(env) = Geometry::MultiPoint(rotated).envelope() else { continue };
    let area = (env.max_x - env.min_x) * (env.max_y - env.min_y);
    if best.as_ref().is_none_or(|(a, _)| area < *a) {
      let back = |x: f64, y: f64| Point::new(x * cos - y * sin, x * sin + y * cos);
      best = Some((
        area,
        [
          back(env.min_x, env.min_y),
          back(env.max_x, env.min_y),
          back(env.max_x, env.max_y),
          back(env.min_x, env.max_y),
          back(env.min_x, env.min_y),
        ],
      ));
    }
  }
  best.map(|(_, ring)| Geometry::Polygon(vec![ring.to_vec()]))
}

pub fn envelope_polygon(env: &Envelope) -> Geometry {
  Geometry::Polygon(vec![vec![
    Point::new(env.min_x, env.min_y),
    Point::new(env.max_x, env.min_y),
    Point::new(env.max_x, env.max_y),
    Point::new(env.min_x, env.max_y),
    Point::new(env.min_x, env.min_y),
  ]])
}

fn mean_point(points: &[Point]) -> Option<Point> {
  if points.is_empty() {
    return None;
  }
  let n = points.len() as f64;
  Some(Point::new(
    points.iter().map(|p| p.x).sum::<f64>() / n,
    points.iter().map(|p| p.y).sum::<f64>() / n,
  ))
}

fn path_length(path: &[Point]) -> f64 { path.windows(2).map(|s| s[0].distance(&s[1])).sum() }

fn signed_area(ring: &[Point]) -> f64 {
  ring.windows(2).map(|s| s[0].x * s[1].y - s[1].x * s[0].y).sum::<f64>() / 2.0
}

fn ring_contains(ring: &[Point], p: &Point) -> bool {
  let mut inside = false;
  for seg in ring.windows(2) {
    let (a, b) = (seg[0], seg[1]);
    if (a.y > p.y) != (b.y > p.y) {
      let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
      if p.x < x {
        inside = !inside;
      }
    }
  }
  inside
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square(x0: f64, y0: f64, side: f64) -> Vec<Point> {
    vec![
      Point::new(x0, y0),
      Point::new(x0 + side, y0),
      Point::new(x0 + side, y0 + side),
      Point::new(x0, y0 + side),
      Point::new(x0, y0),
    ]
  }

  #[test]
  fn polygon_centroid_and_area() {
    let g = Geometry::Polygon(vec![square(0.0, 0.0, 10.0)]);
    let c = g.centroid().unwrap();
    assert!((c.x - 5.0).abs() < 1e-9 && (c.y - 5.0).abs() < 1e-9);
    assert!((g.area() - 100.0).abs() < 1e-9);
  }

  #[test]
  fn holes_are_excluded_from_containment() {
    let mut hole = square(4.0, 4.0, 2.0);
    hole.reverse();
    let g = Geometry::Polygon(vec![square(0.0, 0.0, 10.0), hole]);
    assert!(g.contains(&Point::new(1.0, 1.0)));
    assert!(!g.contains(&Point::new(5.0, 5.0)));
    assert_eq!(g.parts().len(), 1);
  }

  #[test]
  fn hull_drops_interior_points() {
    let mut pts = square(0.0, 0.0, 4.0);
    pts.push(Point::new(2.0, 2.0));
    let hull = convex_hull(&pts);
    assert_eq!(hull.len(), 5);
    assert!(!hull.contains(&Point::new(2.0, 2.0)));
  }

  #[test]
  fn buffering_a_single_point_gives_a_disc() {
    let g = convex_buffer(&[Point::new(100.0, 100.0)], 50.0, 32).unwrap();
    let area = g.area();
    let disc = std::f64::consts::PI * 2500.0;
    assert!(area < disc && area > disc * 0.98);
    assert!(g.contains(&Point::new(130.0, 100.0)));
    assert!(!g.contains(&Point::new(151.0, 100.0)));
  }

  #[test]
  fn rectangle_of_rotated_square_is_tight() {
    let pts = vec![
      Point::new(0.0, 5.0),
      Point::new(5.0, 0.0),
      Point::new(10.0, 5.0),
      Point::new(5.0, 10.0),
    ];
    let rect = hull_rectangle(&pts).unwrap();
    assert!((rect.area() - 50.0).abs() < 1e-6);
  }

  #[test]
  fn polyline_length_and_endpoints() {
    let g = Geometry::Polyline(vec![vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)]]);
    assert_eq!(g.length(), 5.0);
    assert_eq!(g.end_point(), Some(Point::new(3.0, 4.0)));
  }
}
