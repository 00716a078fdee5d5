//! Network dataset build and closest-facility routing.
//!
//! A network is the undirected graph of a polyline dataset: every part is an
//! edge between its snapped endpoints. Locations (incidents and facilities)
//! attach to the nearest node.

use std::{
  cmp::Ordering,
  collections::{BinaryHeap, HashMap},
};

use tracing::debug;

use rlid_core::{
  geometry::{Geometry, Point},
  record::{Record, Value},
  store::{GisStore, ReadQuery},
};

use crate::Result;

/// How edge traversal cost is measured.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCost {
  /// Planar length of the part.
  Length,
  /// A numeric attribute of the feature, shared among its parts by length.
  Field(String),
}

#[derive(Debug, Clone)]
struct Edge {
  from:   usize,
  to:     usize,
  cost:   f64,
  points: Vec<Point>,
}

/// An incident or facility: an identifier and where it sits.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
  pub id:    Value,
  pub point: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosestFacilityRoute {
  pub dataset_id:  Value,
  /// `Null` when no facility is reachable within the cutoff.
  pub facility_id: Value,
  pub cost:        Option<f64>,
  /// Route from the incident to its facility; `None` when unreachable or
  /// when both share a node.
  pub geometry:    Option<Geometry>,
}

#[derive(Debug, Default)]
pub struct NetworkDataset {
  nodes:     Vec<Point>,
  index:     HashMap<(i64, i64), usize>,
  edges:     Vec<Edge>,
  adjacency: Vec<Vec<usize>>,
  tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct State {
  cost: f64,
  node: usize,
}

impl Eq for State {}

impl Ord for State {
  // Reversed so the max-heap pops the cheapest state first.
  fn cmp(&self, other: &Self) -> Ordering {
    other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
  }
}

impl PartialOrd for State {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl NetworkDataset {
  /// Build from the polylines of `path`.
  pub async fn build<S: GisStore>(store: &S, path: &str, cost: &NetworkCost, tolerance: f64) -> Result<Self> {
    let records = store.read(path, &ReadQuery::all()).await?;
    let network = Self::from_records(&records, cost, tolerance);
    debug!(dataset = path, nodes = network.node_count(), edges = network.edge_count(), "network built");
    Ok(network)
  }

  pub fn from_records(records: &[Record], cost: &NetworkCost, tolerance: f64) -> Self {
    let mut network = Self { tolerance, ..Self::default() };
    for record in records {
      let Some(Geometry::Polyline(parts)) = &record.shape else { continue };
      let total: f64 = parts.iter().map(|p| path_length(p)).sum();
      for part in parts.iter().filter(|p| p.len() >= 2) {
        let length = path_length(part);
        let edge_cost = match cost {
          NetworkCost::Length => length,
          NetworkCost::Field(name) => {
            let Some(value) = record.float(name) else { continue };
            if total > 0.0 { value * length / total } else { value }
          }
        };
        network.add_edge(part.clone(), edge_cost);
      }
    }
    network
  }

  fn node(&mut self, p: Point) -> usize {
    let key = p.snap_key(self.tolerance);
    if let Some(&i) = self.index.get(&key) {
      return i;
    }
    self.nodes.push(p);
    self.adjacency.push(Vec::new());
    self.index.insert(key, self.nodes.len() - 1);
    self.nodes.len() - 1
  }

  fn add_edge(&mut self, points: Vec<Point>, cost: f64) {
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else { return };
    let from = self.node(first);
    let to = self.node(last);
    let id = self.edges.len();
    self.edges.push(Edge { from, to, cost: cost.max(0.0), points });
    self.adjacency[from].push(id);
    if to != from {
      self.adjacency[to].push(id);
    }
  }

  pub fn node_count(&self) -> usize { self.nodes.len() }

  pub fn edge_count(&self) -> usize { self.edges.len() }

  fn nearest_node(&self, p: &Point) -> Option<usize> {
    self
      .nodes
      .iter()
      .enumerate()
      .min_by(|(_, a), (_, b)| a.distance(p).total_cmp(&b.distance(p)))
      .map(|(i, _)| i)
  }

  /// Route every incident to its cheapest facility. Results follow the
  /// order of `incidents`.
  pub fn solve_closest_facility(
    &self,
    incidents: &[Location],
    facilities: &[Location],
    cutoff: Option<f64>,
  ) -> Vec<ClosestFacilityRoute> {
    let n = self.nodes.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut origin: Vec<Option<usize>> = vec![None; n];
    let mut via: Vec<Option<usize>> = vec![None; n];
    let mut heap = BinaryHeap::new();

    for (i, facility) in facilities.iter().enumerate() {
      let Some(node) = self.nearest_node(&facility.point) else { continue };
      if dist[node] > 0.0 {
        dist[node] = 0.0;
        origin[node] = Some(i);
        heap.push(State { cost: 0.0, node });
      }
    }

    while let Some(State { cost, node }) = heap.pop() {
      if cost > dist[node] {
        continue;
      }
      for &e in &self.adjacency[node] {
        let edge = &self.edges[e];
        let next = if edge.from == node { edge.to } else { edge.from };
        let total = cost + edge.cost;
        if cutoff.is_some_and(|c| total > c) {
          continue;
        }
        if total < dist[next] {
          dist[next] = total;
          origin[next] = origin[node];
          via[next] = Some(e);
          heap.push(State { cost: total, node: next });
        }
      }
    }

    incidents
      .iter()
      .map(|incident| {
        let reached = self
          .nearest_node(&incident.point)
          .filter(|&node| dist[node].is_finite())
          .and_then(|node| origin[node].map(|f| (node, f)));
        match reached {
          Some((node, f)) => ClosestFacilityRoute {
            dataset_id:  incident.id.clone(),
            facility_id: facilities[f].id.clone(),
            cost:        Some(dist[node]),
            geometry:    self.trace(node, &via),
          },
          None => ClosestFacilityRoute {
            dataset_id:  incident.id.clone(),
            facility_id: Value::Null,
            cost:        None,
            geometry:    None,
          },
        }
      })
      .collect()
  }

  /// Walk the shortest-path tree from `node` back to its facility.
  fn trace(&self, mut node: usize, via: &[Option<usize>]) -> Option<Geometry> {
    let mut line: Vec<Point> = Vec::new();
    while let Some(e) = via[node] {
      let edge = &self.edges[e];
      let (next, mut points) = if edge.to == node {
        (edge.from, edge.points.iter().rev().copied().collect::<Vec<_>>())
      } else {
        (edge.to, edge.points.clone())
      };
      if !line.is_empty() {
        points.remove(0);
      }
      line.extend(points);
      node = next;
    }
    if line.len() < 2 { None } else { Some(Geometry::Polyline(vec![line])) }
  }
}

fn path_length(points: &[Point]) -> f64 { points.windows(2).map(|w| w[0].distance(&w[1])).sum() }

/// Locations from a dataset: `id_field` plus each feature's representative
/// point.
pub async fn read_locations<S: GisStore>(store: &S, path: &str, id_field: &str) -> Result<Vec<Location>> {
  Ok(
    store
      .read(path, &ReadQuery::fields(&[id_field]).with_shape())
      .await?
      .into_iter()
      .filter_map(|r| {
        let point = r.shape.as_ref()?.centroid()?;
        Some(Location { id: r.get(id_field).clone(), point })
      })
      .collect(),
  )
}

/// Closest-facility solve between two datasets over `network`.
pub async fn closest_facility_routes<S: GisStore>(
  store: &S,
  network: &NetworkDataset,
  dataset_path: &str,
  dataset_id_field: &str,
  facility_path: &str,
  facility_id_field: &str,
  cutoff: Option<f64>,
) -> Result<Vec<ClosestFacilityRoute>> {
  let incidents = read_locations(store, dataset_path, dataset_id_field).await?;
  let facilities = read_locations(store, facility_path, facility_id_field).await?;
  Ok(network.solve_closest_facility(&incidents, &facilities, cutoff))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn segment(x0: f64, y0: f64, x1: f64, y1: f64) -> Record {
    Record::new().with_shape(Geometry::Polyline(vec![vec![Point::new(x0, y0), Point::new(x1, y1)]]))
  }

  fn at(id: &str, x: f64, y: f64) -> Location { Location { id: Value::from(id), point: Point::new(x, y) } }

  /// A straight street 0..30 along x, with a 5-foot spur at x=30.
  fn street() -> NetworkDataset {
    let records = vec![
      segment(0.0, 0.0, 10.0, 0.0),
      segment(10.0, 0.0, 20.0, 0.0),
      segment(20.0, 0.0, 30.0, 0.0),
      segment(30.0, 0.0, 30.0, 5.0),
    ];
    NetworkDataset::from_records(&records, &NetworkCost::Length, 0.01)
  }

  #[test]
  fn graph_shares_coincident_endpoints() {
    let net = street();
    assert_eq!(net.node_count(), 5);
    assert_eq!(net.edge_count(), 4);
  }

  #[test]
  fn incidents_route_to_the_cheapest_facility() {
    let routes = street().solve_closest_facility(
      &[at("a", 1.0, 1.0), at("b", 29.0, 4.0)],
      &[at("east", 30.0, 0.0), at("west", 0.0, 0.0)],
      None,
    );
    assert_eq!(routes[0].facility_id, Value::from("west"));
    assert_eq!(routes[0].cost, Some(0.0));
    assert!(routes[0].geometry.is_none());
    assert_eq!(routes[1].facility_id, Value::from("east"));
    assert_eq!(routes[1].cost, Some(5.0));
    let route = routes[1].geometry.as_ref().unwrap();
    assert_eq!(route.start_point(), Some(Point::new(30.0, 5.0)));
    assert_eq!(route.end_point(), Some(Point::new(30.0, 0.0)));
  }

  #[test]
  fn cutoff_leaves_distant_incidents_unrouted() {
    let routes = street().solve_closest_facility(&[at("far", 20.0, 0.0)], &[at("west", 0.0, 0.0)], Some(15.0));
    assert_eq!(routes[0].facility_id, Value::Null);
    assert_eq!(routes[0].cost, None);
  }
}
