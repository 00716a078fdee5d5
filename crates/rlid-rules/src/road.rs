//! Road-segment validation rules.

use std::collections::BTreeMap;

use rlid_core::{
  record::{Record, Value},
  values::concatenate_arguments,
};

use crate::{
  derive::cclass::{KNOWN_CLASSES, PRIVATE_UNNAMED},
  issue::{Issue, consolidate},
  text_of,
};

pub const ID_FIELD: &str = "road_segment_gfid";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoadRecord {
  pub id:                    Value,
  pub seg_id:                Option<i64>,
  pub pre_direction_code:    Option<String>,
  pub street_name:           Option<String>,
  pub street_type_code:      Option<String>,
  pub suffix_direction_code: Option<String>,
  pub functional_class:      Option<String>,
  pub cclass:                Option<i64>,
  pub owner:                 Option<String>,
  pub paved:                 Option<String>,
  pub ugb_city:              Option<String>,
  pub mailing_city:          Option<String>,
  pub left_from_address:     Option<i64>,
  pub left_to_address:       Option<i64>,
  pub right_from_address:    Option<i64>,
  pub right_to_address:      Option<i64>,
  pub from_node_id:          Option<i64>,
  pub to_node_id:            Option<i64>,
  /// Planar length of the shape; `None` without one.
  pub length:                Option<f64>,
}

impl RoadRecord {
  pub fn from_record(r: &Record) -> Self {
    Self {
      id:                    r.get(ID_FIELD).clone(),
      seg_id:                r.int("seg_id"),
      pre_direction_code:    text_of(r, "pre_direction_code"),
      street_name:           text_of(r, "street_name"),
      street_type_code:      text_of(r, "street_type_code"),
      suffix_direction_code: text_of(r, "suffix_direction_code"),
      functional_class:      text_of(r, "functional_class"),
      cclass:                r.int("cclass"),
      owner:                 text_of(r, "owner"),
      paved:                 text_of(r, "paved"),
      ugb_city:              text_of(r, "ugb_city"),
      mailing_city:          text_of(r, "mailing_city"),
      left_from_address:     r.int("left_from_address"),
      left_to_address:       r.int("left_to_address"),
      right_from_address:    r.int("right_from_address"),
      right_to_address:      r.int("right_to_address"),
      from_node_id:          r.int("from_node_id"),
      to_node_id:            r.int("to_node_id"),
      length:                r.shape.as_ref().map(|s| s.length()),
    }
  }

  pub fn key(&self) -> String { self.id.key_string() }

  /// `[predir] name [type] [sufdir]`, uppercased as maintained.
  pub fn full_name(&self) -> Option<String> {
    concatenate_arguments(
      &[
        self.pre_direction_code.clone().into(),
        self.street_name.clone().into(),
        self.street_type_code.clone().into(),
        self.suffix_direction_code.clone().into(),
      ],
      " ",
    )
    .map(|s| s.to_uppercase())
  }

  /// Whether the segment carries no real street name.
  pub fn is_unnamed(&self) -> bool {
    match self.street_name.as_deref() {
      None => true,
      Some(name) => {
        let name = name.to_uppercase();
        name == "PRIVATE" || name.starts_with("UNNAMED")
      }
    }
  }

  pub fn range(&self, side: Side) -> (Option<i64>, Option<i64>) {
    match side {
      Side::Left => (self.left_from_address, self.left_to_address),
      Side::Right => (self.right_from_address, self.right_to_address),
    }
  }

  /// Both ends of the side's range when it is geocodable.
  pub fn numbered_range(&self, side: Side) -> Option<(i64, i64)> {
    match self.range(side) {
      (Some(from), Some(to)) if from > 0 && to > 0 => Some((from.min(to), from.max(to))),
      _ => None,
    }
  }

  fn issue(&self, description: impl Into<String>) -> Issue {
    Issue::new(self.id.clone(), description, false)
      .with_context("seg_id", self.seg_id)
      .with_context("street_name", self.street_name.clone())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
  Left,
  Right,
}

impl Side {
  pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

  fn label(self) -> &'static str {
    match self {
      Side::Left => "left",
      Side::Right => "right",
    }
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

pub type RoadRule = fn(&[RoadRecord]) -> Vec<Issue>;

pub const ROAD_RULES: &[(&str, RoadRule)] = &[
  ("core", core_issues),
  ("classification", classification_issues),
  ("geocoding", geocoding_issues),
  ("network", network_issues),
  ("geometry", geometry_issues),
  ("range_overlap", range_overlap_issues),
];

pub fn core_issues(records: &[RoadRecord]) -> Vec<Issue> {
  let mut issues = Vec::new();
  for r in records {
    if r.seg_id.is_none() {
      issues.push(r.issue("'seg_id' must not be 'null'."));
    }
    if r.street_name.is_none() && r.cclass != Some(PRIVATE_UNNAMED) {
      issues.push(r.issue("'street_name' must not be 'null'."));
    }
  }
  issues
}

pub fn classification_issues(records: &[RoadRecord]) -> Vec<Issue> {
  records
    .iter()
    .filter(|r| !r.cclass.is_some_and(|c| KNOWN_CLASSES.contains(&c)))
    .map(|r| r.issue("'cclass' must be a valid cartographic class."))
    .collect()
}

pub fn geocoding_issues(records: &[RoadRecord]) -> Vec<Issue> {
  let mut issues = Vec::new();
  for r in records {
    for side in Side::BOTH {
      let label = side.label();
      let (from, to) = r.range(side);
      let (from, to) = (from.unwrap_or(0), to.unwrap_or(0));
      if (from == 0) != (to == 0) {
        issues.push(r.issue(format!("'{label}_from_address' and '{label}_to_address' must both be set or both be zero.")));
        continue;
      }
      if from == 0 {
        continue;
      }
      if from > to {
        issues.push(r.issue(format!("'{label}_from_address' must not be greater than '{label}_to_address'.")));
      }
      if from % 2 != to % 2 {
        issues.push(r.issue(format!("The {label} range must not mix odd and even numbers.")));
      }
    }
  }
  issues
}

pub fn network_issues(records: &[RoadRecord]) -> Vec<Issue> {
  let mut issues = Vec::new();
  for r in records {
    match (r.from_node_id, r.to_node_id) {
      (None, _) => issues.push(r.issue("'from_node_id' must not be 'null'.")),
      (_, None) => issues.push(r.issue("'to_node_id' must not be 'null'.")),
      (Some(from), Some(to)) if from == to => issues.push(r.issue("'from_node_id' must differ from 'to_node_id'.")),
      _ => {}
    }
  }
  issues
}

pub fn geometry_issues(records: &[RoadRecord]) -> Vec<Issue> {
  records
    .iter()
    .filter(|r| !r.length.is_some_and(|l| l > 0.0))
    .map(|r| r.issue("Segment must have a shape with a positive length."))
    .collect()
}

/// Same-side ranges of one street in one mailing city must not share a
/// number of the same parity.
pub fn range_overlap_issues(records: &[RoadRecord]) -> Vec<Issue> {
  type StreetSide = (String, String, Side);
  let mut groups: BTreeMap<StreetSide, Vec<(&RoadRecord, (i64, i64))>> = BTreeMap::new();
  for r in records {
    let (Some(name), Some(city)) = (r.full_name(), &r.mailing_city) else { continue };
    for side in Side::BOTH {
      if let Some(range) = r.numbered_range(side) {
        groups.entry((name.clone(), city.to_uppercase(), side)).or_default().push((r, range));
      }
    }
  }

  let mut issues = Vec::new();
  for ((_, _, side), members) in groups {
    for (i, (r, (lo, hi))) in members.iter().enumerate() {
      let overlaps = members.iter().enumerate().any(|(j, (other, (olo, ohi)))| {
        i != j && other.id != r.id && lo <= ohi && olo <= hi && lo % 2 == olo % 2
      });
      if overlaps {
        issues.push(r.issue(format!("The {} range overlaps another segment of the same street.", side.label())));
      }
    }
  }
  issues
}

pub fn validate_roads(records: &[RoadRecord]) -> Vec<Issue> {
  consolidate(ROAD_RULES.iter().flat_map(|(_, rule)| rule(records)).collect())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn segment(id: &str, left: (i64, i64), right: (i64, i64)) -> RoadRecord {
    RoadRecord {
      id: Value::from(id),
      seg_id: Some(1),
      street_name: Some("MAIN".into()),
      street_type_code: Some("ST".into()),
      mailing_city: Some("EUGENE".into()),
      cclass: Some(500),
      left_from_address: Some(left.0),
      left_to_address: Some(left.1),
      right_from_address: Some(right.0),
      right_to_address: Some(right.1),
      from_node_id: Some(1),
      to_node_id: Some(2),
      length: Some(300.0),
      ..RoadRecord::default()
    }
  }

  fn descriptions(issues: &[Issue]) -> Vec<&str> { issues.iter().map(|i| i.description.as_str()).collect() }

  #[test]
  fn a_clean_segment_raises_nothing() {
    assert!(validate_roads(&[segment("a", (101, 199), (100, 198))]).is_empty());
  }

  #[test]
  fn unnamed_private_roads_need_no_name() {
    let mut r = segment("a", (0, 0), (0, 0));
    r.street_name = None;
    r.cclass = Some(PRIVATE_UNNAMED);
    assert!(core_issues(&[r.clone()]).is_empty());
    r.cclass = Some(500);
    assert_eq!(descriptions(&core_issues(&[r])), vec!["'street_name' must not be 'null'."]);
  }

  #[test]
  fn geocoding_ranges() {
    let issues = geocoding_issues(&[segment("a", (199, 101), (100, 0))]);
    assert_eq!(
      descriptions(&issues),
      vec![
        "'left_from_address' must not be greater than 'left_to_address'.",
        "'right_from_address' and 'right_to_address' must both be set or both be zero.",
      ]
    );
    let mixed = geocoding_issues(&[segment("a", (101, 200), (0, 0))]);
    assert_eq!(descriptions(&mixed), vec!["The left range must not mix odd and even numbers."]);
  }

  #[test]
  fn network_and_geometry() {
    let mut r = segment("a", (0, 0), (0, 0));
    r.to_node_id = Some(1);
    r.length = None;
    assert_eq!(descriptions(&network_issues(&[r.clone()])), vec!["'from_node_id' must differ from 'to_node_id'."]);
    assert_eq!(geometry_issues(&[r]).len(), 1);
  }

  #[test]
  fn unknown_class_is_flagged() {
    let mut r = segment("a", (0, 0), (0, 0));
    r.cclass = Some(123);
    assert_eq!(classification_issues(&[r]).len(), 1);
  }

  #[test]
  fn overlapping_ranges_flag_both_segments() {
    let issues = range_overlap_issues(&[
      segment("a", (101, 199), (100, 198)),
      segment("b", (151, 249), (200, 298)),
      segment("c", (301, 399), (300, 398)),
    ]);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].subject, Value::from("a"));
    assert_eq!(issues[1].subject, Value::from("b"));
    assert_eq!(issues[0].description, "The left range overlaps another segment of the same street.");
  }
}
