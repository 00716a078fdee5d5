//! Cartographic class (`cclass`) of a road segment.
//!
//! The class starts from the functional classification and is then adjusted
//! in three passes: promotion to freeway, promotion to highway, and
//! demotion of local roads to a sublocal class.

use std::collections::HashSet;

use crate::road::RoadRecord;

pub const FREEWAY: i64 = 100;
pub const HIGHWAY: i64 = 200;
pub const MAJOR_ARTERIAL: i64 = 300;
pub const MINOR_ARTERIAL: i64 = 350;
pub const MAJOR_COLLECTOR: i64 = 400;
pub const MINOR_COLLECTOR: i64 = 450;
pub const LOCAL: i64 = 500;
pub const ALLEY: i64 = 600;
pub const PRIVATE_UNNAMED: i64 = 700;
pub const RESOURCE_PAVED: i64 = 900;
pub const RESOURCE_UNPAVED: i64 = 950;

pub const KNOWN_CLASSES: [i64; 11] = [
  FREEWAY,
  HIGHWAY,
  MAJOR_ARTERIAL,
  MINOR_ARTERIAL,
  MAJOR_COLLECTOR,
  MINOR_COLLECTOR,
  LOCAL,
  ALLEY,
  PRIVATE_UNNAMED,
  RESOURCE_PAVED,
  RESOURCE_UNPAVED,
];

const RAMP_SUFFIXES: [&str; 5] = [" CONNECTOR", " FLYOVER", " OFFRAMP", " ONRAMP", " RAMP"];

const RESOURCE_OWNERS: [&str; 2] = ["BLM", "USFS"];

/// Class implied by a functional classification code.
pub fn from_functional_class(code: Option<&str>) -> i64 {
  match code.map(str::trim) {
    Some("1" | "2") => FREEWAY,
    Some("3") => MAJOR_ARTERIAL,
    Some("4") => MINOR_ARTERIAL,
    Some("5") => MAJOR_COLLECTOR,
    Some("6") => MINOR_COLLECTOR,
    _ => LOCAL,
  }
}

/// `name` with any ramp or connector suffix removed.
pub fn base_name(name: &str) -> &str {
  RAMP_SUFFIXES.iter().find_map(|suffix| name.strip_suffix(suffix)).unwrap_or(name)
}

/// Name tables driving the promotions. Names are full uppercase street
/// names (`OR 126 HWY`); UGB entries pair a city code with a name.
#[derive(Debug, Clone, Default)]
pub struct CclassTables {
  pub freeway_names:     HashSet<String>,
  pub freeway_ugb_names: HashSet<(String, String)>,
  pub highway_names:     HashSet<String>,
  pub highway_ugb_names: HashSet<(String, String)>,
  /// Highways only along part of their length: name and address range.
  pub highway_ranges:    Vec<(String, i64, i64)>,
}

impl CclassTables {
  /// The county's standing freeway and highway lists.
  pub fn standard() -> Self {
    let names = |ns: &[&str]| ns.iter().map(|n| n.to_string()).collect::<HashSet<_>>();
    let pairs = |ps: &[(&str, &str)]| ps.iter().map(|(u, n)| (u.to_string(), n.to_string())).collect::<HashSet<_>>();
    Self {
      freeway_names:     names(&["I 5", "I 105", "BELTLINE HWY", "DELTA HWY"]),
      freeway_ugb_names: pairs(&[("SPR", "OR 126 HWY")]),
      highway_names:     names(&["OR 58 HWY", "OR 99 HWY", "OR 126 HWY", "OR 36 HWY", "OR 569 HWY"]),
      highway_ugb_names: pairs(&[("EUG", "FRANKLIN BLVD"), ("COB", "WILLAMETTE ST")]),
      highway_ranges:    vec![("RIVER RD".to_owned(), 4000, 99999), ("MCKENZIE HWY".to_owned(), 40000, 99999)],
    }
  }

  fn matches(&self, names: &HashSet<String>, ugb_names: &HashSet<(String, String)>, road: &RoadRecord) -> bool {
    let Some(full) = road.full_name() else { return false };
    let base = base_name(&full);
    if names.contains(&full) || names.contains(base) {
      return true;
    }
    road.ugb_city.as_deref().is_some_and(|ugb| {
      let ugb = ugb.to_uppercase();
      ugb_names.contains(&(ugb.clone(), full.clone())) || ugb_names.contains(&(ugb, base.to_owned()))
    })
  }

  fn in_highway_range(&self, road: &RoadRecord) -> bool {
    let Some(full) = road.full_name() else { return false };
    let base = base_name(&full);
    let numbers: Vec<i64> = [
      road.left_from_address,
      road.left_to_address,
      road.right_from_address,
      road.right_to_address,
    ]
    .into_iter()
    .flatten()
    .filter(|n| *n > 0)
    .collect();
    self
      .highway_ranges
      .iter()
      .filter(|(name, _, _)| name == base)
      .any(|(_, lo, hi)| numbers.iter().any(|n| (lo..=hi).contains(&n)))
  }
}

fn promote_to_freeway(cclass: i64, road: &RoadRecord, tables: &CclassTables) -> i64 {
  if tables.matches(&tables.freeway_names, &tables.freeway_ugb_names, road) { FREEWAY } else { cclass }
}

fn promote_to_highway(cclass: i64, road: &RoadRecord, tables: &CclassTables) -> i64 {
  if cclass > HIGHWAY
    && (tables.matches(&tables.highway_names, &tables.highway_ugb_names, road) || tables.in_highway_range(road))
  {
    HIGHWAY
  } else {
    cclass
  }
}

fn demote_to_sublocal(cclass: i64, road: &RoadRecord) -> i64 {
  if cclass < LOCAL {
    return cclass;
  }
  let owner = road.owner.as_deref().map(str::to_uppercase);
  if road.street_type_code.as_deref() == Some("ALY") {
    ALLEY
  } else if owner.as_deref() == Some("PRIVATE") && road.is_unnamed() {
    PRIVATE_UNNAMED
  } else if owner.as_deref().is_some_and(|o| RESOURCE_OWNERS.contains(&o)) {
    if road.paved.as_deref() == Some("Y") { RESOURCE_PAVED } else { RESOURCE_UNPAVED }
  } else {
    cclass
  }
}

pub fn cartographic_class(road: &RoadRecord, tables: &CclassTables) -> i64 {
  let cclass = from_functional_class(road.functional_class.as_deref());
  let cclass = promote_to_freeway(cclass, road, tables);
  let cclass = promote_to_highway(cclass, road, tables);
  demote_to_sublocal(cclass, road)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn road(name: &str, kind: Option<&str>, fc: Option<&str>) -> RoadRecord {
    RoadRecord {
      street_name: Some(name.into()),
      street_type_code: kind.map(Into::into),
      functional_class: fc.map(Into::into),
      ..RoadRecord::default()
    }
  }

  #[test]
  fn functional_class_sets_the_starting_class() {
    let tables = CclassTables::default();
    assert_eq!(cartographic_class(&road("OAK", Some("ST"), Some("4")), &tables), MINOR_ARTERIAL);
    assert_eq!(cartographic_class(&road("OAK", Some("ST"), Some("9")), &tables), LOCAL);
    assert_eq!(cartographic_class(&road("OAK", Some("ST"), None), &tables), LOCAL);
  }

  #[test]
  fn ramps_promote_by_base_name() {
    let tables = CclassTables::standard();
    assert_eq!(base_name("BELTLINE HWY ONRAMP"), "BELTLINE HWY");
    let ramp = road("BELTLINE", Some("HWY ONRAMP"), Some("7"));
    assert_eq!(cartographic_class(&ramp, &tables), FREEWAY);
  }

  #[test]
  fn highway_promotion_needs_a_lower_class_and_a_match() {
    let tables = CclassTables::standard();
    let mut franklin = road("FRANKLIN", Some("BLVD"), Some("3"));
    assert_eq!(cartographic_class(&franklin, &tables), MAJOR_ARTERIAL);
    franklin.ugb_city = Some("EUG".into());
    assert_eq!(cartographic_class(&franklin, &tables), HIGHWAY);

    let mut river = road("RIVER", Some("RD"), Some("5"));
    river.left_from_address = Some(3001);
    river.left_to_address = Some(3099);
    assert_eq!(cartographic_class(&river, &tables), MAJOR_COLLECTOR);
    river.left_from_address = Some(4001);
    river.left_to_address = Some(4099);
    assert_eq!(cartographic_class(&river, &tables), HIGHWAY);
  }

  #[test]
  fn sublocal_demotions() {
    let tables = CclassTables::default();
    assert_eq!(cartographic_class(&road("OAK", Some("ALY"), None), &tables), ALLEY);

    let mut private = road("UNNAMED", None, None);
    private.owner = Some("Private".into());
    assert_eq!(cartographic_class(&private, &tables), PRIVATE_UNNAMED);

    let mut forest = road("NF 2000", None, None);
    forest.owner = Some("USFS".into());
    assert_eq!(cartographic_class(&forest, &tables), RESOURCE_UNPAVED);
    forest.paved = Some("Y".into());
    assert_eq!(cartographic_class(&forest, &tables), RESOURCE_PAVED);

    // Demotion never touches classified roads.
    let mut arterial = road("OAK", Some("ALY"), Some("3"));
    arterial.owner = Some("BLM".into());
    assert_eq!(cartographic_class(&arterial, &tables), MAJOR_ARTERIAL);
  }
}
