//! General-arterial designation, scoped by mailing city.

use std::collections::HashMap;

use crate::road::{RoadRecord, Side};

/// One whitelisted street. `range` limits the designation to segments with
/// an address in it; `max_cclass` to segments of that class or better.
#[derive(Debug, Clone, PartialEq)]
pub struct ArterialEntry {
  pub pre_direction_code: Option<String>,
  pub street_name:        String,
  pub street_type_code:   Option<String>,
  pub range:              Option<(i64, i64)>,
  pub max_cclass:         Option<i64>,
}

impl ArterialEntry {
  pub fn new(pre: Option<&str>, name: &str, kind: Option<&str>) -> Self {
    Self {
      pre_direction_code: pre.map(str::to_owned),
      street_name:        name.to_owned(),
      street_type_code:   kind.map(str::to_owned),
      range:              None,
      max_cclass:         None,
    }
  }

  pub fn within(mut self, from: i64, to: i64) -> Self {
    self.range = Some((from, to));
    self
  }

  pub fn up_to_class(mut self, cclass: i64) -> Self {
    self.max_cclass = Some(cclass);
    self
  }

  fn matches(&self, road: &RoadRecord) -> bool {
    let same = |a: Option<&str>, b: Option<&str>| {
      a.map(str::to_uppercase).unwrap_or_default() == b.map(str::to_uppercase).unwrap_or_default()
    };
    if !same(Some(self.street_name.as_str()), road.street_name.as_deref())
      || !same(self.pre_direction_code.as_deref(), road.pre_direction_code.as_deref())
      || !same(self.street_type_code.as_deref(), road.street_type_code.as_deref())
    {
      return false;
    }
    if let Some((lo, hi)) = self.range {
      let touches = Side::BOTH
        .into_iter()
        .filter_map(|side| road.numbered_range(side))
        .any(|(from, to)| from <= hi && lo <= to);
      if !touches {
        return false;
      }
    }
    match self.max_cclass {
      Some(max) => road.cclass.is_some_and(|c| c <= max),
      None => true,
    }
  }
}

/// Whitelist keyed by uppercase mailing city.
#[derive(Debug, Clone, Default)]
pub struct ArterialTable {
  pub by_city: HashMap<String, Vec<ArterialEntry>>,
}

impl ArterialTable {
  pub fn insert(&mut self, city: &str, entry: ArterialEntry) {
    self.by_city.entry(city.to_uppercase()).or_default().push(entry);
  }

  /// The standing list for the metro cities.
  pub fn standard() -> Self {
    let mut table = Self::default();
    for entry in [
      ArterialEntry::new(None, "COBURG", Some("RD")),
      ArterialEntry::new(Some("W"), "11TH", Some("AVE")),
      ArterialEntry::new(None, "RIVER", Some("RD")).within(1, 3999),
      ArterialEntry::new(None, "WILLAMETTE", Some("ST")),
    ] {
      table.insert("EUGENE", entry);
    }
    for entry in [
      ArterialEntry::new(None, "MAIN", Some("ST")),
      ArterialEntry::new(None, "GATEWAY", Some("ST")).up_to_class(400),
      ArterialEntry::new(None, "MARCOLA", Some("RD")).within(1, 2999),
    ] {
      table.insert("SPRINGFIELD", entry);
    }
    table
  }
}

/// `"Y"` when the segment is a general arterial of its mailing city, else
/// `"N"`.
pub fn is_general_arterial(road: &RoadRecord, table: &ArterialTable) -> &'static str {
  let listed = road
    .mailing_city
    .as_deref()
    .and_then(|city| table.by_city.get(&city.to_uppercase()))
    .is_some_and(|entries| entries.iter().any(|e| e.matches(road)));
  if listed { "Y" } else { "N" }
}

#[cfg(test)]
mod tests {
  use rlid_core::record::Value;

  use super::*;

  fn road(city: &str, pre: Option<&str>, name: &str, kind: &str) -> RoadRecord {
    RoadRecord {
      id: Value::from("r"),
      mailing_city: Some(city.into()),
      pre_direction_code: pre.map(Into::into),
      street_name: Some(name.into()),
      street_type_code: Some(kind.into()),
      cclass: Some(300),
      ..RoadRecord::default()
    }
  }

  #[test]
  fn whitelist_is_scoped_by_city() {
    let table = ArterialTable::standard();
    assert_eq!(is_general_arterial(&road("Eugene", None, "COBURG", "RD"), &table), "Y");
    assert_eq!(is_general_arterial(&road("Springfield", None, "COBURG", "RD"), &table), "N");
    assert_eq!(is_general_arterial(&road("Eugene", Some("W"), "11TH", "AVE"), &table), "Y");
    assert_eq!(is_general_arterial(&road("Eugene", Some("E"), "11TH", "AVE"), &table), "N");
  }

  #[test]
  fn range_and_class_limits() {
    let table = ArterialTable::standard();
    let mut river = road("Eugene", None, "RIVER", "RD");
    river.left_from_address = Some(4001);
    river.left_to_address = Some(4099);
    assert_eq!(is_general_arterial(&river, &table), "N");
    river.left_from_address = Some(3901);
    assert_eq!(is_general_arterial(&river, &table), "Y");

    let mut gateway = road("Springfield", None, "GATEWAY", "ST");
    assert_eq!(is_general_arterial(&gateway, &table), "Y");
    gateway.cclass = Some(500);
    assert_eq!(is_general_arterial(&gateway, &table), "N");
  }
}
