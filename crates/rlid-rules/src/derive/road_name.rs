//! The display name RLID shows for a road segment.

use rlid_core::values::{Case, force_case};

use crate::road::RoadRecord;

const ACRONYMS: [&str; 13] = ["NE", "NW", "SE", "SW", "EB", "NB", "SB", "WB", "II", "III", "IV", "BLM", "US"];

const ABBREVIATIONS: [(&str, &str); 6] = [
  ("CG", "Campground"),
  ("EX", "Extension"),
  ("FS", "Forest Service"),
  ("LS", "Logging Spur"),
  ("TS", "Timber Sale"),
  ("WC", "Water Control"),
];

fn render_word(word: &str) -> String {
  let upper = word.to_uppercase();
  if ACRONYMS.contains(&upper.as_str()) {
    return upper;
  }
  if let Some((_, long)) = ABBREVIATIONS.iter().find(|(short, _)| *short == upper) {
    return (*long).to_owned();
  }
  if upper == "RIVERBEND" {
    return "RiverBend".to_owned();
  }
  // Title case already renders ordinals as `1st`, `22nd`.
  let titled = force_case(Some(word), Case::Title).unwrap_or_default();
  match titled.strip_prefix("Mc") {
    Some(rest) if !rest.is_empty() => {
      let mut chars = rest.chars();
      let first = chars.next().map(|c| c.to_uppercase().to_string()).unwrap_or_default();
      format!("Mc{first}{}", chars.as_str())
    }
    _ => titled,
  }
}

/// Title-case a street name word by word.
pub fn render_street_name(name: &str) -> String {
  name.split_whitespace().map(render_word).collect::<Vec<_>>().join(" ")
}

/// `[PREDIR] Name [Type] [SUFDIR]`; empty for private or unnamed roads.
pub fn rlid_road_name(road: &RoadRecord) -> String {
  if road.is_unnamed() {
    return String::new();
  }
  let mut parts: Vec<String> = Vec::new();
  parts.extend(road.pre_direction_code.as_deref().map(str::to_uppercase));
  parts.extend(road.street_name.as_deref().map(render_street_name));
  parts.extend(road.street_type_code.as_deref().and_then(|t| force_case(Some(t), Case::Title)));
  parts.extend(road.suffix_direction_code.as_deref().map(str::to_uppercase));
  parts.retain(|p| !p.is_empty());
  parts.join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn named(pre: Option<&str>, name: Option<&str>, kind: Option<&str>, suf: Option<&str>) -> RoadRecord {
    RoadRecord {
      pre_direction_code: pre.map(Into::into),
      street_name: name.map(Into::into),
      street_type_code: kind.map(Into::into),
      suffix_direction_code: suf.map(Into::into),
      ..RoadRecord::default()
    }
  }

  #[test]
  fn title_case_with_uppercase_directions() {
    assert_eq!(rlid_road_name(&named(Some("N"), Some("WILLAMETTE"), Some("ST"), None)), "N Willamette St");
    assert_eq!(rlid_road_name(&named(None, Some("21ST"), Some("AVE"), Some("SE"))), "21st Ave SE");
  }

  #[test]
  fn acronyms_abbreviations_and_special_cases() {
    assert_eq!(render_street_name("BLM ROAD 17-3-22"), "BLM Road 17-3-22");
    assert_eq!(render_street_name("FS 2200 LS"), "Forest Service 2200 Logging Spur");
    assert_eq!(render_street_name("MCKENZIE VIEW"), "McKenzie View");
    assert_eq!(render_street_name("RIVERBEND"), "RiverBend");
    assert_eq!(render_street_name("LOOP NE"), "Loop NE");
    assert_eq!(render_street_name("HENRY III"), "Henry III");
  }

  #[test]
  fn private_and_unnamed_render_empty() {
    assert_eq!(rlid_road_name(&named(None, None, Some("RD"), None)), "");
    assert_eq!(rlid_road_name(&named(None, Some("PRIVATE"), Some("RD"), None)), "");
    assert_eq!(rlid_road_name(&named(None, Some("UNNAMED 12"), None, None)), "");
  }
}
