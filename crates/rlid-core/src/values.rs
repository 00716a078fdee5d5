//! Pure value-cleaning functions used by transforms and derivation rules.
//!
//! Every function is total: bad input yields `None` or the supplied default,
//! never a panic.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use strum::{Display, EnumString};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::record::Value;

/// Trim and collapse runs of whitespace to a single space. An empty result
/// becomes `None` when `clear_empty` is set.
pub fn clean_whitespace(s: &str, clear_empty: bool) -> Option<String> {
  let cleaned = s.split_whitespace().collect::<Vec<_>>().join(" ");
  if cleaned.is_empty() && clear_empty { None } else { Some(cleaned) }
}

/// [`clean_whitespace`] lifted over attribute values; non-text passes
/// through untouched.
pub fn clean_whitespace_value(v: &Value) -> Value {
  match v {
    Value::Text(s) => clean_whitespace(s, true).into(),
    other => other.clone(),
  }
}

/// Stringify each non-null argument, strip it and join with `separator`.
/// All-null (or all-blank) input yields `None`.
pub fn concatenate_arguments(args: &[Value], separator: &str) -> Option<String> {
  let parts: Vec<String> = args
    .iter()
    .filter(|v| !v.is_null())
    .map(|v| v.to_string().trim().to_owned())
    .filter(|s| !s.is_empty())
    .collect();
  if parts.is_empty() { None } else { Some(parts.join(separator)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Case {
  Lower,
  Upper,
  Title,
}

/// Force `s` into `case`. Title case capitalises the first letter of every
/// alphanumeric run and lowercases the rest.
pub fn force_case(s: Option<&str>, case: Case) -> Option<String> {
  let s = s?;
  Some(match case {
    Case::Lower => s.to_lowercase(),
    Case::Upper => s.to_uppercase(),
    Case::Title => {
      let mut out = String::with_capacity(s.len());
      let mut at_word_start = true;
      for ch in s.chars() {
        if ch.is_alphanumeric() {
          if at_word_start {
            out.extend(ch.to_uppercase());
          } else {
            out.extend(ch.to_lowercase());
          }
          at_word_start = false;
        } else {
          out.push(ch);
          at_word_start = true;
        }
      }
      out
    }
  })
}

/// `"Y"`/`"N"` for literal y/n input (either case), otherwise `default`.
pub fn force_yn(v: &Value, default: Option<&str>) -> Option<String> {
  match v.as_str().map(str::trim) {
    Some("Y" | "y") => Some("Y".to_owned()),
    Some("N" | "n") => Some("N".to_owned()),
    _ => default.map(str::to_owned),
  }
}

/// Whether `v` is (or parses as) a finite number. `Null` answers
/// `nonetype_ok`.
pub fn is_numeric(v: &Value, nonetype_ok: bool) -> bool {
  match v {
    Value::Null => nonetype_ok,
    Value::Int(_) => true,
    Value::Float(f) => f.is_finite(),
    Value::Text(s) => s.trim().parse::<f64>().is_ok_and(f64::is_finite),
    _ => false,
  }
}

const DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%m/%d/%Y %H:%M:%S",
  "%m/%d/%Y %I:%M:%S %p",
  "%m/%d/%Y %H:%M",
  "%Y%m%d%H%M%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%Y%m%d", "%d-%b-%Y", "%B %d, %Y"];

/// Permissive timestamp parse over the layouts upstream systems emit.
pub fn datetime_from_string(s: &str) -> Option<NaiveDateTime> {
  let s = s.trim();
  if s.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.naive_local());
  }
  DATETIME_FORMATS
    .iter()
    .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    .or_else(|| {
      DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Split a 13-character map-taxlot into `2-2-2-2-5` groups. Identifiers of
/// any other length come back unchanged.
pub fn maptaxlot_separated(s: &str, sep: &str) -> String {
  const GROUPS: [usize; 5] = [2, 2, 2, 2, 5];
  let trimmed = s.trim();
  if trimmed.chars().count() != GROUPS.iter().sum::<usize>() {
    return trimmed.to_owned();
  }
  let chars: Vec<char> = trimmed.chars().collect();
  let mut start = 0;
  let mut groups = Vec::with_capacity(GROUPS.len());
  for width in GROUPS {
    groups.push(chars[start..start + width].iter().collect::<String>());
    start += width;
  }
  groups.join(sep)
}

/// Remove diacritics by decomposing and dropping combining marks.
pub fn strip_diacritics(s: &str) -> String { s.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect() }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn whitespace_is_collapsed_and_idempotent() {
    let once = clean_whitespace("  Main \t\n  St  ", true);
    assert_eq!(once.as_deref(), Some("Main St"));
    assert_eq!(clean_whitespace(once.as_deref().unwrap(), true), once);
    assert_eq!(clean_whitespace(" \t ", true), None);
    assert_eq!(clean_whitespace(" \t ", false).as_deref(), Some(""));
  }

  #[test]
  fn concatenation_skips_nulls() {
    let args = [Value::Int(100), Value::Null, Value::from(" MAIN "), Value::from("ST")];
    assert_eq!(concatenate_arguments(&args, " ").as_deref(), Some("100 MAIN ST"));
    assert_eq!(concatenate_arguments(&[Value::Null, Value::Null], " "), None);
  }

  #[test]
  fn case_forcing() {
    assert_eq!(force_case(Some("o'brien rd"), Case::Title).as_deref(), Some("O'Brien Rd"));
    assert_eq!(force_case(None, Case::Upper), None);
    assert_eq!("title".parse::<Case>().unwrap(), Case::Title);
  }

  #[test]
  fn yn_coercion() {
    assert_eq!(force_yn(&Value::from("y"), None).as_deref(), Some("Y"));
    assert_eq!(force_yn(&Value::from("yes"), Some("N")).as_deref(), Some("N"));
    assert_eq!(force_yn(&Value::Null, None), None);
  }

  #[test]
  fn numeric_test() {
    assert!(is_numeric(&Value::Null, true));
    assert!(!is_numeric(&Value::Null, false));
    assert!(is_numeric(&Value::from("12.5"), true));
    assert!(!is_numeric(&Value::Float(f64::NAN), true));
    assert!(!is_numeric(&Value::from("inf"), true));
  }

  #[test]
  fn dates_parse_permissively() {
    assert!(datetime_from_string("2024-03-01").is_some());
    assert!(datetime_from_string("3/1/2024 13:45:00").is_some());
    assert!(datetime_from_string("2024-03-01T08:00:00-08:00").is_some());
    assert!(datetime_from_string("not a date").is_none());
  }

  #[test]
  fn maptaxlot_groups() {
    assert_eq!(maptaxlot_separated("1703250000100", "-"), "17-03-25-00-00100");
    assert_eq!(maptaxlot_separated("123", "-"), "123");
  }

  #[test]
  fn diacritics_removed() {
    assert_eq!(strip_diacritics("Café Señor"), "Cafe Senor");
  }
}
