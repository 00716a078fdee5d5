//! Site-address validation rules.
//!
//! Each rule is a plain function over the whole population so that
//! population-wide checks (duplicates) fit the same shape as per-record
//! ones. [`ADDRESS_RULES`] lists them in the order they run.

use std::{
  collections::{BTreeSet, HashMap, HashSet},
  sync::LazyLock,
};

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use rlid_core::{
  record::{Record, Value},
  values::concatenate_arguments,
};

use crate::{
  issue::{Issue, consolidate},
  text_of,
};

pub const ID_FIELD: &str = "site_address_gfid";

/// Largest house number the county grid assigns.
pub const MAX_HOUSE_NBR: i64 = 97999;

pub const MAPTAXLOT_GRACE_DAYS: i64 = 10;
pub const ACCOUNT_GRACE_DAYS: i64 = 45;
pub const OVERLAY_LOCK_DAYS: i64 = 15;

/// Overlay attributes that dispatch depends on.
pub const LOCKED_OVERLAYS: &[&str] = &["esn", "fire_district"];

static DRIVE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^DRVWY-\d+$").expect("drive id pattern"));

// ─── Typed record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressRecord {
  pub id:                    Value,
  pub house_nbr:             Option<i64>,
  pub house_suffix_code:     Option<String>,
  pub pre_direction_code:    Option<String>,
  pub street_name:           Option<String>,
  pub street_type_code:      Option<String>,
  pub suffix_direction_code: Option<String>,
  pub unit_type_code:        Option<String>,
  pub unit_id:               Option<String>,
  pub concat_address:        Option<String>,
  pub city_name:             Option<String>,
  pub zip_code:              Option<String>,
  pub landuse:               Option<String>,
  pub infill_code:           Option<i64>,
  pub structure_type:        Option<String>,
  pub drive_id:              Option<String>,
  pub valid:                 Option<String>,
  pub archived:              Option<String>,
  pub confidence:            Option<String>,
  pub location:              Option<String>,
  pub maptaxlot:             Option<String>,
  pub account:               Option<String>,
  pub esn:                   Option<i64>,
  pub fire_district:         Option<String>,
  pub initial_create_date:   Option<NaiveDateTime>,
  pub last_update_date:      Option<NaiveDateTime>,
}

impl AddressRecord {
  pub fn from_record(r: &Record) -> Self {
    Self {
      id:                    r.get(ID_FIELD).clone(),
      house_nbr:             r.int("house_nbr"),
      house_suffix_code:     text_of(r, "house_suffix_code"),
      pre_direction_code:    text_of(r, "pre_direction_code"),
      street_name:           text_of(r, "street_name"),
      street_type_code:      text_of(r, "street_type_code"),
      suffix_direction_code: text_of(r, "suffix_direction_code"),
      unit_type_code:        text_of(r, "unit_type_code"),
      unit_id:               text_of(r, "unit_id"),
      concat_address:        text_of(r, "concat_address"),
      city_name:             text_of(r, "city_name"),
      zip_code:              text_of(r, "zip_code"),
      landuse:               text_of(r, "landuse"),
      infill_code:           r.int("infill_code"),
      structure_type:        text_of(r, "structure_type"),
      drive_id:              text_of(r, "drive_id"),
      valid:                 text_of(r, "valid"),
      archived:              text_of(r, "archived"),
      confidence:            text_of(r, "confidence"),
      location:              text_of(r, "location"),
      maptaxlot:             text_of(r, "maptaxlot"),
      account:               text_of(r, "account"),
      esn:                   r.int("esn"),
      fire_district:         text_of(r, "fire_district"),
      initial_create_date:   r.date("initial_create_date"),
      last_update_date:      r.date("last_update_date"),
    }
  }

  pub fn key(&self) -> String { self.id.key_string() }

  pub fn is_archived(&self) -> bool { self.archived.as_deref() == Some("Y") }

  /// The full situs address, e.g. `1234 1/2 N MAIN ST APT 5`.
  pub fn full_address(&self) -> Option<String> {
    full_address(&[
      self.house_nbr.into(),
      self.house_suffix_code.clone().into(),
      self.pre_direction_code.clone().into(),
      self.street_name.clone().into(),
      self.street_type_code.clone().into(),
      self.suffix_direction_code.clone().into(),
      self.unit_type_code.clone().into(),
      self.unit_id.clone().into(),
    ])
  }

  /// `concat_address` when set, otherwise rendered from the parts.
  pub fn address_text(&self) -> Option<String> { self.concat_address.clone().or_else(|| self.full_address()) }

  /// The street-name-city lookup key of this address.
  pub fn street_key(&self) -> Option<StreetKey> {
    Some(StreetKey::new(
      self.pre_direction_code.as_deref(),
      self.street_name.as_deref()?,
      self.street_type_code.as_deref(),
      self.city_name.as_deref()?,
    ))
  }

  fn issue(&self, description: impl Into<String>, ok_to_publish: bool) -> Issue {
    Issue::new(self.id.clone(), description, ok_to_publish)
      .with_context("concat_address", self.address_text())
      .with_context("city_name", self.city_name.clone())
  }

  fn overlay(&self, name: &str) -> Value {
    match name {
      "esn" => self.esn.into(),
      "fire_district" => self.fire_district.clone().into(),
      _ => Value::Null,
    }
  }
}

/// Concatenate address parts in order, skipping nulls. Shared by the
/// rule set and the `concat_address` transform.
pub fn full_address(parts: &[Value]) -> Option<String> { concatenate_arguments(parts, " ") }

/// `(predir, name, type, city)` uppercased, absent parts empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreetKey(pub String, pub String, pub String, pub String);

impl StreetKey {
  pub fn new(pre: Option<&str>, name: &str, kind: Option<&str>, city: &str) -> Self {
    let up = |s: Option<&str>| s.map(|s| s.trim().to_uppercase()).unwrap_or_default();
    Self(up(pre), up(Some(name)), up(kind), up(Some(city)))
  }

  pub fn from_record(r: &Record) -> Option<Self> {
    Some(Self::new(
      r.text("pre_direction_code"),
      r.text("street_name")?,
      r.text("street_type_code"),
      r.text("city_name")?,
    ))
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Coded-value domains. `None` leaves the attribute unchecked.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressDomains {
  pub house_suffix:   Option<BTreeSet<String>>,
  pub zip_code:       Option<BTreeSet<String>>,
  pub landuse:        Option<BTreeSet<String>>,
  pub structure_type: Option<BTreeSet<String>>,
}

impl Default for AddressDomains {
  fn default() -> Self {
    Self {
      house_suffix:   Some(["1/4", "1/3", "1/2", "3/4", "A", "B", "C", "D", "E", "F"].map(String::from).into()),
      zip_code:       None,
      landuse:        None,
      structure_type: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AddressContext {
  pub now:          NaiveDateTime,
  /// Published addresses by subject key.
  pub published:    HashMap<String, AddressRecord>,
  /// Authoritative street names; `None` skips the cross-reference.
  pub street_names: Option<HashSet<StreetKey>>,
  pub domains:      AddressDomains,
}

impl AddressContext {
  pub fn new(now: NaiveDateTime) -> Self {
    Self { now, published: HashMap::new(), street_names: None, domains: AddressDomains::default() }
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

pub type AddressRule = fn(&[AddressRecord], &AddressContext) -> Vec<Issue>;

pub const ADDRESS_RULES: &[(&str, AddressRule)] = &[
  ("core", core_issues),
  ("street_cross_reference", street_cross_reference_issues),
  ("extended", extended_issues),
  ("maintenance", maintenance_issues),
  ("duplicates", duplicate_issues),
  ("overlay_lock", overlay_lock_issues),
];

fn null_message(field: &str) -> String { format!("'{field}' must not be 'null'.") }

fn outside(domain: &Option<BTreeSet<String>>, value: &Option<String>) -> bool {
  match (domain, value) {
    (Some(codes), Some(v)) => !codes.contains(v),
    _ => false,
  }
}

pub fn core_issues(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  let mut issues = Vec::new();
  for a in records {
    match a.house_nbr {
      None => issues.push(a.issue(null_message("house_nbr"), false)),
      Some(n) if n <= 0 => issues.push(a.issue("'house_nbr' must not be zero or negative.", false)),
      Some(n) if n > MAX_HOUSE_NBR => {
        issues.push(a.issue(format!("'house_nbr' must not be greater than {MAX_HOUSE_NBR}."), false))
      }
      Some(_) => {}
    }
    if outside(&ctx.domains.house_suffix, &a.house_suffix_code) {
      issues.push(a.issue("'house_suffix_code' must be a valid house suffix.", false));
    }
    if a.street_name.is_none() {
      issues.push(a.issue(null_message("street_name"), false));
    }
    if a.city_name.is_none() {
      issues.push(a.issue(null_message("city_name"), false));
    }
    if a.unit_type_code.is_some() && a.unit_id.is_none() {
      issues.push(a.issue("'unit_id' must not be 'null' when 'unit_type_code' is set.", false));
    }
  }
  issues
}

pub fn street_cross_reference_issues(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  let Some(names) = &ctx.street_names else { return Vec::new() };
  records
    .iter()
    .filter(|a| a.street_key().is_some_and(|k| !names.contains(&k)))
    .map(|a| a.issue("Street name must exist for the city in the street name table.", false))
    .collect()
}

pub fn extended_issues(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  let domains = &ctx.domains;
  let mut issues = Vec::new();
  for a in records {
    if let Some(zip) = &a.zip_code {
      if zip.len() != 5 || !zip.chars().all(|c| c.is_ascii_digit()) {
        issues.push(a.issue("'zip_code' must be five digits.", false));
      } else if outside(&domains.zip_code, &a.zip_code) {
        issues.push(a.issue("'zip_code' must be a valid ZIP code.", false));
      }
    }
    if outside(&domains.landuse, &a.landuse) {
      issues.push(a.issue("'landuse' must be a valid land use code.", false));
    }
    if a.infill_code.is_some_and(|c| !(0..=4).contains(&c)) {
      issues.push(a.issue("'infill_code' must be between 0 and 4.", false));
    }
    if outside(&domains.structure_type, &a.structure_type) {
      issues.push(a.issue("'structure_type' must be a valid structure type.", false));
    }
    if a.drive_id.as_deref().is_some_and(|d| !DRIVE_ID.is_match(d)) {
      issues.push(a.issue("'drive_id' must look like 'DRVWY-<number>'.", false));
    }
  }
  issues
}

pub fn maintenance_issues(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  let older_than = |a: &AddressRecord, days: i64| {
    a.initial_create_date.is_some_and(|created| ctx.now - created > Duration::days(days))
  };
  let mut issues = Vec::new();
  for a in records {
    for (name, value) in [("valid", &a.valid), ("archived", &a.archived)] {
      if !matches!(value.as_deref(), Some("Y" | "N")) {
        issues.push(a.issue(format!("'{name}' must be 'Y' or 'N'."), false));
      }
    }
    if !matches!(a.confidence.as_deref(), None | Some("L" | "M" | "H")) {
      issues.push(a.issue("'confidence' must be 'L', 'M', 'H' or 'null'.", false));
    }
    if !matches!(a.location.as_deref(), None | Some("APPROXIMATE" | "VERIFIED")) {
      issues.push(a.issue("'location' must be 'APPROXIMATE', 'VERIFIED' or 'null'.", false));
    }
    if a.maptaxlot.is_none() && older_than(a, MAPTAXLOT_GRACE_DAYS) {
      issues.push(a.issue(
        format!("'maptaxlot' is still 'null' {MAPTAXLOT_GRACE_DAYS} days after creation."),
        true,
      ));
    }
    if a.maptaxlot.is_some() && a.account.is_none() && older_than(a, ACCOUNT_GRACE_DAYS) {
      issues.push(a.issue(
        format!("'account' is still 'null' {ACCOUNT_GRACE_DAYS} days after creation."),
        true,
      ));
    }
  }
  issues
}

/// Non-archived addresses sharing an address and city. The oldest of each
/// group may publish; the rest may not.
pub fn duplicate_issues(records: &[AddressRecord], _ctx: &AddressContext) -> Vec<Issue> {
  let mut groups: HashMap<(String, String), Vec<&AddressRecord>> = HashMap::new();
  for a in records.iter().filter(|a| !a.is_archived()) {
    let (Some(address), Some(city)) = (a.address_text(), &a.city_name) else { continue };
    groups.entry((address.to_uppercase(), city.to_uppercase())).or_default().push(a);
  }

  let mut duplicated: Vec<Vec<&AddressRecord>> = groups.into_values().filter(|g| g.len() > 1).collect();
  for group in &mut duplicated {
    // Undated records sort after dated ones.
    group.sort_by(|a, b| {
      (a.initial_create_date.is_none(), a.initial_create_date, a.key())
        .cmp(&(b.initial_create_date.is_none(), b.initial_create_date, b.key()))
    });
  }
  duplicated.sort_by_key(|g| g[0].key());

  duplicated
    .into_iter()
    .flat_map(|group| {
      group
        .into_iter()
        .enumerate()
        .map(|(i, a)| a.issue("Address duplicates another address in the same city.", i == 0))
    })
    .collect()
}

/// Dispatch overlays must not move within the lock window after an edit.
pub fn overlay_lock_issues(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  let mut issues = Vec::new();
  for a in records {
    let Some(published) = ctx.published.get(&a.key()) else { continue };
    let recently_edited = a
      .last_update_date
      .is_some_and(|edited| ctx.now - edited <= Duration::days(OVERLAY_LOCK_DAYS));
    if !recently_edited {
      continue;
    }
    for &name in LOCKED_OVERLAYS {
      if a.overlay(name) != published.overlay(name) {
        issues.push(a.issue(
          format!("'{name}' must not change within {OVERLAY_LOCK_DAYS} days of an edit."),
          false,
        ));
      }
    }
  }
  issues
}

/// Run every rule in order and collapse repeated issue keys.
pub fn validate_addresses(records: &[AddressRecord], ctx: &AddressContext) -> Vec<Issue> {
  consolidate(ADDRESS_RULES.iter().flat_map(|(_, rule)| rule(records, ctx)).collect())
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn now() -> NaiveDateTime { NaiveDate::from_ymd_opt(2024, 6, 30).unwrap().and_hms_opt(12, 0, 0).unwrap() }

  fn days_ago(days: i64) -> Option<NaiveDateTime> { Some(now() - Duration::days(days)) }

  fn address(id: &str, house: i64) -> AddressRecord {
    AddressRecord {
      id: Value::from(id),
      house_nbr: Some(house),
      street_name: Some("MAIN".into()),
      street_type_code: Some("ST".into()),
      city_name: Some("EUGENE".into()),
      valid: Some("Y".into()),
      archived: Some("N".into()),
      maptaxlot: Some("1703201100100".into()),
      account: Some("0123456".into()),
      ..AddressRecord::default()
    }
  }

  fn descriptions(issues: &[Issue]) -> Vec<&str> { issues.iter().map(|i| i.description.as_str()).collect() }

  #[test]
  fn a_clean_address_raises_nothing() {
    let mut ctx = AddressContext::new(now());
    ctx.street_names = Some([StreetKey::new(None, "MAIN", Some("ST"), "EUGENE")].into());
    assert!(validate_addresses(&[address("a", 100)], &ctx).is_empty());
  }

  #[test]
  fn house_number_bounds() {
    let ctx = AddressContext::new(now());
    assert!(core_issues(&[address("a", 97999)], &ctx).is_empty());
    assert_eq!(
      descriptions(&core_issues(&[address("a", 98000)], &ctx)),
      vec!["'house_nbr' must not be greater than 97999."]
    );
    let zero = core_issues(&[address("a", 0)], &ctx);
    assert_eq!(descriptions(&zero), vec!["'house_nbr' must not be zero or negative."]);
    assert!(!zero[0].ok_to_publish);
  }

  #[test]
  fn unit_type_requires_unit_id() {
    let ctx = AddressContext::new(now());
    let mut a = address("a", 10);
    a.unit_type_code = Some("APT".into());
    assert_eq!(
      descriptions(&core_issues(&[a.clone()], &ctx)),
      vec!["'unit_id' must not be 'null' when 'unit_type_code' is set."]
    );
    a.unit_id = Some("5".into());
    assert!(core_issues(&[a], &ctx).is_empty());
  }

  #[test]
  fn missing_city_blocks_publication() {
    let ctx = AddressContext::new(now());
    let mut a = address("b", 10);
    a.city_name = None;
    let issues = core_issues(&[a], &ctx);
    assert_eq!(descriptions(&issues), vec!["'city_name' must not be 'null'."]);
    assert_eq!(issues[0].context.get("city_name"), Some(&Value::Null));
  }

  #[test]
  fn unknown_streets_are_flagged() {
    let mut ctx = AddressContext::new(now());
    ctx.street_names = Some([StreetKey::new(None, "OAK", Some("ST"), "EUGENE")].into());
    let issues = street_cross_reference_issues(&[address("a", 10)], &ctx);
    assert_eq!(issues.len(), 1);
    assert!(!issues[0].ok_to_publish);
  }

  #[test]
  fn extended_attribute_checks() {
    let ctx = AddressContext::new(now());
    let mut a = address("a", 10);
    a.zip_code = Some("9740".into());
    a.infill_code = Some(5);
    a.drive_id = Some("DRVWY-12".into());
    assert_eq!(
      descriptions(&extended_issues(&[a.clone()], &ctx)),
      vec!["'zip_code' must be five digits.", "'infill_code' must be between 0 and 4."]
    );
    a.drive_id = Some("DRIVE-12".into());
    a.zip_code = Some("97401".into());
    a.infill_code = Some(4);
    assert_eq!(descriptions(&extended_issues(&[a], &ctx)), vec!["'drive_id' must look like 'DRVWY-<number>'."]);
  }

  #[test]
  fn maintenance_grace_periods_are_informational() {
    let ctx = AddressContext::new(now());
    let mut fresh = address("fresh", 10);
    fresh.maptaxlot = None;
    fresh.initial_create_date = days_ago(5);
    assert!(maintenance_issues(&[fresh], &ctx).is_empty());

    let mut stale = address("stale", 10);
    stale.maptaxlot = None;
    stale.initial_create_date = days_ago(11);
    let issues = maintenance_issues(&[stale], &ctx);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].ok_to_publish);

    let mut no_account = address("acct", 10);
    no_account.account = None;
    no_account.initial_create_date = days_ago(30);
    assert!(maintenance_issues(&[no_account.clone()], &ctx).is_empty());
    no_account.initial_create_date = days_ago(46);
    assert_eq!(maintenance_issues(&[no_account], &ctx).len(), 1);
  }

  #[test]
  fn maintenance_domains() {
    let ctx = AddressContext::new(now());
    let mut a = address("a", 10);
    a.valid = Some("X".into());
    a.confidence = Some("Q".into());
    a.location = Some("VERIFIED".into());
    assert_eq!(
      descriptions(&maintenance_issues(&[a], &ctx)),
      vec!["'valid' must be 'Y' or 'N'.", "'confidence' must be 'L', 'M', 'H' or 'null'."]
    );
  }

  #[test]
  fn oldest_duplicate_may_publish() {
    let ctx = AddressContext::new(now());
    let mut older = address("older", 10);
    older.initial_create_date = days_ago(100);
    let mut newer = address("newer", 10);
    newer.initial_create_date = days_ago(1);
    let mut archived = address("archived", 10);
    archived.archived = Some("Y".into());
    let other = address("other", 12);

    let issues = duplicate_issues(&[newer, archived, older, other], &ctx);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].subject, Value::from("older"));
    assert!(issues[0].ok_to_publish);
    assert_eq!(issues[1].subject, Value::from("newer"));
    assert!(!issues[1].ok_to_publish);
  }

  #[test]
  fn overlays_lock_after_recent_edits() {
    let mut ctx = AddressContext::new(now());
    let mut published = address("a", 10);
    published.fire_district = Some("Eugene".into());
    published.esn = Some(1);
    ctx.published.insert("a".into(), published.clone());

    let mut edited = published.clone();
    edited.fire_district = Some("Lane Fire".into());
    edited.last_update_date = days_ago(3);
    assert_eq!(
      descriptions(&overlay_lock_issues(&[edited.clone()], &ctx)),
      vec!["'fire_district' must not change within 15 days of an edit."]
    );
    edited.last_update_date = days_ago(20);
    assert!(overlay_lock_issues(&[edited], &ctx).is_empty());
  }

  #[test]
  fn full_address_skips_missing_parts() {
    let mut a = address("a", 1234);
    a.house_suffix_code = Some("1/2".into());
    a.pre_direction_code = Some("N".into());
    assert_eq!(a.full_address().as_deref(), Some("1234 1/2 N MAIN ST"));
  }
}
