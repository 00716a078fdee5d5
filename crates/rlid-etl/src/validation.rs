//! Validation runs: load a subject population, run the rule set, reconcile
//! the issue dataset and work out which subjects publication must hold
//! back or roll back.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use rlid_core::{
  catalog::{Catalog, keys, tags},
  record::Record,
  store::{GisStore, ReadQuery, UpdateCounts},
};
use rlid_gis::cursor::{self, Key, ensure_dataset};
use rlid_rules::{
  Issue, PublicationSets,
  address::{self, AddressContext, AddressDomains, AddressRecord, StreetKey},
  issue::{DESCRIPTION_FIELD, merge_prior, prior_annotations},
  road::{self, RoadRecord},
};

use crate::Result;

/// Outcome of one validation run.
#[derive(Debug, Clone, Default)]
pub struct ValidationRun {
  pub issues:       Vec<Issue>,
  pub sets:         PublicationSets,
  /// Changes written to the issue dataset.
  pub issue_counts: UpdateCounts,
}

impl ValidationRun {
  /// Issues that keep their subject out of publication this run.
  pub fn blocking_issues(&self) -> Vec<&Issue> {
    self
      .issues
      .iter()
      .filter(|i| {
        !i.ok_to_publish && {
          let key = i.subject_key();
          self.sets.hold.contains(&key) || self.sets.rollback.contains(&key)
        }
      })
      .collect()
  }
}

fn keys_of(records: &[Record], id_field: &str) -> HashSet<String> {
  records.iter().map(|r| r.get(id_field).key_string()).filter(|k| !k.is_empty()).collect()
}

/// Merge prior annotations into `issues`, write them to `issue_path`
/// (dropping issues that no longer occur) and compute the publication sets.
pub async fn reconcile<S: GisStore>(
  store: &S,
  issue_path: &str,
  id_field: &str,
  mut issues: Vec<Issue>,
  transformed: &HashSet<String>,
  published: &HashSet<String>,
  now: NaiveDateTime,
) -> Result<ValidationRun> {
  let prior_rows = store.read(issue_path, &ReadQuery::all()).await?;
  let prior = prior_annotations(&prior_rows, id_field);
  merge_prior(&mut issues, &prior, now);

  let key_fields = [id_field.to_owned(), DESCRIPTION_FIELD.to_owned()];
  let rows = issues.iter().map(|i| i.to_record(id_field)).collect();
  let issue_counts = cursor::update_from_records(store, issue_path, rows, &key_fields, true).await?;
  let sets = PublicationSets::compute(&issues, transformed, published);
  info!(
    dataset = issue_path,
    issues = issues.len(),
    hold = sets.hold.len(),
    rollback = sets.rollback.len(),
    ?issue_counts,
    "validation reconciled"
  );
  Ok(ValidationRun { issues, sets, issue_counts })
}

/// Drop held subjects from `working` and revert rolled-back ones to their
/// published rows.
pub async fn apply_publication_sets<S: GisStore>(
  store: &S,
  working: &str,
  published: &str,
  id_field: &str,
  sets: &PublicationSets,
) -> Result<()> {
  let key_fields = [id_field.to_owned()];
  let as_keys = |subjects: &BTreeSet<String>| -> HashSet<Key> { subjects.iter().map(|s| vec![s.clone()]).collect() };

  let held = cursor::delete_by_keys(store, working, &key_fields, &as_keys(&sets.hold)).await?;
  if sets.rollback.is_empty() {
    debug!(dataset = working, held, "publication sets applied");
    return Ok(());
  }
  let rollback = as_keys(&sets.rollback);
  cursor::delete_by_keys(store, working, &key_fields, &rollback).await?;
  let previous: Vec<Record> = store
    .read(published, &ReadQuery::all())
    .await?
    .into_iter()
    .filter(|r| rollback.contains(&r.key(&key_fields)))
    .map(|r| Record { oid: None, ..r })
    .collect();
  let restored = store.insert(working, previous).await?;
  debug!(dataset = working, held, restored, "publication sets applied");
  Ok(())
}

// ─── Addresses ───────────────────────────────────────────────────────────────

/// Coded-value domain as a code set, or `None` when the store has no such
/// domain.
async fn domain_codes<S: GisStore>(store: &S, workspace: &str, name: &str) -> Result<Option<BTreeSet<String>>> {
  match store.domain(workspace, name).await {
    Ok(domain) => Ok(Some(domain.into_keys().collect())),
    Err(rlid_core::Error::UnknownDomain { .. }) => Ok(None),
    Err(e) => Err(e.into()),
  }
}

/// Everything the address rules consult besides the records themselves.
pub async fn address_context<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  now: NaiveDateTime,
) -> Result<AddressContext> {
  let mut ctx = AddressContext::new(now);

  let published_path = catalog.path(keys::SITE_ADDRESS, Some(tags::PUB))?;
  if store.dataset_exists(&published_path).await? {
    ctx.published = store
      .read(&published_path, &ReadQuery::all())
      .await?
      .iter()
      .map(AddressRecord::from_record)
      .map(|a| (a.key(), a))
      .collect();
  }

  let street_path = catalog.path(keys::STREET_NAME_CITY, Some(tags::SOURCE))?;
  if store.dataset_exists(&street_path).await? {
    let names: HashSet<StreetKey> =
      store.read(&street_path, &ReadQuery::all()).await?.iter().filter_map(StreetKey::from_record).collect();
    ctx.street_names = Some(names);
  }

  let defaults = AddressDomains::default();
  ctx.domains = AddressDomains {
    house_suffix:   domain_codes(store, "Addressing", "HouseSuffix").await?.or(defaults.house_suffix),
    zip_code:       domain_codes(store, "Addressing", "ZIPCode").await?,
    landuse:        domain_codes(store, "Addressing", "LandUse").await?,
    structure_type: domain_codes(store, "Addressing", "StructureType").await?,
  };
  Ok(ctx)
}

/// Validate the addresses in `working` against the published set and
/// reconcile the address issue dataset.
pub async fn validate_addresses<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  working: &str,
  now: NaiveDateTime,
) -> Result<ValidationRun> {
  let issue_path = catalog.path(keys::ADDRESS_ISSUES, Some(tags::MAINT))?;
  ensure_dataset(store, &issue_path, &catalog.describe(keys::ADDRESS_ISSUES)?.schema(None)).await?;

  let rows = store.read(working, &ReadQuery::all()).await?;
  let records: Vec<AddressRecord> = rows.iter().map(AddressRecord::from_record).collect();
  let ctx = address_context(store, catalog, now).await?;
  let issues = address::validate_addresses(&records, &ctx);

  let transformed = keys_of(&rows, address::ID_FIELD);
  let published: HashSet<String> = ctx.published.keys().cloned().collect();
  reconcile(store, &issue_path, address::ID_FIELD, issues, &transformed, &published, now).await
}

// ─── Roads ───────────────────────────────────────────────────────────────────

pub async fn validate_roads<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  working: &str,
  now: NaiveDateTime,
) -> Result<ValidationRun> {
  let issue_path = catalog.path(keys::ROAD_ISSUES, Some(tags::MAINT))?;
  ensure_dataset(store, &issue_path, &catalog.describe(keys::ROAD_ISSUES)?.schema(None)).await?;

  let rows = store.read(working, &ReadQuery::all()).await?;
  let records: Vec<RoadRecord> = rows.iter().map(RoadRecord::from_record).collect();
  let issues = road::validate_roads(&records);

  let published_path = catalog.path(keys::ROAD, Some(tags::PUB))?;
  let published = if store.dataset_exists(&published_path).await? {
    keys_of(&store.read(&published_path, &ReadQuery::fields(&[road::ID_FIELD])).await?, road::ID_FIELD)
  } else {
    HashSet::new()
  };
  let transformed = keys_of(&rows, road::ID_FIELD);
  reconcile(store, &issue_path, road::ID_FIELD, issues, &transformed, &published, now).await
}

/// Issue counts by description, for logging.
pub fn summarize(issues: &[Issue]) -> HashMap<&str, usize> {
  let mut out = HashMap::new();
  for i in issues {
    *out.entry(i.description.as_str()).or_default() += 1;
  }
  out
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use rlid_core::record::Value;
  use rlid_store_sqlite::SqliteStore;
  use uuid::Uuid;

  use super::*;

  fn now() -> NaiveDateTime { NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 0, 0).unwrap() }

  #[tokio::test]
  async fn reconcile_keeps_annotations_and_drops_stale_issues() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let catalog = Catalog::standard();
    let path = catalog.path(keys::ROAD_ISSUES, Some(tags::MAINT)).unwrap();
    store.create_dataset(&path, &catalog.describe(keys::ROAD_ISSUES).unwrap().schema(None)).await.unwrap();

    let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
    let first = vec![
      Issue::new(Value::from(s1), "'seg_id' must not be 'null'.", false),
      Issue::new(Value::from(s2), "'cclass' must be a valid cartographic class.", false),
    ];
    let both: HashSet<String> = [s1.to_string(), s2.to_string()].into();
    reconcile(&store, &path, road::ID_FIELD, first, &both, &HashSet::new(), now()).await.unwrap();

    let rows = store.read(&path, &ReadQuery::all()).await.unwrap();
    assert_eq!(rows.len(), 2);

    // s2 was fixed; s1 still fails and carries a maintainer note.
    let oid = rows.iter().find(|r| r.get(road::ID_FIELD) == &Value::from(s1)).unwrap().oid;
    let mut note = Record { oid, ..Record::new() };
    note.set("maint_notes", "waiting on survey");
    store.update(&path, vec![note]).await.unwrap();

    let later = now() + chrono::Duration::days(3);
    let second = vec![Issue::new(Value::from(s1), "'seg_id' must not be 'null'.", false)];
    let run = reconcile(&store, &path, road::ID_FIELD, second, &both, &HashSet::new(), later).await.unwrap();
    assert_eq!(run.issue_counts.deleted, 1);
    assert_eq!(run.issue_counts.unchanged, 1);
    assert_eq!(run.issues[0].maint_notes.as_deref(), Some("waiting on survey"));
    assert_eq!(run.issues[0].maint_init_date, Some(now()));
    assert_eq!(run.sets.hold.iter().cloned().collect::<Vec<_>>(), [s1.to_string()]);
    assert!(run.sets.rollback.is_empty());

    let rows = store.read(&path, &ReadQuery::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("maint_notes"), Some("waiting on survey"));
  }

  #[tokio::test]
  async fn missing_domains_fall_back_and_present_ones_are_used() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store.add_domain("Addressing", "ZIPCode", &[("97401", "Eugene"), ("97477", "Springfield")]).await.unwrap();
    let ctx = address_context(&store, &Catalog::standard(), now()).await.unwrap();
    let zip: Vec<&str> = ctx.domains.zip_code.as_ref().unwrap().iter().map(String::as_str).collect();
    assert_eq!(zip, ["97401", "97477"]);
    assert!(ctx.domains.landuse.is_none());
    assert_eq!(ctx.domains.house_suffix, AddressDomains::default().house_suffix);
  }

  #[test]
  fn summary_counts_by_description() {
    let issues = [
      Issue::new(Value::from("a"), "x", false),
      Issue::new(Value::from("b"), "x", false),
      Issue::new(Value::from("c"), "y", true),
    ];
    let summary = summarize(&issues);
    assert_eq!(summary["x"], 2);
    assert_eq!(summary["y"], 1);
  }
}
