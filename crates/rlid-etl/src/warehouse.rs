//! Warehouse dataset updates and their bookkeeping rows.

use chrono::NaiveDateTime;
use tracing::{error, info};
use uuid::Uuid;

use rlid_core::{
  catalog::{Catalog, keys, tags},
  record::Record,
  store::{GisStore, ReadQuery, UpdateCounts},
};
use rlid_gis::cursor::{self, ensure_dataset};

use crate::{Error, Result};

/// How one warehouse dataset is brought up to date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetUpdate {
  pub name:              String,
  pub source:            String,
  pub target:            String,
  pub source_where:      Option<String>,
  /// Log this instead of touching the target.
  pub no_update_message: Option<String>,
  /// Keys for a differential update; truncate-and-load when absent.
  pub id_field_names:    Option<Vec<String>>,
  /// Snapshot the live target here before updating it.
  pub last_load:         Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateMode<'a> {
  Skip(&'a str),
  Keyed(&'a [String]),
  TruncateLoad,
}

impl DatasetUpdate {
  pub fn new(name: &str, source: &str, target: &str) -> Self {
    Self {
      name:              name.to_owned(),
      source:            source.to_owned(),
      target:            target.to_owned(),
      source_where:      None,
      no_update_message: None,
      id_field_names:    None,
      last_load:         None,
    }
  }

  pub fn keyed(mut self, id_fields: &[&str]) -> Self {
    self.id_field_names = Some(id_fields.iter().map(|f| f.to_string()).collect());
    self
  }

  pub fn mode(&self) -> UpdateMode<'_> {
    if let Some(message) = &self.no_update_message {
      UpdateMode::Skip(message)
    } else if let Some(ids) = &self.id_field_names {
      UpdateMode::Keyed(ids)
    } else {
      UpdateMode::TruncateLoad
    }
  }
}

/// One update per catalog dataset with a warehouse path, fed from its
/// published copy.
pub fn warehouse_datasets(catalog: &Catalog) -> Result<Vec<DatasetUpdate>> {
  let mut updates = Vec::new();
  for key in catalog.keys_with_tag(tags::WAREHOUSE) {
    let descriptor = catalog.describe(key)?;
    let mut update =
      DatasetUpdate::new(key, &catalog.path(key, Some(tags::PUB))?, &catalog.path(key, Some(tags::WAREHOUSE))?);
    let ids = catalog.id_field_names(key)?;
    if !ids.is_empty() {
      update.id_field_names = Some(ids);
    }
    if descriptor.paths.contains_key(tags::LAST_LOAD) {
      update.last_load = Some(catalog.path(key, Some(tags::LAST_LOAD))?);
    }
    updates.push(update);
  }
  Ok(updates)
}

/// Append the bookkeeping row for one dataset update.
pub async fn record_update<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  dataset: &str,
  counts: &UpdateCounts,
  truncate_load: bool,
  checked: NaiveDateTime,
) -> Result<()> {
  let path = catalog.path(keys::DATASET_UPDATE, None)?;
  ensure_dataset(store, &path, &catalog.describe(keys::DATASET_UPDATE)?.schema(None)).await?;
  let row = Record::new()
    .with("update_id", Uuid::new_v4())
    .with("dataset_name", dataset)
    .with("checked", checked)
    .with("deleted_row_count", counts.deleted as i64)
    .with("inserted_row_count", counts.inserted as i64)
    .with("altered_row_count", counts.altered as i64)
    .with("unchanged_row_count", counts.unchanged as i64)
    .with("total_row_count", counts.total() as i64)
    .with("updated_row_count", counts.updated(truncate_load) as i64);
  store.insert(&path, vec![row]).await?;
  Ok(())
}

/// Run one dataset update and record it.
pub async fn update_dataset<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  update: &DatasetUpdate,
  now: NaiveDateTime,
) -> Result<UpdateCounts> {
  let mode = update.mode();
  let counts = match mode {
    UpdateMode::Skip(message) => {
      info!(dataset = %update.name, message, "update skipped");
      let unchanged = if store.dataset_exists(&update.target).await? {
        store.count(&update.target, None).await?
      } else {
        0
      };
      UpdateCounts { unchanged, ..UpdateCounts::default() }
    }
    UpdateMode::Keyed(_) | UpdateMode::TruncateLoad => {
      let schema = store.describe(&update.source).await?;
      ensure_dataset(store, &update.target, &schema).await?;
      if let Some(last_load) = &update.last_load {
        ensure_dataset(store, last_load, &store.describe(&update.target).await?).await?;
        let live = store.read(&update.target, &ReadQuery::all()).await?;
        let snapshot = cursor::load_records(store, last_load, live).await?;
        info!(dataset = %update.name, last_load = %last_load, rows = snapshot.inserted, "last-load snapshot taken");
      }
      let records = store.read(&update.source, &ReadQuery::all().filter(update.source_where.as_deref())).await?;
      match mode {
        UpdateMode::Keyed(ids) => cursor::update_from_records(store, &update.target, records, ids, true).await?,
        _ => cursor::load_records(store, &update.target, records).await?,
      }
    }
  };
  let truncate = matches!(mode, UpdateMode::TruncateLoad);
  record_update(store, catalog, &update.name, &counts, truncate, now).await?;
  info!(dataset = %update.name, ?counts, "dataset updated");
  Ok(counts)
}

/// Run every update. A failure does not stop the rest; the batch fails
/// afterwards if any update did.
pub async fn run_dataset_updates<S: GisStore>(
  store: &S,
  catalog: &Catalog,
  updates: &[DatasetUpdate],
  now: NaiveDateTime,
) -> Result<Vec<(String, UpdateCounts)>> {
  let mut done = Vec::new();
  let mut failed = Vec::new();
  for update in updates {
    match update_dataset(store, catalog, update, now).await {
      Ok(counts) => done.push((update.name.clone(), counts)),
      Err(e) => {
        error!(dataset = %update.name, error = %e, "dataset update failed");
        failed.push(update.name.clone());
      }
    }
  }
  if failed.is_empty() {
    Ok(done)
  } else {
    Err(Error::DatasetUpdates { failed, total: updates.len() })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn catalog_warehouse_entries_pick_their_modes() {
    let catalog = Catalog::standard();
    let updates = warehouse_datasets(&catalog).unwrap();
    let road = updates.iter().find(|u| u.name == keys::ROAD).unwrap();
    assert_eq!(road.source, "RLIDGeo.dbo.Road");
    assert_eq!(road.target, "RLID.dbo.Road");
    assert_eq!(road.mode(), UpdateMode::Keyed(&["road_segment_gfid".to_owned()]));
    assert_eq!(road.last_load.as_deref(), Some("RLID.dbo.Road_LastLoad"));

    let zoning = updates.iter().find(|u| u.name == keys::ZONING).unwrap();
    assert!(zoning.last_load.is_none());
    assert!(updates.iter().all(|u| u.name != keys::SITE_ADDRESS));
  }

  #[test]
  fn skip_message_wins_over_keys() {
    let mut update = DatasetUpdate::new("x", "a", "b").keyed(&["id"]);
    assert!(matches!(update.mode(), UpdateMode::Keyed(_)));
    update.no_update_message = Some("frozen for audit".into());
    assert_eq!(update.mode(), UpdateMode::Skip("frozen for audit"));
    update.no_update_message = None;
    update.id_field_names = None;
    assert_eq!(update.mode(), UpdateMode::TruncateLoad);
  }
}
