//! The working dataset an ETL extracts into, transforms in place, and loads
//! or updates from.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use rlid_core::{
  dataset::{DatasetDescriptor, DatasetSchema, Field},
  record::Value,
  store::{GisStore, ReadQuery, UpdateCounts},
  values::{Case, clean_whitespace_value, force_case, force_yn, is_numeric},
};
use rlid_gis::{
  attributes::{self, FeatureMatchUpdate, GeometryProperty},
  cursor::{self, Key},
  features::{self, DissolveOptions},
  schema,
  scoped::{unique_path, with_edit_session},
};

use crate::{Error, Result};

/// A value function for [`Transform::UpdateByFunction`].
pub type ValueFn = Box<dyn Fn(&[Value]) -> Value>;

/// One operation on the working dataset.
pub enum Transform {
  AddField(Field),
  /// Add whichever of these fields the working dataset lacks.
  AddMissingFields(Vec<Field>),
  DeleteField(String),
  RenameFields(Vec<(String, String)>),
  DuplicateField { field: String, new_name: String },
  AddSpatialIndex { fields: Vec<String>, unique: bool },

  CleanWhitespace(Vec<String>),
  ForceUppercase(Vec<String>),
  ForceYn { fields: Vec<String>, default: Option<String> },
  ClearNonpositive(Vec<String>),
  ClearNonNumericText(Vec<String>),
  ClearAllValues { fields: Vec<String>, where_: Option<String> },

  UpdateByValue { field: String, value: Value, where_: Option<String> },
  UpdateByFunction {
    field:              String,
    func:               ValueFn,
    arg_fields:         Vec<String>,
    field_as_first_arg: bool,
    where_:             Option<String>,
  },
  UpdateByMapping {
    field:      String,
    mapping:    HashMap<Key, Value>,
    key_fields: Vec<String>,
    default:    Value,
    where_:     Option<String>,
  },
  UpdateByJoinedValue {
    field:      String,
    join_path:  String,
    join_field: String,
    on:         Vec<(String, String)>,
    where_:     Option<String>,
  },
  UpdateByOverlay {
    field:              String,
    overlay_path:       String,
    overlay_field:      String,
    central_coincident: bool,
    where_:             Option<String>,
  },
  UpdateByDomainCode {
    field:            String,
    code_field:       String,
    domain_name:      String,
    domain_workspace: String,
    where_:           Option<String>,
  },
  UpdateByGeometry { field: String, property: GeometryProperty, where_: Option<String> },
  UpdateByUniqueId { field: String, where_: Option<String> },
  UpdateByFeatureMatch {
    field:       String,
    id_fields:   Vec<String>,
    update_type: FeatureMatchUpdate,
    where_:      Option<String>,
  },
  UpdateByNodeIds { from_id_field: String, to_id_field: String, tolerance: f64 },

  DeleteWhere(Option<String>),
  InsertFrom { source: String, where_: Option<String> },
  Dissolve { fields: Vec<String>, options: DissolveOptions },
  Identity { field: String, identity_path: String, identity_field: String, replacement: Option<Value> },
  Overlay { field: String, overlay_path: String, overlay_field: String, central_coincident: bool },
  Erase { erase_path: String, erase_where: Option<String> },
  Planarize { tolerance: f64 },
}

impl Transform {
  pub fn name(&self) -> &'static str {
    match self {
      Self::AddField(_) => "add_field",
      Self::AddMissingFields(_) => "add_missing_fields",
      Self::DeleteField(_) => "delete_field",
      Self::RenameFields(_) => "rename_fields",
      Self::DuplicateField { .. } => "duplicate_field",
      Self::AddSpatialIndex { .. } => "add_spatial_index",
      Self::CleanWhitespace(_) => "clean_whitespace",
      Self::ForceUppercase(_) => "force_uppercase",
      Self::ForceYn { .. } => "force_yn",
      Self::ClearNonpositive(_) => "clear_nonpositive",
      Self::ClearNonNumericText(_) => "clear_non_numeric_text",
      Self::ClearAllValues { .. } => "clear_all_values",
      Self::UpdateByValue { .. } => "update_by_value",
      Self::UpdateByFunction { .. } => "update_by_function",
      Self::UpdateByMapping { .. } => "update_by_mapping",
      Self::UpdateByJoinedValue { .. } => "update_by_joined_value",
      Self::UpdateByOverlay { .. } => "update_by_overlay",
      Self::UpdateByDomainCode { .. } => "update_by_domain_code",
      Self::UpdateByGeometry { .. } => "update_by_geometry",
      Self::UpdateByUniqueId { .. } => "update_by_unique_id",
      Self::UpdateByFeatureMatch { .. } => "update_by_feature_match",
      Self::UpdateByNodeIds { .. } => "update_by_node_ids",
      Self::DeleteWhere(_) => "delete_where",
      Self::InsertFrom { .. } => "insert_from",
      Self::Dissolve { .. } => "dissolve",
      Self::Identity { .. } => "identity",
      Self::Overlay { .. } => "overlay",
      Self::Erase { .. } => "erase",
      Self::Planarize { .. } => "planarize",
    }
  }

  /// `update_by_function` over the field's own value.
  pub fn map_values(field: &str, func: impl Fn(&Value) -> Value + 'static) -> Self {
    Self::UpdateByFunction {
      field:              field.to_owned(),
      func:               Box::new(move |args| func(&args[0])),
      arg_fields:         Vec::new(),
      field_as_first_arg: true,
      where_:             None,
    }
  }
}

/// Where [`EtlWorkspace::init_schema`] takes its schema from.
pub enum SchemaTemplate<'a> {
  Dataset(&'a str),
  Descriptor { descriptor: &'a DatasetDescriptor, tag: Option<&'a str> },
  Fields(DatasetSchema),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Open,
  Populated,
  Closed,
}

/// Scratch working dataset bound to a label.
pub struct EtlWorkspace<'s, S> {
  store: &'s S,
  label: String,
  path:  String,
  state: State,
}

impl<'s, S: GisStore> EtlWorkspace<'s, S> {
  /// Run `body` with a fresh workspace. The working dataset is deleted
  /// afterwards, whether the body succeeded or not.
  pub async fn scoped<T>(
    store: &'s S,
    label: &str,
    body: impl AsyncFnOnce(&mut EtlWorkspace<'s, S>) -> Result<T>,
  ) -> Result<T> {
    let mut etl = Self { store, label: label.to_owned(), path: unique_path(label), state: State::Open };
    info!(etl = label, "workspace opened");
    let out = body(&mut etl).await;
    let release = store.delete_dataset(&etl.path).await.map_err(Error::from);
    match (out, release) {
      (Ok(value), Ok(())) => {
        info!(etl = label, "workspace closed");
        Ok(value)
      }
      (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
      (Err(e), Err(release_error)) => {
        warn!(etl = label, error = %release_error, "working dataset cleanup failed after an earlier error");
        Err(e)
      }
    }
  }

  pub fn path(&self) -> &str { &self.path }

  pub fn store(&self) -> &'s S { self.store }

  fn ensure(&self, wanted: State, what: &str) -> Result<()> {
    if self.state == wanted {
      return Ok(());
    }
    Err(Error::config(format!("{}: cannot {what} while the workspace is {:?}", self.label, self.state)))
  }

  /// Copy the rows of `source` matching `where_` into the working dataset.
  pub async fn extract(&mut self, source: &str, where_: Option<&str>) -> Result<usize> {
    self.ensure(State::Open, "extract")?;
    let rows = cursor::copy_dataset(self.store, source, &self.path, where_).await?;
    self.state = State::Populated;
    info!(etl = %self.label, source, rows, "extracted");
    Ok(rows)
  }

  /// Create the working dataset empty.
  pub async fn init_schema(&mut self, template: SchemaTemplate<'_>) -> Result<()> {
    self.ensure(State::Open, "init schema")?;
    let schema = match template {
      SchemaTemplate::Dataset(path) => self.store.describe(path).await?,
      SchemaTemplate::Descriptor { descriptor, tag } => descriptor.schema(tag),
      SchemaTemplate::Fields(schema) => schema,
    };
    self.store.create_dataset(&self.path, &schema).await?;
    self.state = State::Populated;
    Ok(())
  }

  pub async fn transform(&mut self, op: Transform) -> Result<()> {
    self.ensure(State::Populated, "transform")?;
    let name = op.name();
    apply(self.store, &self.path, op).await?;
    debug!(etl = %self.label, transform = name, "transform applied");
    Ok(())
  }

  /// Apply `ops` in order.
  pub async fn transform_all(&mut self, ops: Vec<Transform>) -> Result<()> {
    for op in ops {
      self.transform(op).await?;
    }
    Ok(())
  }

  /// Rows of the working dataset.
  pub async fn count(&self) -> Result<usize> { Ok(self.store.count(&self.path, None).await?) }

  /// Replace the contents of `destination` with the working rows.
  pub async fn load(&mut self, destination: &str, use_edit_session: bool) -> Result<UpdateCounts> {
    self.ensure(State::Populated, "load")?;
    let records = self.store.read(&self.path, &ReadQuery::all()).await?;
    let store = self.store;
    let counts = if use_edit_session {
      with_edit_session(store, workspace_of(destination), async move || {
        cursor::load_records(store, destination, records).await
      })
      .await?
    } else {
      cursor::load_records(store, destination, records).await?
    };
    self.state = State::Closed;
    info!(etl = %self.label, destination, ?counts, "loaded");
    Ok(counts)
  }

  /// Bring `destination` in line with the working rows, keyed on
  /// `id_fields`.
  pub async fn update(&mut self, destination: &str, id_fields: &[String], delete_missing: bool) -> Result<UpdateCounts> {
    self.ensure(State::Populated, "update")?;
    let records = self.store.read(&self.path, &ReadQuery::all()).await?;
    let counts = cursor::update_from_records(self.store, destination, records, id_fields, delete_missing).await?;
    self.state = State::Closed;
    info!(etl = %self.label, destination, ?counts, "updated");
    Ok(counts)
  }
}

/// The database part of a qualified dataset path.
pub fn workspace_of(path: &str) -> &str { path.split(['.', '/']).next().unwrap_or(path) }

fn as_where(where_: &Option<String>) -> Option<&str> { where_.as_deref() }

async fn map_fields<S, F>(store: &S, path: &str, fields: &[String], func: F) -> Result<()>
where
  S: GisStore,
  F: Fn(&Value) -> Value,
{
  for field in fields {
    attributes::update_by_function(store, path, field, |args: &[Value]| func(&args[0]), &[], true, None).await?;
  }
  Ok(())
}

async fn apply<S: GisStore>(store: &S, path: &str, op: Transform) -> Result<()> {
  match op {
    Transform::AddField(field) => store.add_field(path, &field).await?,
    Transform::AddMissingFields(fields) => {
      for field in &fields {
        schema::add_field_if_missing(store, path, field).await?;
      }
    }
    Transform::DeleteField(name) => store.delete_field(path, &name).await?,
    Transform::RenameFields(pairs) => {
      for (old, new) in &pairs {
        store.rename_field(path, old, new).await?;
      }
    }
    Transform::DuplicateField { field, new_name } => {
      schema::duplicate_field(store, path, &field, &new_name).await?;
    }
    Transform::AddSpatialIndex { fields, unique } => schema::add_spatial_index(store, path, &fields, unique).await?,

    Transform::CleanWhitespace(fields) => map_fields(store, path, &fields, clean_whitespace_value).await?,
    Transform::ForceUppercase(fields) => {
      map_fields(store, path, &fields, |v| match v {
        Value::Text(s) => force_case(Some(s.as_str()), Case::Upper).into(),
        other => other.clone(),
      })
      .await?
    }
    Transform::ForceYn { fields, default } => {
      map_fields(store, path, &fields, |v| force_yn(v, default.as_deref()).into()).await?
    }
    Transform::ClearNonpositive(fields) => {
      map_fields(store, path, &fields, |v| match v.as_f64() {
        Some(n) if n <= 0.0 => Value::Null,
        _ => v.clone(),
      })
      .await?
    }
    Transform::ClearNonNumericText(fields) => {
      map_fields(store, path, &fields, |v| if is_numeric(v, true) { v.clone() } else { Value::Null }).await?
    }
    Transform::ClearAllValues { fields, where_ } => {
      for field in &fields {
        attributes::update_by_value(store, path, field, Value::Null, as_where(&where_)).await?;
      }
    }

    Transform::UpdateByValue { field, value, where_ } => {
      attributes::update_by_value(store, path, &field, value, as_where(&where_)).await?;
    }
    Transform::UpdateByFunction { field, func, arg_fields, field_as_first_arg, where_ } => {
      attributes::update_by_function(store, path, &field, func, &arg_fields, field_as_first_arg, as_where(&where_))
        .await?;
    }
    Transform::UpdateByMapping { field, mapping, key_fields, default, where_ } => {
      attributes::update_by_mapping(store, path, &field, &mapping, &key_fields, default, as_where(&where_)).await?;
    }
    Transform::UpdateByJoinedValue { field, join_path, join_field, on, where_ } => {
      attributes::update_by_joined_value(store, path, &field, &join_path, &join_field, &on, as_where(&where_)).await?;
    }
    Transform::UpdateByOverlay { field, overlay_path, overlay_field, central_coincident, where_ } => {
      attributes::update_by_overlay(
        store,
        path,
        &field,
        &overlay_path,
        &overlay_field,
        central_coincident,
        as_where(&where_),
      )
      .await?;
    }
    Transform::UpdateByDomainCode { field, code_field, domain_name, domain_workspace, where_ } => {
      attributes::update_by_domain_code(
        store,
        path,
        &field,
        &code_field,
        &domain_name,
        &domain_workspace,
        as_where(&where_),
      )
      .await?;
    }
    Transform::UpdateByGeometry { field, property, where_ } => {
      attributes::update_by_geometry(store, path, &field, property, as_where(&where_)).await?;
    }
    Transform::UpdateByUniqueId { field, where_ } => {
      attributes::update_by_unique_id(store, path, &field, as_where(&where_)).await?;
    }
    Transform::UpdateByFeatureMatch { field, id_fields, update_type, where_ } => {
      attributes::update_by_feature_match(store, path, &field, &id_fields, update_type, as_where(&where_)).await?;
    }
    Transform::UpdateByNodeIds { from_id_field, to_id_field, tolerance } => {
      attributes::update_by_node_ids(store, path, &from_id_field, &to_id_field, tolerance).await?;
    }

    Transform::DeleteWhere(where_) => {
      features::delete_features(store, path, as_where(&where_)).await?;
    }
    Transform::InsertFrom { source, where_ } => {
      features::insert_from(store, path, &source, as_where(&where_)).await?;
    }
    Transform::Dissolve { fields, options } => {
      features::dissolve(store, path, &fields, options).await?;
    }
    Transform::Identity { field, identity_path, identity_field, replacement } => {
      features::identity(store, path, &field, &identity_path, &identity_field, replacement).await?;
    }
    Transform::Overlay { field, overlay_path, overlay_field, central_coincident } => {
      features::overlay(store, path, &field, &overlay_path, &overlay_field, central_coincident).await?;
    }
    Transform::Erase { erase_path, erase_where } => {
      features::erase(store, path, &erase_path, as_where(&erase_where)).await?;
    }
    Transform::Planarize { tolerance } => {
      features::planarize(store, path, tolerance).await?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use rlid_core::{dataset::FieldType, geometry::GeometryType, record::Record};
  use rlid_store_sqlite::SqliteStore;

  use super::*;

  fn schema() -> DatasetSchema {
    DatasetSchema {
      fields:        vec![
        Field::new("id", FieldType::Long).id(),
        Field::text("name", 32),
        Field::text("flag", 1),
        Field::new("size", FieldType::Double),
      ],
      geometry_type: GeometryType::None,
    }
  }

  async fn seeded() -> SqliteStore {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store.create_dataset("src", &schema()).await.unwrap();
    store
      .insert("src", vec![
        Record::new().with("id", 1_i64).with("name", "  main   st ").with("flag", "y").with("size", -2.0),
        Record::new().with("id", 2_i64).with("name", "oak").with("flag", "x").with("size", 5.0),
      ])
      .await
      .unwrap();
    store
  }

  #[tokio::test]
  async fn extract_transform_load_and_cleanup() {
    let store = seeded().await;
    store.create_dataset("dst", &schema()).await.unwrap();
    let mut working = String::new();
    let counts = EtlWorkspace::scoped(&store, "demo", async |etl| {
      working = etl.path().to_owned();
      etl.extract("src", None).await?;
      etl
        .transform_all(vec![
          Transform::CleanWhitespace(vec!["name".into()]),
          Transform::ForceUppercase(vec!["name".into()]),
          Transform::ForceYn { fields: vec!["flag".into()], default: Some("N".into()) },
          Transform::ClearNonpositive(vec!["size".into()]),
        ])
        .await?;
      etl.load("dst", false).await
    })
    .await
    .unwrap();

    assert_eq!(counts.inserted, 2);
    assert!(!store.dataset_exists(&working).await.unwrap());
    let rows = store.read("dst", &ReadQuery::all().order_by(&["id"])).await.unwrap();
    assert_eq!(rows[0].text("name"), Some("MAIN ST"));
    assert_eq!(rows[0].text("flag"), Some("Y"));
    assert!(rows[0].get("size").is_null());
    assert_eq!(rows[1].text("flag"), Some("N"));
  }

  #[tokio::test]
  async fn load_inside_an_edit_session() {
    let store = seeded().await;
    store.create_dataset("RLID.dbo.Dst", &schema()).await.unwrap();
    store.insert("RLID.dbo.Dst", vec![Record::new().with("id", 9_i64).with("name", "old")]).await.unwrap();
    let counts = EtlWorkspace::scoped(&store, "edited", async |etl| {
      etl.extract("src", None).await?;
      etl.load("RLID.dbo.Dst", true).await
    })
    .await
    .unwrap();
    assert_eq!(counts, UpdateCounts { inserted: 2, deleted: 1, ..UpdateCounts::default() });
    assert_eq!(store.count("RLID.dbo.Dst", None).await.unwrap(), 2);

    // The session was committed and released.
    store.begin_edit("RLID").await.unwrap();
    store.abort_edit("RLID").await.unwrap();

    let failed: Result<UpdateCounts> = EtlWorkspace::scoped(&store, "missing", async |etl| {
      etl.extract("src", None).await?;
      etl.load("RLID.dbo.Nowhere", true).await
    })
    .await;
    assert!(failed.is_err());
    store.begin_edit("RLID").await.unwrap();
    store.abort_edit("RLID").await.unwrap();
  }

  #[tokio::test]
  async fn state_machine_is_enforced() {
    let store = seeded().await;
    let out: Result<()> = EtlWorkspace::scoped(&store, "bad", async |etl| {
      assert!(etl.transform(Transform::DeleteWhere(None)).await.is_err());
      etl.extract("src", None).await?;
      assert!(etl.extract("src", None).await.is_err());
      assert!(etl.init_schema(SchemaTemplate::Dataset("src")).await.is_err());
      Err(Error::config("stop"))
    })
    .await;
    assert!(out.is_err());
    assert!(!store.read("src", &ReadQuery::all()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn keyed_update_from_workspace() {
    let store = seeded().await;
    store.create_dataset("dst", &schema()).await.unwrap();
    store
      .insert("dst", vec![
        Record::new().with("id", 1_i64).with("name", "  main   st ").with("flag", "y").with("size", -2.0),
        Record::new().with("id", 3_i64).with("name", "gone"),
      ])
      .await
      .unwrap();
    let counts = EtlWorkspace::scoped(&store, "keyed", async |etl| {
      etl.init_schema(SchemaTemplate::Fields(schema())).await?;
      etl.transform(Transform::InsertFrom { source: "src".into(), where_: None }).await?;
      etl.update("dst", &["id".to_owned()], true).await
    })
    .await
    .unwrap();
    assert_eq!(counts, UpdateCounts { inserted: 1, altered: 0, deleted: 1, unchanged: 1 });
  }

  #[test]
  fn workspace_is_the_leading_path_segment() {
    assert_eq!(workspace_of("RLID.dbo.Road"), "RLID");
    assert_eq!(workspace_of("scratch/demo"), "scratch");
  }
}
