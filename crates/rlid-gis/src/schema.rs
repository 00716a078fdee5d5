//! Schema helpers on top of the raw field primitives.

use rlid_core::{
  Error,
  catalog::Catalog,
  dataset::Field,
  record::{Record, SHAPE_FIELD},
  store::{GisStore, ReadQuery},
};

use crate::Result;

/// Add `field` unless a field of that name already exists. Returns whether
/// the field was added.
pub async fn add_field_if_missing<S: GisStore>(store: &S, path: &str, field: &Field) -> Result<bool> {
  if store.describe(path).await?.field(&field.name).is_some() {
    return Ok(false);
  }
  store.add_field(path, field).await?;
  Ok(true)
}

/// Add the catalog's definition of `dataset_key.field_name` to `path`.
pub async fn add_field_from_descriptor<S: GisStore>(
  store: &S,
  path: &str,
  catalog: &Catalog,
  dataset_key: &str,
  field_name: &str,
) -> Result<bool> {
  let field = catalog.field(dataset_key, field_name)?;
  add_field_if_missing(store, path, field).await
}

/// Add `new_name` with the type of `field_name` and copy its values over.
pub async fn duplicate_field<S: GisStore>(
  store: &S,
  path: &str,
  field_name: &str,
  new_name: &str,
) -> Result<usize> {
  let source = store
    .describe(path)
    .await?
    .field(field_name)
    .cloned()
    .ok_or_else(|| Error::UnknownField { dataset: path.to_owned(), field: field_name.to_owned() })?;
  let mut copy = source.clone();
  copy.name = new_name.to_owned();
  copy.is_id = false;
  copy.is_nullable = true;
  store.add_field(path, &copy).await?;

  let patches = store
    .read(path, &ReadQuery::fields(&[field_name]))
    .await?
    .into_iter()
    .filter(|r| !r.get(field_name).is_null())
    .map(|r| Record { oid: r.oid, ..Record::new() }.with(new_name, r.get(field_name).clone()))
    .collect();
  store.update(path, patches).await
}

/// Index the geometry column, plus `fields` when given.
pub async fn add_spatial_index<S: GisStore>(store: &S, path: &str, fields: &[String], unique: bool) -> Result<()> {
  let mut columns = vec![SHAPE_FIELD.to_owned()];
  columns.extend(fields.iter().cloned());
  store.add_index(path, &columns, unique).await
}
