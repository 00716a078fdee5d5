//! Dataset descriptors: the declarative half of the catalog.
//!
//! A descriptor names a dataset's fields, geometry kind and the storage paths
//! it lives at in each lifecycle stage (`maint`, `pub`, `source`, …).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  Error, Result,
  geometry::GeometryType,
  record::SHAPE_FIELD,
};

// ─── Fields ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  Short,
  Long,
  Double,
  Float,
  Text,
  Date,
  Guid,
  Geometry,
}

impl FieldType {
  pub fn is_numeric(&self) -> bool {
    matches!(self, Self::Short | Self::Long | Self::Double | Self::Float)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
  pub name:        String,
  #[serde(rename = "type")]
  pub kind:        FieldType,
  pub length:      Option<u32>,
  /// Part of the dataset's composite natural key.
  #[serde(default)]
  pub is_id:       bool,
  #[serde(default = "default_nullable")]
  pub is_nullable: bool,
  /// Lifecycle tags, e.g. `maint` or `pub`.
  #[serde(default)]
  pub tags:        BTreeSet<String>,
}

fn default_nullable() -> bool { true }

impl Field {
  pub fn new(name: &str, kind: FieldType) -> Self {
    Self {
      name: name.to_owned(),
      kind,
      length: None,
      is_id: false,
      is_nullable: true,
      tags: BTreeSet::new(),
    }
  }

  pub fn text(name: &str, length: u32) -> Self { Self::new(name, FieldType::Text).with_length(length) }

  pub fn with_length(mut self, length: u32) -> Self {
    self.length = Some(length);
    self
  }

  /// Mark as an id field; id fields are never nullable.
  pub fn id(mut self) -> Self {
    self.is_id = true;
    self.is_nullable = false;
    self
  }

  pub fn not_null(mut self) -> Self {
    self.is_nullable = false;
    self
  }

  pub fn tagged(mut self, tags: &[&str]) -> Self {
    self.tags.extend(tags.iter().map(|t| (*t).to_owned()));
    self
  }

  pub fn has_tag(&self, tag: &str) -> bool { self.tags.contains(tag) }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

/// A tagged path entry. Only the `inserts` tag holds a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathValue {
  Scalar(String),
  List(Vec<String>),
}

pub const INSERTS_TAG: &str = "inserts";

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Storage-facing schema: the non-geometry fields plus geometry kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetSchema {
  pub fields:        Vec<Field>,
  pub geometry_type: GeometryType,
}

impl DatasetSchema {
  pub fn field(&self, name: &str) -> Option<&Field> { self.fields.iter().find(|f| f.name == name) }

  pub fn field_names(&self) -> Vec<String> { self.fields.iter().map(|f| f.name.clone()).collect() }

  pub fn has_geometry(&self) -> bool { self.geometry_type != GeometryType::None }
}

/// An immutable declaration of a managed dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
  pub key:           String,
  pub fields:        Vec<Field>,
  pub geometry_type: GeometryType,
  pub paths:         BTreeMap<String, PathValue>,
}

impl DatasetDescriptor {
  pub fn new(key: &str, geometry_type: GeometryType) -> Self {
    let mut fields = Vec::new();
    if geometry_type != GeometryType::None {
      fields.push(Field::new(SHAPE_FIELD, FieldType::Geometry));
    }
    Self { key: key.to_owned(), fields, geometry_type, paths: BTreeMap::new() }
  }

  pub fn field(mut self, field: Field) -> Self {
    self.fields.push(field);
    self
  }

  pub fn path(mut self, tag: &str, path: &str) -> Self {
    self.paths.insert(tag.to_owned(), PathValue::Scalar(path.to_owned()));
    self
  }

  pub fn inserts(mut self, paths: &[&str]) -> Self {
    self.paths.insert(
      INSERTS_TAG.to_owned(),
      PathValue::List(paths.iter().map(|p| (*p).to_owned()).collect()),
    );
    self
  }

  /// Check the descriptor's invariants.
  pub fn validate(&self) -> Result<()> {
    let mut seen = HashSet::new();
    for f in &self.fields {
      if !seen.insert(f.name.as_str()) {
        return Err(Error::Config(format!("{}: duplicate field {:?}", self.key, f.name)));
      }
      if f.is_id && f.is_nullable {
        return Err(Error::Config(format!("{}: id field {:?} is nullable", self.key, f.name)));
      }
    }
    let has_geometry_field = self.fields.iter().any(|f| f.kind == FieldType::Geometry);
    if has_geometry_field != (self.geometry_type != GeometryType::None) {
      return Err(Error::Config(format!(
        "{}: geometry type {} does not match its fields",
        self.key, self.geometry_type
      )));
    }
    for (tag, value) in &self.paths {
      let is_list = matches!(value, PathValue::List(_));
      if is_list != (tag == INSERTS_TAG) {
        return Err(Error::Config(format!("{}: path tag {tag:?} has the wrong shape", self.key)));
      }
    }
    Ok(())
  }

  /// Fields carrying `tag` (all fields when `tag` is `None`), in order.
  pub fn fields_tagged(&self, tag: Option<&str>) -> Vec<&Field> {
    self.fields.iter().filter(|f| tag.is_none_or(|t| f.has_tag(t))).collect()
  }

  /// The storage-facing schema restricted to fields carrying `tag`.
  pub fn schema(&self, tag: Option<&str>) -> DatasetSchema {
    DatasetSchema {
      fields:        self
        .fields_tagged(tag)
        .into_iter()
        .filter(|f| f.kind != FieldType::Geometry)
        .cloned()
        .collect(),
      geometry_type: self.geometry_type,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn id_fields_are_not_nullable() {
    let f = Field::new("gfid", FieldType::Guid).id();
    assert!(f.is_id && !f.is_nullable);
  }

  #[test]
  fn duplicate_field_names_are_rejected() {
    let d = DatasetDescriptor::new("x", GeometryType::None)
      .field(Field::text("a", 4))
      .field(Field::text("a", 4));
    assert!(matches!(d.validate(), Err(Error::Config(_))));
  }

  #[test]
  fn scalar_inserts_tag_is_rejected() {
    let d = DatasetDescriptor::new("x", GeometryType::Point).path(INSERTS_TAG, "a");
    assert!(d.validate().is_err());
    let ok = DatasetDescriptor::new("x", GeometryType::Point).inserts(&["a", "b"]);
    assert!(ok.validate().is_ok());
  }

  #[test]
  fn schema_omits_geometry_field() {
    let d = DatasetDescriptor::new("x", GeometryType::Polygon)
      .field(Field::text("a", 4).tagged(&["pub"]))
      .field(Field::text("b", 4));
    let s = d.schema(Some("pub"));
    assert_eq!(s.field_names(), vec!["a"]);
    assert_eq!(s.geometry_type, GeometryType::Polygon);
  }
}
