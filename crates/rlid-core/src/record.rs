//! The single named-record type that crosses the adapter boundary.
//!
//! Every cursor in the engine yields [`Record`]s. Typed subject structs (e.g.
//! address points, road segments) convert from records; nothing downstream
//! sees raw tuples.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{dataset::FieldType, geometry::Geometry, values};

/// Name of the geometry column on every feature dataset.
pub const SHAPE_FIELD: &str = "shape";

/// Text layout used for dates everywhere they become strings.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static NULL: Value = Value::Null;

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single attribute value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  #[default]
  Null,
  Int(i64),
  Float(f64),
  Text(String),
  Date(NaiveDateTime),
  Guid(Uuid),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Int(i) => Some(*i),
      Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Int(i) => Some(*i as f64),
      Self::Float(f) => Some(*f),
      _ => None,
    }
  }

  pub fn as_date(&self) -> Option<NaiveDateTime> {
    match self {
      Self::Date(d) => Some(*d),
      _ => None,
    }
  }

  pub fn as_guid(&self) -> Option<Uuid> {
    match self {
      Self::Guid(g) => Some(*g),
      Self::Text(s) => Uuid::parse_str(s.trim_matches(['{', '}'])).ok(),
      _ => None,
    }
  }

  /// Canonical string used to build hashable composite keys. Whole floats
  /// render like integers so `1` and `1.0` land on the same key.
  pub fn key_string(&self) -> String {
    match self {
      Self::Null => String::new(),
      Self::Float(f) if f.fract() == 0.0 && f.is_finite() => {
        format!("{}", *f as i64)
      }
      Self::Guid(g) => g.hyphenated().to_string(),
      other => other.to_string(),
    }
  }

  /// Convert to the representation a field of type `kind` stores. Values
  /// that cannot be represented become `Null`.
  pub fn coerce(&self, kind: FieldType) -> Value {
    if self.is_null() {
      return Value::Null;
    }
    match kind {
      FieldType::Short | FieldType::Long => match self {
        Self::Int(i) => Self::Int(*i),
        Self::Float(f) if f.is_finite() => Self::Int(f.round() as i64),
        Self::Text(s) => s.trim().parse().map(Self::Int).unwrap_or(Self::Null),
        _ => Self::Null,
      },
      FieldType::Double | FieldType::Float => match self {
        Self::Int(i) => Self::Float(*i as f64),
        Self::Float(f) => Self::Float(*f),
        Self::Text(s) => s.trim().parse().map(Self::Float).unwrap_or(Self::Null),
        _ => Self::Null,
      },
      FieldType::Text => Self::Text(self.to_string()),
      FieldType::Date => match self {
        Self::Date(d) => Self::Date(*d),
        Self::Text(s) => {
          values::datetime_from_string(s).map(Self::Date).unwrap_or(Self::Null)
        }
        _ => Self::Null,
      },
      FieldType::Guid => self.as_guid().map(Self::Guid).unwrap_or(Self::Null),
      FieldType::Geometry => Self::Null,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => Ok(()),
      Self::Int(i) => write!(f, "{i}"),
      Self::Float(x) => write!(f, "{x}"),
      Self::Text(s) => f.write_str(s),
      Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
      Self::Guid(g) => write!(f, "{{{}}}", g.hyphenated().to_string().to_uppercase()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self { Self::Int(i.into()) }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Self::Text(if b { "Y" } else { "N" }.to_owned()) }
}

impl From<NaiveDateTime> for Value {
  fn from(d: NaiveDateTime) -> Self { Self::Date(d) }
}

impl From<Uuid> for Value {
  fn from(g: Uuid) -> Self { Self::Guid(g) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Self::Null) }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One row of a dataset: object id, named attribute values and an optional
/// geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  /// Store-assigned object id; `None` for rows not yet inserted.
  pub oid:    Option<i64>,
  pub values: BTreeMap<String, Value>,
  pub shape:  Option<Geometry>,
}

impl Record {
  pub fn new() -> Self { Self::default() }

  /// Builder-style setter.
  pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
    self.set(name, value);
    self
  }

  pub fn with_shape(mut self, shape: Geometry) -> Self {
    self.shape = Some(shape);
    self
  }

  pub fn set(&mut self, name: &str, value: impl Into<Value>) {
    self.values.insert(name.to_owned(), value.into());
  }

  /// The value of `name`, or `Null` when the record does not carry it.
  pub fn get(&self, name: &str) -> &Value { self.values.get(name).unwrap_or(&NULL) }

  pub fn text(&self, name: &str) -> Option<&str> { self.get(name).as_str() }

  pub fn int(&self, name: &str) -> Option<i64> { self.get(name).as_i64() }

  pub fn float(&self, name: &str) -> Option<f64> { self.get(name).as_f64() }

  pub fn date(&self, name: &str) -> Option<NaiveDateTime> { self.get(name).as_date() }

  /// Composite key over `fields`, suitable for hashing.
  pub fn key(&self, fields: &[String]) -> Vec<String> {
    fields.iter().map(|f| self.get(f).key_string()).collect()
  }

  /// A copy restricted to `fields` (geometry and oid retained).
  pub fn project(&self, fields: &[String]) -> Record {
    Record {
      oid:    self.oid,
      values: fields
        .iter()
        .map(|f| (f.clone(), self.get(f).clone()))
        .collect(),
      shape:  self.shape.clone(),
    }
  }
}
