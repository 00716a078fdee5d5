//! Encoding and decoding helpers between engine types and the plain SQLite
//! representations stored in dataset tables.
//!
//! Dates are stored as `YYYY-MM-DD HH:MM:SS` text, GUIDs as hyphenated
//! lowercase strings and geometries as compact JSON.

use chrono::{NaiveDateTime, Utc};
use rlid_core::{
  dataset::{DatasetSchema, Field, FieldType},
  geometry::Geometry,
  record::{DATE_FORMAT, Record, Value},
  values::datetime_from_string,
};
use rusqlite::types::Value as SqlValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Result;

// ─── Names ───────────────────────────────────────────────────────────────────

/// Stable table name for a dataset path.
pub fn table_name(path: &str) -> String {
  let digest = Sha256::digest(path.as_bytes());
  format!("ds_{}", &hex::encode(digest)[..16])
}

pub fn quote_ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

pub fn sql_type(kind: FieldType) -> &'static str {
  match kind {
    FieldType::Short | FieldType::Long => "INTEGER",
    FieldType::Double | FieldType::Float => "REAL",
    FieldType::Text | FieldType::Date | FieldType::Guid | FieldType::Geometry => "TEXT",
  }
}

/// Column definition used by `CREATE TABLE` / `ADD COLUMN`.
pub fn column_def(field: &Field, enforce_not_null: bool) -> String {
  let not_null = if enforce_not_null && !field.is_nullable { " NOT NULL" } else { "" };
  format!("{} {}{not_null}", quote_ident(&field.name), sql_type(field.kind))
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

pub fn encode_dt(dt: NaiveDateTime) -> String { dt.format(DATE_FORMAT).to_string() }

pub fn now_string() -> String { encode_dt(Utc::now().naive_local()) }

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn encode_value(value: &Value, kind: FieldType) -> SqlValue {
  match value.coerce(kind) {
    Value::Null => SqlValue::Null,
    Value::Int(i) => SqlValue::Integer(i),
    Value::Float(f) => SqlValue::Real(f),
    Value::Text(s) => SqlValue::Text(s),
    Value::Date(d) => SqlValue::Text(encode_dt(d)),
    Value::Guid(g) => SqlValue::Text(g.hyphenated().to_string()),
  }
}

pub fn decode_value(raw: SqlValue, kind: FieldType) -> Value {
  match (raw, kind) {
    (SqlValue::Null, _) => Value::Null,
    (SqlValue::Integer(i), FieldType::Double | FieldType::Float) => Value::Float(i as f64),
    (SqlValue::Integer(i), _) => Value::Int(i),
    (SqlValue::Real(f), FieldType::Short | FieldType::Long) => Value::Int(f.round() as i64),
    (SqlValue::Real(f), _) => Value::Float(f),
    (SqlValue::Text(s), FieldType::Date) => NaiveDateTime::parse_from_str(&s, DATE_FORMAT)
      .ok()
      .or_else(|| datetime_from_string(&s))
      .map(Value::Date)
      .unwrap_or(Value::Text(s)),
    (SqlValue::Text(s), FieldType::Guid) => {
      Uuid::parse_str(&s).map(Value::Guid).unwrap_or(Value::Text(s))
    }
    (SqlValue::Text(s), _) => Value::Text(s),
    (SqlValue::Blob(b), _) => Value::Text(hex::encode(b)),
  }
}

// ─── Geometry & schema ───────────────────────────────────────────────────────

pub fn encode_shape(shape: &Geometry) -> Result<String> { Ok(serde_json::to_string(shape)?) }

pub fn decode_shape(s: &str) -> Result<Geometry> { Ok(serde_json::from_str(s)?) }

pub fn encode_schema(schema: &DatasetSchema) -> Result<String> { Ok(serde_json::to_string(schema)?) }

pub fn decode_schema(s: &str) -> Result<DatasetSchema> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw column values read directly from a dataset table.
pub struct RawRow {
  pub oid:    i64,
  pub values: Vec<SqlValue>,
  pub shape:  Option<String>,
}

impl RawRow {
  /// Decode against `fields`, which must be in the same order as `values`.
  pub fn into_record(self, fields: &[Field]) -> Result<Record> {
    let values = fields
      .iter()
      .zip(self.values)
      .map(|(f, raw)| (f.name.clone(), decode_value(raw, f.kind)))
      .collect();
    let shape = self.shape.as_deref().map(decode_shape).transpose()?;
    Ok(Record { oid: Some(self.oid), values, shape })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_names_are_stable_and_safe() {
    let a = table_name("RLIDGeo.dbo.SiteAddress");
    assert_eq!(a, table_name("RLIDGeo.dbo.SiteAddress"));
    assert_ne!(a, table_name("RLIDGeo.dbo.Road"));
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
  }

  #[test]
  fn dates_survive_the_column_encoding() {
    let d = datetime_from_string("2024-05-06 07:08:09").unwrap();
    let raw = encode_value(&Value::Date(d), FieldType::Date);
    assert_eq!(decode_value(raw, FieldType::Date), Value::Date(d));
  }
}
