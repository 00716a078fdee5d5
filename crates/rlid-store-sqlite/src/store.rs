//! [`SqliteStore`]: the SQLite implementation of [`GisStore`] and [`Mailer`].

use std::{collections::BTreeMap, path::Path, sync::Arc};

use rusqlite::{OptionalExtension as _, params_from_iter, types::Value as SqlValue};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use rlid_core::{
  dataset::{DatasetSchema, Field},
  mail::{BodyFormat, MailMessage, Mailer},
  record::{Record, SHAPE_FIELD},
  store::{GisStore, ReadQuery},
};

use crate::{
  Error, Result,
  encode::{
    RawRow, column_def, decode_schema, encode_schema, encode_shape, encode_value, now_string,
    quote_ident, table_name,
  },
  schema::SCHEMA,
};

// ─── Registry entries ────────────────────────────────────────────────────────

const KIND_TABLE: &str = "table";
const KIND_VIEW: &str = "view";

/// A resolved row of the `datasets` registry.
#[derive(Debug, Clone)]
struct Entry {
  path:   String,
  table:  String,
  kind:   String,
  schema: DatasetSchema,
}

impl Entry {
  fn is_view(&self) -> bool { self.kind == KIND_VIEW }

  fn writable(self) -> Result<Self> {
    if self.is_view() { Err(Error::ReadOnlyView(self.path)) } else { Ok(self) }
  }

  fn check_fields(&self, names: &[String]) -> Result<()> {
    match names.iter().find(|n| self.schema.field(n).is_none()) {
      Some(missing) => {
        Err(Error::UnknownField { path: self.path.clone(), field: missing.clone() })
      }
      None => Ok(()),
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A geodatabase backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Every
/// workspace name resolves to the same file, so at most one edit session
/// can be open at a time.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  editing: Arc<Mutex<Option<String>>>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, editing: Arc::new(Mutex::new(None)) })
  }

  async fn lookup(&self, path: &str) -> Result<Option<Entry>> {
    let key = path.to_owned();
    let row: Option<(String, String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT table_name, kind, schema_json FROM datasets WHERE path = ?1",
              [&key],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?,
        )
      })
      .await?;
    row
      .map(|(table, kind, schema_json)| {
        Ok(Entry { path: path.to_owned(), table, kind, schema: decode_schema(&schema_json)? })
      })
      .transpose()
  }

  async fn entry(&self, path: &str) -> Result<Entry> {
    self.lookup(path).await?.ok_or_else(|| Error::DatasetNotFound(path.to_owned()))
  }

  async fn save_schema(&self, path: &str, schema: &DatasetSchema) -> Result<()> {
    let key = path.to_owned();
    let json = encode_schema(schema)?;
    self
      .conn
      .call(move |conn| {
        conn.execute("UPDATE datasets SET schema_json = ?1 WHERE path = ?2", [&json, &key])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn register(&self, path: &str, kind: &str, schema: &DatasetSchema, ddl: String) -> Result<()> {
    let row = [
      path.to_owned(),
      table_name(path),
      kind.to_owned(),
      encode_schema(schema)?,
      now_string(),
    ];
    self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        sp.execute_batch(&ddl)?;
        sp.execute(
          "INSERT INTO datasets (path, table_name, kind, schema_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          row,
        )?;
        sp.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Seed a coded-value domain; existing codes are overwritten.
  pub async fn add_domain(&self, workspace: &str, name: &str, codes: &[(&str, &str)]) -> Result<()> {
    let (workspace, name) = (workspace.to_owned(), name.to_owned());
    let codes: Vec<(String, String)> =
      codes.iter().map(|(c, d)| ((*c).to_owned(), (*d).to_owned())).collect();
    self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        {
          let mut stmt = sp.prepare(
            "INSERT OR REPLACE INTO domains (workspace, domain_name, code, description)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (code, description) in &codes {
            stmt.execute([&workspace, &name, code, description])?;
          }
        }
        sp.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Messages submitted through [`Mailer::send_email`], oldest first.
  pub async fn queued_mail(&self) -> Result<Vec<MailMessage>> {
    let rows: Vec<[Option<String>; 7]> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT subject, recipients, body, body_format, copy_recipients,
                  blind_copy_recipients, reply_to
           FROM mail_queue ORDER BY queued_at, rowid",
        )?;
        let rows = stmt
          .query_map([], |r| {
            Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?])
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|[subject, recipients, body, format, cc, bcc, reply_to]| MailMessage {
          subject: subject.unwrap_or_default(),
          recipients: recipients.unwrap_or_default(),
          body: body.unwrap_or_default(),
          body_format: format.and_then(|f| f.parse().ok()).unwrap_or(BodyFormat::Text),
          copy_recipients: cc,
          blind_copy_recipients: bcc,
          reply_to,
        })
        .collect(),
    )
  }

  // ── Internals behind the trait ────────────────────────────────────────

  async fn create_dataset_inner(&self, path: &str, schema: &DatasetSchema) -> Result<()> {
    if self.lookup(path).await?.is_some() {
      return Err(Error::DatasetExists(path.to_owned()));
    }
    let mut columns = vec!["oid INTEGER PRIMARY KEY AUTOINCREMENT".to_owned()];
    columns.extend(schema.fields.iter().map(|f| column_def(f, true)));
    if schema.has_geometry() {
      columns.push(format!("{} TEXT", quote_ident(SHAPE_FIELD)));
    }
    let ddl = format!("CREATE TABLE {} ({});", quote_ident(&table_name(path)), columns.join(", "));
    self.register(path, KIND_TABLE, schema, ddl).await?;
    debug!(path, fields = schema.fields.len(), "created dataset");
    Ok(())
  }

  async fn delete_dataset_inner(&self, path: &str) -> Result<()> {
    let Some(entry) = self.lookup(path).await? else {
      return Ok(());
    };
    let drop = format!(
      "DROP {} IF EXISTS {};",
      if entry.is_view() { "VIEW" } else { "TABLE" },
      quote_ident(&entry.table)
    );
    let key = entry.path.clone();
    self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        sp.execute_batch(&drop)?;
        sp.execute("DELETE FROM datasets WHERE path = ?1", [&key])?;
        sp.commit()?;
        Ok(())
      })
      .await?;
    debug!(path, "deleted dataset");
    Ok(())
  }

  async fn create_view_inner(
    &self,
    view_path: &str,
    source: &str,
    where_: Option<&str>,
    fields: Option<&[String]>,
  ) -> Result<()> {
    if self.lookup(view_path).await?.is_some() {
      return Err(Error::DatasetExists(view_path.to_owned()));
    }
    let source = self.entry(source).await?;
    let schema = match fields {
      Some(names) => {
        source.check_fields(names)?;
        DatasetSchema {
          fields:        source
            .schema
            .fields
            .iter()
            .filter(|f| names.contains(&f.name))
            .cloned()
            .collect(),
          geometry_type: source.schema.geometry_type,
        }
      }
      None => source.schema.clone(),
    };
    let mut columns = vec!["oid".to_owned()];
    columns.extend(schema.fields.iter().map(|f| quote_ident(&f.name)));
    if schema.has_geometry() {
      columns.push(quote_ident(SHAPE_FIELD));
    }
    let filter = where_.map(|w| format!(" WHERE {w}")).unwrap_or_default();
    let ddl = format!(
      "CREATE VIEW {} AS SELECT {} FROM {}{filter};",
      quote_ident(&table_name(view_path)),
      columns.join(", "),
      quote_ident(&source.table),
    );
    self.register(view_path, KIND_VIEW, &schema, ddl).await?;
    debug!(view = view_path, source = %source.path, "created view");
    Ok(())
  }

  async fn add_field_inner(&self, path: &str, field: &Field) -> Result<()> {
    let mut entry = self.entry(path).await?.writable()?;
    if entry.schema.field(&field.name).is_some() {
      return Err(Error::Core(rlid_core::Error::Config(format!(
        "{path}: field {:?} already exists",
        field.name
      ))));
    }
    let sql = format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(&entry.table), column_def(field, false));
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    entry.schema.fields.push(field.clone());
    self.save_schema(path, &entry.schema).await
  }

  async fn delete_field_inner(&self, path: &str, name: &str) -> Result<()> {
    let mut entry = self.entry(path).await?.writable()?;
    entry.check_fields(&[name.to_owned()])?;
    let table = entry.table.clone();
    let column = quote_ident(name);
    self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        let indexes: Vec<String> = {
          let mut stmt = sp.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql LIKE '%' || ?2 || '%'",
          )?;
          stmt.query_map([&table, &column], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?
        };
        for index in indexes {
          sp.execute_batch(&format!("DROP INDEX IF EXISTS {};", quote_ident(&index)))?;
        }
        sp.execute_batch(&format!("ALTER TABLE {} DROP COLUMN {column};", quote_ident(&table)))?;
        sp.commit()?;
        Ok(())
      })
      .await?;
    entry.schema.fields.retain(|f| f.name != name);
    self.save_schema(path, &entry.schema).await
  }

  async fn rename_field_inner(&self, path: &str, old: &str, new: &str) -> Result<()> {
    let mut entry = self.entry(path).await?.writable()?;
    entry.check_fields(&[old.to_owned()])?;
    let sql = format!(
      "ALTER TABLE {} RENAME COLUMN {} TO {}",
      quote_ident(&entry.table),
      quote_ident(old),
      quote_ident(new)
    );
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    for f in entry.schema.fields.iter_mut().filter(|f| f.name == old) {
      f.name = new.to_owned();
    }
    self.save_schema(path, &entry.schema).await
  }

  async fn add_index_inner(&self, path: &str, fields: &[String], unique: bool) -> Result<()> {
    let entry = self.entry(path).await?.writable()?;
    // The geometry column is JSON text here; there is no spatial index to build.
    let columns: Vec<String> = fields.iter().filter(|f| *f != SHAPE_FIELD).cloned().collect();
    if columns.is_empty() {
      return Ok(());
    }
    entry.check_fields(&columns)?;
    let index = format!("idx_{}_{}", entry.table, columns.join("_"));
    let sql = format!(
      "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
      if unique { "UNIQUE " } else { "" },
      quote_ident(&index),
      quote_ident(&entry.table),
      columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
    );
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn read_inner(&self, path: &str, query: &ReadQuery) -> Result<Vec<Record>> {
    let entry = self.entry(path).await?;
    let fields: Vec<Field> = match &query.fields {
      Some(names) => {
        entry.check_fields(names)?;
        names.iter().filter_map(|n| entry.schema.field(n)).cloned().collect()
      }
      None => entry.schema.fields.clone(),
    };
    entry.check_fields(&query.order_by)?;
    let with_shape = query.shape && entry.schema.has_geometry();

    let mut columns = vec!["oid".to_owned()];
    columns.extend(fields.iter().map(|f| quote_ident(&f.name)));
    if with_shape {
      columns.push(quote_ident(SHAPE_FIELD));
    }
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote_ident(&entry.table));
    if let Some(w) = &query.where_ {
      sql.push_str(&format!(" WHERE {w}"));
    }
    let mut order: Vec<String> = query.order_by.iter().map(|f| quote_ident(f)).collect();
    order.push("oid".to_owned());
    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

    let width = fields.len();
    let raw: Vec<RawRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |r| {
            let values =
              (1..=width).map(|i| r.get::<_, SqlValue>(i)).collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(RawRow {
              oid: r.get(0)?,
              values,
              shape: if with_shape { r.get(width + 1)? } else { None },
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raw.into_iter().map(|row| row.into_record(&fields)).collect()
  }

  async fn count_inner(&self, path: &str, where_: Option<&str>) -> Result<usize> {
    let entry = self.entry(path).await?;
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&entry.table));
    if let Some(w) = where_ {
      sql.push_str(&format!(" WHERE {w}"));
    }
    let n: i64 = self.conn.call(move |conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?)).await?;
    Ok(n.max(0) as usize)
  }

  async fn insert_inner(&self, path: &str, records: Vec<Record>) -> Result<usize> {
    let entry = self.entry(path).await?.writable()?;
    if records.is_empty() {
      return Ok(0);
    }
    let with_shape = entry.schema.has_geometry();
    let mut columns: Vec<String> = entry.schema.fields.iter().map(|f| quote_ident(&f.name)).collect();
    if with_shape {
      columns.push(quote_ident(SHAPE_FIELD));
    }
    let sql = if columns.is_empty() {
      format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&entry.table))
    } else {
      let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
      format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&entry.table),
        columns.join(", "),
        placeholders.join(", ")
      )
    };

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
      let mut row: Vec<SqlValue> =
        entry.schema.fields.iter().map(|f| encode_value(record.get(&f.name), f.kind)).collect();
      if with_shape {
        row.push(match &record.shape {
          Some(shape) => SqlValue::Text(encode_shape(shape)?),
          None => SqlValue::Null,
        });
      }
      rows.push(row);
    }

    let n = self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        let mut n = 0;
        {
          let mut stmt = sp.prepare(&sql)?;
          for row in rows {
            n += stmt.execute(params_from_iter(row))?;
          }
        }
        sp.commit()?;
        Ok(n)
      })
      .await?;
    Ok(n)
  }

  async fn update_inner(&self, path: &str, records: Vec<Record>) -> Result<usize> {
    let entry = self.entry(path).await?.writable()?;
    let with_shape = entry.schema.has_geometry();
    let table = quote_ident(&entry.table);

    let mut statements = Vec::with_capacity(records.len());
    for record in &records {
      let oid = record.oid.ok_or_else(|| Error::MissingOid(path.to_owned()))?;
      let mut sets = Vec::new();
      let mut params = Vec::new();
      for (name, value) in &record.values {
        let Some(field) = entry.schema.field(name) else { continue };
        params.push(encode_value(value, field.kind));
        sets.push(format!("{} = ?{}", quote_ident(name), params.len()));
      }
      if let Some(shape) = record.shape.as_ref().filter(|_| with_shape) {
        params.push(SqlValue::Text(encode_shape(shape)?));
        sets.push(format!("{} = ?{}", quote_ident(SHAPE_FIELD), params.len()));
      }
      if sets.is_empty() {
        continue;
      }
      params.push(SqlValue::Integer(oid));
      let sql = format!("UPDATE {table} SET {} WHERE oid = ?{}", sets.join(", "), params.len());
      statements.push((sql, params));
    }

    let n = self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        let mut n = 0;
        for (sql, params) in statements {
          n += sp.prepare_cached(&sql)?.execute(params_from_iter(params))?;
        }
        sp.commit()?;
        Ok(n)
      })
      .await?;
    Ok(n)
  }

  async fn delete_where_inner(&self, path: &str, where_: Option<&str>) -> Result<usize> {
    let entry = self.entry(path).await?.writable()?;
    let mut sql = format!("DELETE FROM {}", quote_ident(&entry.table));
    if let Some(w) = where_ {
      sql.push_str(&format!(" WHERE {w}"));
    }
    Ok(self.conn.call(move |conn| Ok(conn.execute(&sql, [])?)).await?)
  }

  async fn delete_oids_inner(&self, path: &str, oids: &[i64]) -> Result<usize> {
    let entry = self.entry(path).await?.writable()?;
    let sql = format!("DELETE FROM {} WHERE oid = ?1", quote_ident(&entry.table));
    let oids = oids.to_vec();
    let n = self
      .conn
      .call(move |conn| {
        let sp = conn.savepoint()?;
        let mut n = 0;
        {
          let mut stmt = sp.prepare(&sql)?;
          for oid in oids {
            n += stmt.execute([oid])?;
          }
        }
        sp.commit()?;
        Ok(n)
      })
      .await?;
    Ok(n)
  }

  async fn domain_inner(&self, workspace: &str, name: &str) -> Result<BTreeMap<String, String>> {
    let (ws, dn) = (workspace.to_owned(), name.to_owned());
    let codes: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT code, description FROM domains WHERE workspace = ?1 AND domain_name = ?2",
        )?;
        let rows = stmt
          .query_map([&ws, &dn], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    if codes.is_empty() {
      return Err(Error::DomainNotFound { workspace: workspace.to_owned(), name: name.to_owned() });
    }
    Ok(codes.into_iter().collect())
  }

  async fn begin_edit_inner(&self, workspace: &str) -> Result<()> {
    let mut editing = self.editing.lock().await;
    if let Some(open) = editing.as_ref() {
      return Err(Error::EditSession(format!("an edit session is already open on {open:?}")));
    }
    self
      .conn
      .call(|conn| {
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
      })
      .await?;
    *editing = Some(workspace.to_owned());
    debug!(workspace, "edit session started");
    Ok(())
  }

  async fn end_edit(&self, workspace: &str, commit: bool) -> Result<()> {
    let mut editing = self.editing.lock().await;
    if editing.as_deref() != Some(workspace) {
      return Err(Error::EditSession(format!("no edit session open on {workspace:?}")));
    }
    let sql = if commit { "COMMIT;" } else { "ROLLBACK;" };
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    *editing = None;
    debug!(workspace, commit, "edit session closed");
    Ok(())
  }

  async fn export_metadata_inner(&self, path: &str) -> Result<Option<String>> {
    self.entry(path).await?;
    let key = path.to_owned();
    let xml: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row("SELECT metadata_xml FROM datasets WHERE path = ?1", [&key], |r| r.get(0))?)
      })
      .await?;
    Ok(xml)
  }

  async fn import_metadata_inner(&self, path: &str, xml: &str) -> Result<()> {
    self.entry(path).await?;
    let (key, xml) = (path.to_owned(), xml.to_owned());
    self
      .conn
      .call(move |conn| {
        conn.execute("UPDATE datasets SET metadata_xml = ?1 WHERE path = ?2", [&xml, &key])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn upgrade_metadata_inner(&self, path: &str) -> Result<()> {
    let xml = self
      .export_metadata_inner(path)
      .await?
      .ok_or_else(|| Error::NoMetadata(path.to_owned()))?;
    if let Some(upgraded) = upgrade_xml(&xml) {
      self.import_metadata_inner(path, &upgraded).await?;
    }
    Ok(())
  }
}

/// Marker the current metadata standard expects right after `<metadata>`.
const ESRI_MARKER: &str = "<Esri><ArcGISFormat>1.0</ArcGISFormat></Esri>";

/// `None` when the document is already upgraded or has no root to extend.
fn upgrade_xml(xml: &str) -> Option<String> {
  if xml.contains("<ArcGISFormat>") {
    return None;
  }
  let start = xml.find("<metadata")?;
  let close = start + xml[start..].find('>')?;
  if xml[..close].ends_with('/') {
    return Some(format!("{}>{ESRI_MARKER}</metadata>{}", &xml[..close - 1], &xml[close + 1..]));
  }
  Some(format!("{}{ESRI_MARKER}{}", &xml[..=close], &xml[close + 1..]))
}

// ─── GisStore impl ───────────────────────────────────────────────────────────

impl GisStore for SqliteStore {
  async fn dataset_exists(&self, path: &str) -> rlid_core::Result<bool> {
    Ok(self.lookup(path).await?.is_some())
  }

  async fn describe(&self, path: &str) -> rlid_core::Result<DatasetSchema> {
    Ok(self.entry(path).await?.schema)
  }

  async fn create_dataset(&self, path: &str, schema: &DatasetSchema) -> rlid_core::Result<()> {
    Ok(self.create_dataset_inner(path, schema).await?)
  }

  async fn delete_dataset(&self, path: &str) -> rlid_core::Result<()> {
    Ok(self.delete_dataset_inner(path).await?)
  }

  async fn create_view(
    &self,
    view_path: &str,
    source: &str,
    where_: Option<&str>,
    fields: Option<&[String]>,
  ) -> rlid_core::Result<()> {
    Ok(self.create_view_inner(view_path, source, where_, fields).await?)
  }

  async fn add_field(&self, path: &str, field: &Field) -> rlid_core::Result<()> {
    Ok(self.add_field_inner(path, field).await?)
  }

  async fn delete_field(&self, path: &str, name: &str) -> rlid_core::Result<()> {
    Ok(self.delete_field_inner(path, name).await?)
  }

  async fn rename_field(&self, path: &str, old: &str, new: &str) -> rlid_core::Result<()> {
    Ok(self.rename_field_inner(path, old, new).await?)
  }

  async fn add_index(&self, path: &str, fields: &[String], unique: bool) -> rlid_core::Result<()> {
    Ok(self.add_index_inner(path, fields, unique).await?)
  }

  async fn read(&self, path: &str, query: &ReadQuery) -> rlid_core::Result<Vec<Record>> {
    Ok(self.read_inner(path, query).await?)
  }

  async fn count(&self, path: &str, where_: Option<&str>) -> rlid_core::Result<usize> {
    Ok(self.count_inner(path, where_).await?)
  }

  async fn insert(&self, path: &str, records: Vec<Record>) -> rlid_core::Result<usize> {
    Ok(self.insert_inner(path, records).await?)
  }

  async fn update(&self, path: &str, records: Vec<Record>) -> rlid_core::Result<usize> {
    Ok(self.update_inner(path, records).await?)
  }

  async fn delete_where(&self, path: &str, where_: Option<&str>) -> rlid_core::Result<usize> {
    Ok(self.delete_where_inner(path, where_).await?)
  }

  async fn delete_oids(&self, path: &str, oids: &[i64]) -> rlid_core::Result<usize> {
    Ok(self.delete_oids_inner(path, oids).await?)
  }

  async fn domain(&self, workspace: &str, name: &str) -> rlid_core::Result<BTreeMap<String, String>> {
    Ok(self.domain_inner(workspace, name).await?)
  }

  async fn begin_edit(&self, workspace: &str) -> rlid_core::Result<()> {
    Ok(self.begin_edit_inner(workspace).await?)
  }

  async fn commit_edit(&self, workspace: &str) -> rlid_core::Result<()> {
    Ok(self.end_edit(workspace, true).await?)
  }

  async fn abort_edit(&self, workspace: &str) -> rlid_core::Result<()> {
    Ok(self.end_edit(workspace, false).await?)
  }

  async fn export_metadata(&self, path: &str) -> rlid_core::Result<Option<String>> {
    Ok(self.export_metadata_inner(path).await?)
  }

  async fn import_metadata(&self, path: &str, xml: &str) -> rlid_core::Result<()> {
    Ok(self.import_metadata_inner(path, xml).await?)
  }

  async fn upgrade_metadata(&self, path: &str) -> rlid_core::Result<()> {
    Ok(self.upgrade_metadata_inner(path).await?)
  }
}

// ─── Mailer impl ─────────────────────────────────────────────────────────────

impl Mailer for SqliteStore {
  async fn send_email(&self, message: &MailMessage) -> rlid_core::Result<()> {
    let id = Uuid::new_v4().hyphenated().to_string();
    let m = message.clone();
    let queued_at = now_string();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO mail_queue (
             mail_id, subject, recipients, copy_recipients, blind_copy_recipients,
             reply_to, body, body_format, queued_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id,
            m.subject,
            m.recipients,
            m.copy_recipients,
            m.blind_copy_recipients,
            m.reply_to,
            m.body,
            m.body_format.to_string(),
            queued_at,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::from)?;
    debug!(subject = %message.subject, "queued mail");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::upgrade_xml;

  #[test]
  fn upgrade_inserts_marker_once() {
    let up = upgrade_xml("<?xml version=\"1.0\"?><metadata><idinfo/></metadata>").unwrap();
    assert!(up.contains("<metadata><Esri><ArcGISFormat>1.0</ArcGISFormat></Esri><idinfo/>"));
    assert!(upgrade_xml(&up).is_none());
    assert_eq!(
      upgrade_xml("<metadata/>").as_deref(),
      Some("<metadata><Esri><ArcGISFormat>1.0</ArcGISFormat></Esri></metadata>")
    );
  }
}
