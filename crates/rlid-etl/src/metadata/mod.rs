//! Metadata sync between the web catalog and dataset-embedded metadata.
//!
//! Catalog records are visited newest first, so when two approved records
//! describe the same dataset the newer one is synced and the older one is
//! reported as a duplicate.

pub mod xml;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use rlid_core::{
  catalog::keys,
  mail::Mailer,
  record::Record,
  store::{GisStore, ReadQuery},
};
use rlid_gis::retry::with_retry;

use crate::{
  EtlContext, Result,
  notify::{Email, escape_html, html_table},
};

pub const INVALID_XML: &str = "Invalid XML";
pub const INVALID_PATH: &str = "Invalid dataset path";
pub const DUPLICATE_PATH: &str = "Duplicate path of newer record";

pub const APPROVED: &str = "approved";

/// A catalog record that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
  pub record_id: String,
  pub title:     String,
  pub detail:    Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  /// Records whose metadata was pushed to their dataset and read back.
  pub synced:     usize,
  /// Parent-linked records.
  pub linked:     usize,
  /// Unapproved records and URL paths.
  pub skipped:    usize,
  /// Normalized XML written back without a dataset sync.
  pub normalized: usize,
  pub problems:   BTreeMap<&'static str, Vec<Problem>>,
}

impl SyncReport {
  fn problem(&mut self, kind: &'static str, record: &Record, detail: Option<String>) {
    warn!(problem = kind, record = %record.get("record_id"), detail = detail.as_deref(), "metadata problem");
    self.problems.entry(kind).or_default().push(Problem {
      record_id: record.get("record_id").key_string(),
      title:     record.text("title").unwrap_or_default().to_owned(),
      detail,
    });
  }

  pub fn problem_count(&self) -> usize { self.problems.values().map(Vec::len).sum() }
}

fn is_url(path: &str) -> bool {
  let lower = path.to_ascii_lowercase();
  lower.starts_with("http://") || lower.starts_with("https://")
}

/// Newest first by update date, then input date.
fn newest_first(records: &mut [Record]) {
  records.sort_by(|a, b| {
    let key = |r: &Record| (r.date("update_date"), r.date("input_date"));
    key(b).cmp(&key(a))
  });
}

async fn write_xml<S: GisStore + Mailer>(ctx: &EtlContext<S>, catalog_path: &str, record: &Record, xml: &str) -> Result<()> {
  let row = Record { oid: record.oid, ..Record::new() }.with("xml", xml);
  with_retry(&ctx.retry, "write catalog record", || ctx.store.update(catalog_path, vec![row.clone()])).await?;
  Ok(())
}

/// Sync every approved catalog record with its dataset and email a report
/// of the records that could not be synced.
pub async fn sync_metadata<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<SyncReport> {
  let catalog_path = ctx.catalog.path(keys::METADATA_RECORD, None)?;
  let all = ReadQuery::all();
  let mut records = with_retry(&ctx.retry, "read metadata catalog", || ctx.store.read(&catalog_path, &all)).await?;
  newest_first(&mut records);

  let mut report = SyncReport::default();
  let mut claimed: HashSet<String> = HashSet::new();
  for record in &records {
    let raw = record.text("xml").unwrap_or_default();
    let normalized = xml::normalize(raw, &ctx.config.metadata.orphan_tags);
    let normalized = match xml::collapse_secinfo(&normalized) {
      Ok(doc) => doc,
      Err(e) => {
        report.problem(INVALID_XML, record, Some(e.to_string()));
        continue;
      }
    };

    if record.text("approval_status").is_none_or(|s| !s.eq_ignore_ascii_case(APPROVED)) {
      if normalized != raw {
        write_xml(ctx, &catalog_path, record, &normalized).await?;
        report.normalized += 1;
      }
      report.skipped += 1;
      continue;
    }

    let title = record.text("title").unwrap_or_default();
    if let Some(link) = ctx.config.metadata.parent_link(title) {
      let linked = xml::set_element_text(&normalized, xml::DATASET_PATH, link)?.unwrap_or(normalized);
      write_xml(ctx, &catalog_path, record, &linked).await?;
      debug!(title, link, "parent link written");
      report.linked += 1;
      continue;
    }

    let path = xml::element_text(&normalized, xml::DATASET_PATH)?
      .or_else(|| record.text("dataset_path").map(str::to_owned))
      .unwrap_or_default();
    if is_url(&path) {
      report.skipped += 1;
      continue;
    }
    if path.is_empty() {
      report.problem(INVALID_PATH, record, None);
      continue;
    }
    if !claimed.insert(path.to_ascii_lowercase()) {
      report.problem(DUPLICATE_PATH, record, Some(path));
      continue;
    }
    let exists = with_retry(&ctx.retry, "check dataset", || ctx.store.dataset_exists(&path)).await?;
    if !exists {
      report.problem(INVALID_PATH, record, Some(path));
      continue;
    }

    ctx.store.import_metadata(&path, &normalized).await?;
    ctx.store.upgrade_metadata(&path).await?;
    let synced = ctx.store.export_metadata(&path).await?.unwrap_or(normalized);
    write_xml(ctx, &catalog_path, record, &synced).await?;
    debug!(dataset = %path, "metadata synced");
    report.synced += 1;
  }

  info!(
    synced = report.synced,
    linked = report.linked,
    skipped = report.skipped,
    problems = report.problem_count(),
    "metadata sync complete"
  );
  if report.problem_count() > 0 {
    send_problem_report(ctx, &report).await?;
  }
  Ok(report)
}

/// One table per problem kind.
pub fn problem_report_body(report: &SyncReport) -> String {
  let mut body = String::from("<p>These metadata records could not be synced.</p>\n");
  for (kind, problems) in &report.problems {
    let rows: Vec<Vec<String>> = problems
      .iter()
      .map(|p| vec![p.record_id.clone(), p.title.clone(), p.detail.clone().unwrap_or_default()])
      .collect();
    body.push_str(&format!("<h3>{}</h3>\n", escape_html(kind)));
    body.push_str(&html_table(&["Record", "Title", "Detail"], &rows));
    body.push('\n');
  }
  body
}

async fn send_problem_report<S: GisStore + Mailer>(ctx: &EtlContext<S>, report: &SyncReport) -> Result<()> {
  Email::new("Metadata sync problems")
    .to(&ctx.recipients())
    .reply_to(ctx.config.mail.reply_to.as_deref())
    .html(problem_report_body(report))
    .send(&ctx.store)
    .await
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  #[test]
  fn records_sort_newest_first_with_input_date_fallback() {
    let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let mut records = vec![
      Record::new().with("record_id", "a").with("update_date", day(2)),
      Record::new().with("record_id", "b").with("update_date", day(9)),
      Record::new().with("record_id", "c").with("input_date", day(20)),
      Record::new().with("record_id", "d").with("update_date", day(9)).with("input_date", day(1)),
    ];
    newest_first(&mut records);
    let order: Vec<_> = records.iter().map(|r| r.text("record_id").unwrap()).collect();
    assert_eq!(order, ["d", "b", "a", "c"]);
  }

  #[test]
  fn urls_are_recognized() {
    assert!(is_url("https://gis.example.org/layer"));
    assert!(is_url("HTTP://x"));
    assert!(!is_url("RLIDGeo.dbo.Road"));
  }

  #[test]
  fn report_body_groups_by_problem() {
    let mut report = SyncReport::default();
    let record = Record::new().with("record_id", "{R2}").with("title", "Roads <old>");
    report.problem(DUPLICATE_PATH, &record, Some("RLIDGeo.dbo.Road".into()));
    let body = problem_report_body(&report);
    assert!(body.contains("<h3>Duplicate path of newer record</h3>"));
    assert!(body.contains("Roads &lt;old&gt;"));
    assert_eq!(report.problem_count(), 1);
  }
}
