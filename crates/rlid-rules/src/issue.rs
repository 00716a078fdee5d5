//! Issue values, prior-annotation merging and publication sets.
//!
//! An issue is identified by `(subject, description)`. Maintainers annotate
//! issues in the issue dataset; those notes and the first-seen date carry
//! forward to the same pair on every later run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDateTime;
use rlid_core::record::{Record, Value};

pub const DESCRIPTION_FIELD: &str = "description";
pub const OK_TO_PUBLISH_FIELD: &str = "ok_to_publish";
pub const MAINT_NOTES_FIELD: &str = "maint_notes";
pub const MAINT_INIT_DATE_FIELD: &str = "maint_init_date";

/// `(subject key, description)`.
pub type IssueKey = (String, String);

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
  /// Identity value of the subject (e.g. an address gfid).
  pub subject:         Value,
  pub description:     String,
  pub ok_to_publish:   bool,
  pub maint_notes:     Option<String>,
  pub maint_init_date: Option<NaiveDateTime>,
  /// Extra subject attributes written alongside the issue for reviewers.
  pub context:         BTreeMap<String, Value>,
}

impl Issue {
  pub fn new(subject: Value, description: impl Into<String>, ok_to_publish: bool) -> Self {
    Self {
      subject,
      description: description.into(),
      ok_to_publish,
      maint_notes: None,
      maint_init_date: None,
      context: BTreeMap::new(),
    }
  }

  pub fn with_context(mut self, name: &str, value: impl Into<Value>) -> Self {
    self.context.insert(name.to_owned(), value.into());
    self
  }

  pub fn subject_key(&self) -> String { self.subject.key_string() }

  pub fn key(&self) -> IssueKey { (self.subject_key(), self.description.clone()) }

  /// The issue as a row of an issue dataset whose subject column is
  /// `id_field`.
  pub fn to_record(&self, id_field: &str) -> Record {
    let mut record = Record::new()
      .with(id_field, self.subject.clone())
      .with(DESCRIPTION_FIELD, self.description.as_str())
      .with(OK_TO_PUBLISH_FIELD, self.ok_to_publish)
      .with(MAINT_NOTES_FIELD, self.maint_notes.clone())
      .with(MAINT_INIT_DATE_FIELD, self.maint_init_date);
    for (name, value) in &self.context {
      record.set(name, value.clone());
    }
    record
  }
}

// ─── Prior annotations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorAnnotation {
  pub maint_notes:     Option<String>,
  pub maint_init_date: Option<NaiveDateTime>,
}

/// Annotations of existing issue rows, keyed by `(subject, description)`.
pub fn prior_annotations(rows: &[Record], id_field: &str) -> HashMap<IssueKey, PriorAnnotation> {
  rows
    .iter()
    .filter_map(|row| {
      let description = row.text(DESCRIPTION_FIELD)?.to_owned();
      let annotation = PriorAnnotation {
        maint_notes:     row.text(MAINT_NOTES_FIELD).map(str::to_owned),
        maint_init_date: row.date(MAINT_INIT_DATE_FIELD),
      };
      Some(((row.get(id_field).key_string(), description), annotation))
    })
    .collect()
}

/// Carry prior notes and first-seen dates onto `issues`. Issues seen for
/// the first time start at `now`.
pub fn merge_prior(issues: &mut [Issue], prior: &HashMap<IssueKey, PriorAnnotation>, now: NaiveDateTime) {
  for issue in issues {
    match prior.get(&issue.key()) {
      Some(annotation) => {
        issue.maint_notes = annotation.maint_notes.clone();
        issue.maint_init_date = Some(annotation.maint_init_date.unwrap_or(now));
      }
      None => issue.maint_init_date = Some(now),
    }
  }
}

/// Collapse issues sharing a key into one. The merged issue may publish
/// only when every contributor may.
pub fn consolidate(issues: Vec<Issue>) -> Vec<Issue> {
  let mut order: Vec<IssueKey> = Vec::new();
  let mut merged: HashMap<IssueKey, Issue> = HashMap::new();
  for issue in issues {
    let key = issue.key();
    match merged.get_mut(&key) {
      Some(existing) => existing.ok_to_publish &= issue.ok_to_publish,
      None => {
        order.push(key.clone());
        merged.insert(key, issue);
      }
    }
  }
  order.into_iter().filter_map(|k| merged.remove(&k)).collect()
}

/// Subjects with at least one issue that blocks publication. A single
/// blocking issue outweighs any number of publishable ones.
pub fn blocked_subjects(issues: &[Issue]) -> BTreeSet<String> {
  issues.iter().filter(|i| !i.ok_to_publish).map(Issue::subject_key).collect()
}

// ─── Hold / rollback ─────────────────────────────────────────────────────────

/// Subjects kept back from publication, split by whether a published row
/// already exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicationSets {
  /// New subjects to drop from the transform output.
  pub hold:     BTreeSet<String>,
  /// Published subjects whose transform row reverts to the published row.
  pub rollback: BTreeSet<String>,
}

impl PublicationSets {
  pub fn compute(issues: &[Issue], transformed: &HashSet<String>, published: &HashSet<String>) -> Self {
    let mut sets = Self::default();
    for subject in blocked_subjects(issues) {
      if !transformed.contains(&subject) {
        continue;
      }
      if published.contains(&subject) {
        sets.rollback.insert(subject);
      } else {
        sets.hold.insert(subject);
      }
    }
    sets
  }

  pub fn is_empty(&self) -> bool { self.hold.is_empty() && self.rollback.is_empty() }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn at(day: u32) -> NaiveDateTime { NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_hms_opt(8, 0, 0).unwrap() }

  #[test]
  fn first_occurrence_starts_now_and_reoccurrence_keeps_annotations() {
    let mut issues = vec![Issue::new(Value::from("a"), "bad", false), Issue::new(Value::from("b"), "bad", false)];
    let prior_row = Record::new()
      .with("gfid", "a")
      .with(DESCRIPTION_FIELD, "bad")
      .with(MAINT_NOTES_FIELD, "called the city")
      .with(MAINT_INIT_DATE_FIELD, at(1));
    let prior = prior_annotations(&[prior_row], "gfid");

    merge_prior(&mut issues, &prior, at(20));
    assert_eq!(issues[0].maint_notes.as_deref(), Some("called the city"));
    assert_eq!(issues[0].maint_init_date, Some(at(1)));
    assert_eq!(issues[1].maint_notes, None);
    assert_eq!(issues[1].maint_init_date, Some(at(20)));

    // A second run over the rows the first run wrote changes nothing.
    let rows: Vec<Record> = issues.iter().map(|i| i.to_record("gfid")).collect();
    let mut again = vec![Issue::new(Value::from("a"), "bad", false), Issue::new(Value::from("b"), "bad", false)];
    merge_prior(&mut again, &prior_annotations(&rows, "gfid"), at(25));
    assert_eq!(again, issues);
  }

  #[test]
  fn consolidation_keeps_the_worst_flag() {
    let issues = consolidate(vec![
      Issue::new(Value::from("a"), "dup", true),
      Issue::new(Value::from("a"), "dup", false),
      Issue::new(Value::from("a"), "other", true),
    ]);
    assert_eq!(issues.len(), 2);
    assert!(!issues[0].ok_to_publish);
    assert!(issues[1].ok_to_publish);
  }

  #[test]
  fn hold_and_rollback_are_disjoint() {
    let issues = vec![
      Issue::new(Value::from("new"), "bad", false),
      Issue::new(Value::from("old"), "bad", false),
      Issue::new(Value::from("old"), "fine", true),
      Issue::new(Value::from("warned"), "note", true),
      Issue::new(Value::from("gone"), "bad", false),
    ];
    let transformed: HashSet<String> = ["new", "old", "warned"].map(String::from).into();
    let published: HashSet<String> = ["old", "warned", "gone"].map(String::from).into();
    let sets = PublicationSets::compute(&issues, &transformed, &published);
    assert_eq!(sets.hold, BTreeSet::from(["new".to_owned()]));
    assert_eq!(sets.rollback, BTreeSet::from(["old".to_owned()]));
    assert!(!sets.is_empty());
  }

  #[test]
  fn issue_rows_carry_context_and_yn_flag() {
    let row = Issue::new(Value::from("a"), "bad", false).with_context("city_name", "Eugene").to_record("gfid");
    assert_eq!(row.text(OK_TO_PUBLISH_FIELD), Some("N"));
    assert_eq!(row.text("city_name"), Some("Eugene"));
    assert_eq!(row.text("gfid"), Some("a"));
  }
}
