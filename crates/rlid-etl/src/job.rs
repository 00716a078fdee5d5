//! Jobs, pipelines and their history rows.
//!
//! A [`Job`] is an ordered list of ETL functions. Running one opens an
//! `incomplete` history row, runs every ETL in order under the pipeline's
//! own log file, and marks the row `complete` at the end. The first failing
//! ETL stops the job and leaves the row `incomplete`; [`mark_failed`] is the
//! explicit path to `failed`.

use std::{collections::BTreeMap, path::Path};

use futures::future::LocalBoxFuture;
use serde_json::Value as Json;
use strum::{Display, EnumString};
use tracing::{error, info, instrument::WithSubscriber};
use uuid::Uuid;

use rlid_core::{
  catalog::keys,
  mail::Mailer,
  record::{Record, Value},
  store::{GisStore, ReadQuery},
};
use rlid_gis::{
  cursor::{self, ensure_dataset},
  retry::with_retry,
};

use crate::{
  Error, EtlContext, Result, logging,
  notify::{Email, html_table},
};

/// One ETL step of a job.
pub type EtlFn<S> = for<'a> fn(&'a EtlContext<S>) -> LocalBoxFuture<'a, Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
  Incomplete,
  Complete,
  Failed,
}

impl JobStatus {
  /// Code stored in the history table.
  pub fn code(self) -> i64 {
    match self {
      Self::Incomplete => -1,
      Self::Complete => 0,
      Self::Failed => 1,
    }
  }

  pub fn from_code(code: i64) -> Option<Self> {
    match code {
      -1 => Some(Self::Incomplete),
      0 => Some(Self::Complete),
      1 => Some(Self::Failed),
      _ => None,
    }
  }
}

pub struct Job<S> {
  pub name: String,
  pub etls: Vec<(&'static str, EtlFn<S>)>,
}

impl<S> Job<S> {
  pub fn new(name: &str) -> Self { Self { name: name.to_owned(), etls: Vec::new() } }

  pub fn etl(mut self, name: &'static str, etl: EtlFn<S>) -> Self {
    self.etls.push((name, etl));
    self
  }
}

/// What a pipeline name resolves to.
pub enum Pipeline<S> {
  Job(Job<S>),
  /// A single ETL run without a history row.
  Etl(EtlFn<S>),
}

pub struct JobRegistry<S> {
  pipelines: BTreeMap<String, Pipeline<S>>,
}

impl<S> Default for JobRegistry<S> {
  fn default() -> Self { Self { pipelines: BTreeMap::new() } }
}

impl<S> JobRegistry<S> {
  pub fn new() -> Self { Self::default() }

  pub fn job(mut self, job: Job<S>) -> Self {
    self.pipelines.insert(job.name.clone(), Pipeline::Job(job));
    self
  }

  pub fn etl(mut self, name: &str, etl: EtlFn<S>) -> Self {
    self.pipelines.insert(name.to_owned(), Pipeline::Etl(etl));
    self
  }

  pub fn get(&self, name: &str) -> Result<&Pipeline<S>> {
    self.pipelines.get(name).ok_or_else(|| Error::UnknownPipeline(name.to_owned()))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> { self.pipelines.keys().map(String::as_str) }
}

// ─── History ─────────────────────────────────────────────────────────────────

async fn history_paths<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<(String, String)> {
  let job_path = ctx.catalog.path(keys::ETL_JOB, None)?;
  let history_path = ctx.catalog.path(keys::ETL_JOB_HISTORY, None)?;
  ensure_dataset(&ctx.store, &job_path, &ctx.catalog.describe(keys::ETL_JOB)?.schema(None)).await?;
  ensure_dataset(&ctx.store, &history_path, &ctx.catalog.describe(keys::ETL_JOB_HISTORY)?.schema(None)).await?;
  Ok((job_path, history_path))
}

/// The id of the job named `name`, registering it on first use.
async fn job_id<S: GisStore + Mailer>(ctx: &EtlContext<S>, job_path: &str, name: &str) -> Result<Uuid> {
  let jobs = ctx.store.read(job_path, &ReadQuery::fields(&["job_id", "job_name"])).await?;
  if let Some(id) = jobs.iter().find(|r| r.text("job_name") == Some(name)).and_then(|r| r.get("job_id").as_guid()) {
    return Ok(id);
  }
  let id = Uuid::new_v4();
  let row = Record::new()
    .with("job_id", id)
    .with("job_name", name)
    .with("batch_id", ctx.config.mail.batch_id);
  ctx.store.insert(job_path, vec![row]).await?;
  info!(job = name, job_id = %id, "job registered");
  Ok(id)
}

/// Open an `incomplete` history row for `name`.
pub async fn start_history<S: GisStore + Mailer>(ctx: &EtlContext<S>, name: &str) -> Result<Uuid> {
  let (job_path, history_path) = history_paths(ctx).await?;
  let job_id = job_id(ctx, &job_path, name).await?;
  let history_id = Uuid::new_v4();
  let row = Record::new()
    .with("etl_job_history_id", history_id)
    .with("job_id", job_id)
    .with("job_name", name)
    .with("start_time", crate::now())
    .with("job_status", JobStatus::Incomplete.code());
  ctx.store.insert(&history_path, vec![row]).await?;
  Ok(history_id)
}

/// Close a history row with `status`.
pub async fn finish_history<S: GisStore + Mailer>(ctx: &EtlContext<S>, history_id: Uuid, status: JobStatus) -> Result<()> {
  let (_, history_path) = history_paths(ctx).await?;
  let row = Record::new()
    .with("etl_job_history_id", history_id)
    .with("end_time", crate::now())
    .with("job_status", status.code());
  let n = cursor::update_rows_by_key(&ctx.store, &history_path, &["etl_job_history_id".to_owned()], vec![row]).await?;
  if n == 0 {
    return Err(Error::config(format!("no history row {history_id}")));
  }
  Ok(())
}

/// Mark a history row left `incomplete` by a failed job as `failed`.
pub async fn mark_failed<S: GisStore + Mailer>(ctx: &EtlContext<S>, history_id: Uuid) -> Result<()> {
  finish_history(ctx, history_id, JobStatus::Failed).await
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// Run `pipeline` under a fresh `<log_dir>/<name>.log`.
pub async fn execute_pipeline<S: GisStore + Mailer>(
  ctx: &EtlContext<S>,
  name: &str,
  pipeline: &Pipeline<S>,
  log_dir: &Path,
) -> Result<()> {
  let subscriber = logging::pipeline_subscriber(log_dir, name)?;
  run_pipeline(ctx, name, pipeline).with_subscriber(subscriber).await
}

async fn run_pipeline<S: GisStore + Mailer>(ctx: &EtlContext<S>, name: &str, pipeline: &Pipeline<S>) -> Result<()> {
  let fail = |history_id: Option<Uuid>, e: Error| {
    error!(pipeline = name, error = %e, "pipeline failed");
    Error::Pipeline { name: name.to_owned(), history_id, source: Box::new(e) }
  };
  match pipeline {
    Pipeline::Etl(etl) => {
      info!(pipeline = name, "starting");
      etl(ctx).await.map_err(|e| fail(None, e))?;
    }
    Pipeline::Job(job) => {
      let history_id = start_history(ctx, &job.name).await.map_err(|e| fail(None, e))?;
      info!(job = %job.name, history_id = %history_id, etls = job.etls.len(), "starting job");
      for (etl_name, etl) in &job.etls {
        info!(job = %job.name, etl = etl_name, "starting etl");
        etl(ctx).await.map_err(|e| fail(Some(history_id), e))?;
        info!(job = %job.name, etl = etl_name, "etl complete");
      }
      finish_history(ctx, history_id, JobStatus::Complete).await.map_err(|e| fail(Some(history_id), e))?;
    }
  }
  info!(pipeline = name, "complete");
  Ok(())
}

// ─── Batch notification ──────────────────────────────────────────────────────

/// Latest history row of each job in `batch_id`: `(job name, status, start,
/// end)`. Jobs that never ran read as `incomplete`.
pub async fn batch_status<S: GisStore + Mailer>(ctx: &EtlContext<S>, batch_id: Uuid) -> Result<Vec<(String, JobStatus, Value, Value)>> {
  let (job_path, history_path) = history_paths(ctx).await?;
  let all = ReadQuery::all();
  let jobs = with_retry(&ctx.retry, "read jobs", || ctx.store.read(&job_path, &all)).await?;
  let history = with_retry(&ctx.retry, "read job history", || ctx.store.read(&history_path, &all)).await?;

  let mut out = Vec::new();
  for job in jobs.iter().filter(|j| j.get("batch_id").as_guid() == Some(batch_id)) {
    let job_id = job.get("job_id");
    let latest = history.iter().filter(|h| h.get("job_id") == job_id).max_by_key(|h| h.date("start_time"));
    let name = job.text("job_name").unwrap_or_default().to_owned();
    match latest {
      Some(h) => {
        let status = h.int("job_status").and_then(JobStatus::from_code).unwrap_or(JobStatus::Incomplete);
        out.push((name, status, h.get("start_time").clone(), h.get("end_time").clone()));
      }
      None => out.push((name, JobStatus::Incomplete, Value::Null, Value::Null)),
    }
  }
  out.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(out)
}

/// Email the batch's recipients a status table and return the overall
/// status: `complete` only when every job is.
pub async fn send_batch_notification<S: GisStore + Mailer>(ctx: &EtlContext<S>, batch_id: Uuid) -> Result<JobStatus> {
  let batch_path = ctx.catalog.path(keys::ETL_BATCH, None)?;
  let all = ReadQuery::all();
  let batches = with_retry(&ctx.retry, "read batches", || ctx.store.read(&batch_path, &all)).await?;
  let batch = batches
    .iter()
    .find(|b| b.get("batch_id").as_guid() == Some(batch_id))
    .ok_or_else(|| Error::config(format!("no batch {batch_id}")))?;
  let batch_name = batch.text("batch_name").unwrap_or("ETL batch");

  let jobs = batch_status(ctx, batch_id).await?;
  let overall = if !jobs.is_empty() && jobs.iter().all(|j| j.1 == JobStatus::Complete) {
    JobStatus::Complete
  } else {
    JobStatus::Incomplete
  };

  let rows: Vec<Vec<String>> = jobs
    .iter()
    .map(|(name, status, start, end)| vec![name.clone(), status.to_string(), start.to_string(), end.to_string()])
    .collect();
  let body = format!("<p>Batch status: {overall}</p>\n{}", html_table(&["Job", "Status", "Start", "End"], &rows));
  let recipients = Json::from(batch.text("notification_email_recipients").unwrap_or_default());
  Email::new(&format!("{batch_name}: {overall}"))
    .to(&recipients)
    .reply_to(ctx.config.mail.reply_to.as_deref())
    .html(body)
    .send(&ctx.store)
    .await?;
  info!(batch = batch_name, status = %overall, jobs = jobs.len(), "batch notification sent");
  Ok(overall)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_match_the_history_table() {
    for status in [JobStatus::Incomplete, JobStatus::Complete, JobStatus::Failed] {
      assert_eq!(JobStatus::from_code(status.code()), Some(status));
    }
    assert_eq!(JobStatus::Incomplete.code(), -1);
    assert_eq!(JobStatus::Failed.to_string(), "failed");
    assert_eq!(JobStatus::from_code(7), None);
  }
}
