//! The concrete ETLs, in the shape [`crate::job::EtlFn`] expects.

pub mod address;
pub mod road;

use futures::{FutureExt, future::LocalBoxFuture};
use tracing::info;

use rlid_core::{mail::Mailer, store::GisStore};

use crate::{
  Error, EtlContext, Result, docsync,
  job::send_batch_notification,
  metadata, msag,
  notify::{Email, issue_report_body},
  validation::ValidationRun,
  warehouse::{run_dataset_updates, warehouse_datasets},
};

/// Email the issues that kept subjects out of publication, if any did.
pub async fn report_blocking_issues<S: GisStore + Mailer>(
  ctx: &EtlContext<S>,
  title: &str,
  run: &ValidationRun,
) -> Result<()> {
  let blocking = run.blocking_issues();
  if blocking.is_empty() {
    return Ok(());
  }
  Email::new(title)
    .to(&ctx.recipients())
    .reply_to(ctx.config.mail.reply_to.as_deref())
    .html(issue_report_body(title, &blocking))
    .send(&ctx.store)
    .await?;
  info!(title, issues = blocking.len(), "publication issues reported");
  Ok(())
}

pub fn publish_site_address<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move { address::publish(ctx).await.map(drop) }.boxed_local()
}

pub fn publish_road<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move { road::publish(ctx).await.map(drop) }.boxed_local()
}

pub fn warehouse<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move {
    let updates = warehouse_datasets(&ctx.catalog)?;
    run_dataset_updates(&ctx.store, &ctx.catalog, &updates, crate::now()).await.map(drop)
  }
  .boxed_local()
}

pub fn msag_ranges<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move { msag::run(ctx).await.map(drop) }.boxed_local()
}

pub fn metadata_sync<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move { metadata::sync_metadata(ctx).await.map(drop) }.boxed_local()
}

pub fn document_repositories<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move { docsync::sync_repositories(ctx).await.map(drop) }.boxed_local()
}

pub fn batch_notification<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> LocalBoxFuture<'_, Result<()>> {
  async move {
    let batch_id = ctx.config.mail.batch_id.ok_or_else(|| Error::config("mail.batch_id is not set"))?;
    send_batch_notification(ctx, batch_id).await.map(drop)
  }
  .boxed_local()
}
