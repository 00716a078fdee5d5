//! Per-pipeline log output.
//!
//! Every pipeline runs under its own subscriber: DEBUG and up go to
//! `<log_dir>/<name>.log` (truncated when the pipeline starts), INFO and up
//! (or whatever `RUST_LOG` says) go to the console.

use std::{
  fmt,
  fs::{self, File},
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::Local;
use tracing::{Event, Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{
  EnvFilter, Layer,
  fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
  layer::SubscriberExt,
  registry::LookupSpan,
};

use crate::Result;

/// `asctime - target - LEVEL - message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineFormat;

impl<S, N> FormatEvent<S, N> for PipelineFormat
where
  S: Subscriber + for<'a> LookupSpan<'a>,
  N: for<'a> FormatFields<'a> + 'static,
{
  fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
    let meta = event.metadata();
    write!(writer, "{} - {} - {} - ", Local::now().format("%Y-%m-%d %H:%M:%S,%3f"), meta.target(), meta.level())?;
    ctx.field_format().format_fields(writer.by_ref(), event)?;
    writeln!(writer)
  }
}

pub fn log_path(log_dir: &Path, name: &str) -> PathBuf { log_dir.join(format!("{name}.log")) }

/// The subscriber a pipeline named `name` runs under.
pub fn pipeline_subscriber(log_dir: &Path, name: &str) -> Result<impl Subscriber + Send + Sync + 'static> {
  fs::create_dir_all(log_dir)?;
  let file = File::create(log_path(log_dir, name))?;

  let file_layer = tracing_subscriber::fmt::layer()
    .event_format(PipelineFormat)
    .with_ansi(false)
    .with_writer(Mutex::new(file))
    .with_filter(LevelFilter::DEBUG);
  let console_layer = tracing_subscriber::fmt::layer()
    .event_format(PipelineFormat)
    .with_writer(std::io::stderr)
    .with_filter(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy());

  Ok(tracing_subscriber::registry().with(file_layer).with(console_layer))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_layer_writes_debug_lines_in_the_pipeline_format() {
    let dir = tempfile::tempdir().unwrap();
    let subscriber = pipeline_subscriber(dir.path(), "address_etl").unwrap();
    tracing::subscriber::with_default(subscriber, || {
      tracing::debug!(target: "rlid_etl::etls::address", rows = 3, "extracted");
      tracing::trace!("too chatty");
    });

    let log = fs::read_to_string(log_path(dir.path(), "address_etl")).unwrap();
    let line = log.lines().next().unwrap();
    assert!(line.contains(" - rlid_etl::etls::address - DEBUG - extracted rows=3"), "{line}");
    assert_eq!(log.lines().count(), 1);
  }

  #[test]
  fn reopening_truncates_the_previous_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(dir.path(), "job");
    fs::create_dir_all(dir.path()).unwrap();
    fs::write(&path, "stale\n").unwrap();
    drop(pipeline_subscriber(dir.path(), "job").unwrap());
    assert_eq!(fs::read_to_string(path).unwrap(), "");
  }
}
