//! rlid-etl binary.
//!
//! Reads `rlid-etl.toml` (or the path given with `--config`), opens the
//! warehouse store and runs each named pipeline in order, each under its own
//! log file.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use clap::Parser;
use rlid_etl::{
  Error, EtlContext,
  config::EtlConfig,
  job::{execute_pipeline, mark_failed},
  pipelines,
};
use rlid_store_sqlite::SqliteStore;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "RLID ETL pipelines")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "rlid-etl.toml")]
  config: PathBuf,

  /// Directory for per-pipeline log files; overrides `log_dir`.
  #[arg(long)]
  log_dir: Option<PathBuf>,

  /// Jobs or ETLs to run, in order.
  pipelines: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy())
    .init();

  let cli = Cli::parse();
  let registry = pipelines::registry::<SqliteStore>();
  if cli.pipelines.is_empty() {
    let names: Vec<&str> = registry.names().collect();
    error!(available = %names.join(", "), "no pipelines given");
    return Ok(ExitCode::FAILURE);
  }
  // Resolve every name before running anything.
  let resolved = cli
    .pipelines
    .iter()
    .map(|name| registry.get(name).map(|p| (name.as_str(), p)))
    .collect::<Result<Vec<_>, _>>()
    .context("unknown pipeline")?;

  let config = EtlConfig::load(&cli.config).with_context(|| format!("failed to load {}", cli.config.display()))?;
  let log_dir = cli.log_dir.unwrap_or_else(|| config.log_dir.clone());
  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store {}", config.store_path.display()))?;
  let ctx = EtlContext::new(store, config);

  let mut failed = false;
  for (name, pipeline) in resolved {
    match execute_pipeline(&ctx, name, pipeline, &log_dir).await {
      Ok(()) => info!(pipeline = name, "pipeline succeeded"),
      Err(Error::Pipeline { history_id, source, .. }) => {
        error!(pipeline = name, error = %source, "pipeline failed");
        if let Some(id) = history_id {
          mark_failed(&ctx, id).await.context("failed to mark the job failed")?;
        }
        failed = true;
      }
      Err(e) => return Err(e).context(format!("pipeline {name} could not start")),
    }
  }
  Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
