//! Runtime for the regional land-information ETL engine.
//!
//! An [`EtlContext`] bundles the store, the dataset catalog, configuration
//! and the external-tool seams. Pipelines ([`job::Pipeline`]) are sequences
//! of ETL functions over that context; the `rlid-etl` binary resolves them
//! by name and runs each under its own log file.

#![allow(async_fn_in_trait)]

pub mod config;
pub mod docsync;
pub mod error;
pub mod etls;
pub mod job;
pub mod logging;
pub mod metadata;
pub mod msag;
pub mod notify;
pub mod paths;
pub mod pipelines;
pub mod validation;
pub mod warehouse;
pub mod workspace;


use chrono::NaiveDateTime;
use serde_json::Value as Json;

use rlid_core::{catalog::Catalog, mail::Mailer, store::GisStore};
use rlid_gis::retry::RetryPolicy;

pub use error::{Error, Result};

use crate::{
  config::EtlConfig,
  docsync::{CommandPdfTool, PdfTool},
  paths::{CommandShareConnector, PathRegistry, ShareConnector, ShareSessions},
};

/// Everything an ETL function runs against.
pub struct EtlContext<S> {
  pub store:    S,
  pub catalog:  Catalog,
  pub config:   EtlConfig,
  pub retry:    RetryPolicy,
  pub paths:    PathRegistry,
  pub shares:   ShareSessions,
  pub pdf_tool: Box<dyn PdfTool>,
}

impl<S: GisStore + Mailer> EtlContext<S> {
  /// A context over `store` using the command-line tools and share
  /// commands from `config`.
  pub fn new(store: S, config: EtlConfig) -> Self {
    let host = std::env::var("COMPUTERNAME").ok();
    let pdf_tool = CommandPdfTool::from_config(&config.tools, host.as_deref());
    let connector = CommandShareConnector::new(config.share_commands.clone());
    Self::with_tools(store, config, Box::new(connector), Box::new(pdf_tool))
  }

  pub fn with_tools(
    store: S,
    config: EtlConfig,
    connector: Box<dyn ShareConnector>,
    pdf_tool: Box<dyn PdfTool>,
  ) -> Self {
    Self {
      store,
      catalog: Catalog::standard(),
      retry: config.retry.into(),
      paths: PathRegistry::new(config.paths.clone()),
      shares: ShareSessions::new(connector, config.shares.clone()),
      pdf_tool,
      config,
    }
  }

  /// Configured default recipients as a JSON list.
  pub fn recipients(&self) -> Json { Json::from(self.config.mail.recipients.clone()) }
}

/// The current local warehouse time.
pub fn now() -> NaiveDateTime { chrono::Local::now().naive_local() }
