//! Runtime configuration, deserialized from `rlid-etl.toml` and `RLID__*`
//! environment variables.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use strum::{Display, EnumString};
use uuid::Uuid;

use rlid_gis::retry::RetryPolicy;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
  pub store_path:     PathBuf,
  #[serde(default = "default_log_dir")]
  pub log_dir:        PathBuf,
  #[serde(default)]
  pub paths:          BTreeMap<String, String>,
  #[serde(default)]
  pub shares:         BTreeMap<String, ShareConfig>,
  #[serde(default)]
  pub share_commands: ShareCommands,
  #[serde(default)]
  pub tools:          ToolsConfig,
  #[serde(default)]
  pub mail:           MailConfig,
  #[serde(default)]
  pub msag:           MsagConfig,
  #[serde(default)]
  pub metadata:       MetadataConfig,
  #[serde(default)]
  pub repositories:   Vec<RepositoryConfig>,
  #[serde(default)]
  pub retry:          RetryConfig,
}

fn default_log_dir() -> PathBuf { PathBuf::from("logs") }

impl EtlConfig {
  /// Read `path` (if present) layered under the `RLID` environment.
  pub fn load(path: &Path) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("RLID").separator("__"))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// A configuration with every section at its default.
  pub fn with_store(store_path: impl Into<PathBuf>) -> Self {
    Self {
      store_path:     store_path.into(),
      log_dir:        default_log_dir(),
      paths:          BTreeMap::new(),
      shares:         BTreeMap::new(),
      share_commands: ShareCommands::default(),
      tools:          ToolsConfig::default(),
      mail:           MailConfig::default(),
      msag:           MsagConfig::default(),
      metadata:       MetadataConfig::default(),
      repositories:   Vec::new(),
      retry:          RetryConfig::default(),
    }
  }

  pub fn repository(&self, name: &str) -> Result<&RepositoryConfig> {
    self
      .repositories
      .iter()
      .find(|r| r.name == name)
      .ok_or_else(|| Error::config(format!("no repository named {name:?}")))
  }
}

// ─── Shares ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShareConfig {
  pub path:     String,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
}

/// Command templates for attaching and detaching a share. Arguments may use
/// `{path}`, `{username}` and `{password}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShareCommands {
  pub connect:    Vec<String>,
  pub disconnect: Vec<String>,
}

impl Default for ShareCommands {
  fn default() -> Self {
    let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect();
    Self {
      connect:    args(&["net", "use", "{path}", "/user:{username}", "{password}"]),
      disconnect: args(&["net", "use", "{path}", "/delete", "/yes"]),
    }
  }
}

// ─── External tools ──────────────────────────────────────────────────────────

/// Command templates for the PDF tools. Arguments may use `{input}`,
/// `{output}` and `{text}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolsConfig {
  #[serde(default)]
  pub image_to_pdf:  Vec<String>,
  #[serde(default)]
  pub watermark:     Vec<String>,
  #[serde(default = "default_pdf_wait")]
  pub pdf_wait_secs: u64,
  /// Per-host overrides keyed by `COMPUTERNAME`.
  #[serde(default)]
  pub hosts:         BTreeMap<String, HostTools>,
}

fn default_pdf_wait() -> u64 { 30 }

impl Default for ToolsConfig {
  fn default() -> Self {
    Self { image_to_pdf: Vec::new(), watermark: Vec::new(), pdf_wait_secs: default_pdf_wait(), hosts: BTreeMap::new() }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostTools {
  pub image_to_pdf: Option<Vec<String>>,
  pub watermark:    Option<Vec<String>>,
}

impl ToolsConfig {
  /// The templates for `host`, falling back to the shared ones.
  pub fn for_host(&self, host: Option<&str>) -> (Vec<String>, Vec<String>) {
    let overrides = host.and_then(|h| self.hosts.iter().find(|(k, _)| k.eq_ignore_ascii_case(h)).map(|(_, v)| v));
    let image_to_pdf = overrides.and_then(|o| o.image_to_pdf.clone()).unwrap_or_else(|| self.image_to_pdf.clone());
    let watermark = overrides.and_then(|o| o.watermark.clone()).unwrap_or_else(|| self.watermark.clone());
    (image_to_pdf, watermark)
  }

  pub fn pdf_wait(&self) -> Duration { Duration::from_secs(self.pdf_wait_secs) }
}

// ─── Mail ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MailConfig {
  #[serde(default)]
  pub recipients: Vec<String>,
  pub reply_to:   Option<String>,
  /// Batch the registered jobs belong to.
  pub batch_id:   Option<Uuid>,
}

// ─── MSAG ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GeometryStyle {
  #[default]
  ConvexHull,
  HullRectangle,
  Multipoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MsagConfig {
  #[serde(default)]
  pub geometry_style:      GeometryStyle,
  #[serde(default = "default_buffer")]
  pub buffer_distance:     f64,
  #[serde(default = "default_deviation")]
  pub deviation_threshold: f64,
}

fn default_buffer() -> f64 { 50.0 }

fn default_deviation() -> f64 { 0.01 }

impl Default for MsagConfig {
  fn default() -> Self {
    Self {
      geometry_style:      GeometryStyle::default(),
      buffer_distance:     default_buffer(),
      deviation_threshold: default_deviation(),
    }
  }
}

// ─── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetadataConfig {
  /// Records whose dataset path is replaced by a parent link.
  #[serde(default)]
  pub parent_titles: Vec<ParentLink>,
  /// Tags stripped wherever they appear.
  #[serde(default)]
  pub orphan_tags:   Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParentLink {
  pub title: String,
  pub link:  String,
}

impl MetadataConfig {
  pub fn parent_link(&self, title: &str) -> Option<&str> {
    self.parent_titles.iter().find(|p| p.title == title).map(|p| p.link.as_str())
  }
}

// ─── Repositories ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepositoryConfig {
  pub name:              String,
  pub source:            PathBuf,
  pub destination:       PathBuf,
  /// Lowercase extensions without the dot.
  pub extensions:        Vec<String>,
  #[serde(default)]
  pub flatten:           bool,
  #[serde(default)]
  pub create_pdf_copies: bool,
  /// Turns on tax-map archival.
  #[serde(default)]
  pub archive_bin:       Option<PathBuf>,
  /// Named share held for the duration of the sync.
  #[serde(default)]
  pub share:             Option<String>,
}

// ─── Retry ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
  pub attempts:          u32,
  pub initial_wait_secs: u64,
  pub max_wait_secs:     u64,
}

impl Default for RetryConfig {
  fn default() -> Self { Self { attempts: 4, initial_wait_secs: 4, max_wait_secs: 32 } }
}

impl From<RetryConfig> for RetryPolicy {
  fn from(c: RetryConfig) -> Self {
    Self {
      attempts:     c.attempts,
      initial_wait: Duration::from_secs(c.initial_wait_secs),
      max_wait:     Duration::from_secs(c.max_wait_secs),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  #[test]
  fn file_sections_deserialize_with_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
      file,
      r#"
store_path = "warehouse.sqlite3"

[paths]
taxmap_staging = "//gis/staging/taxmaps"

[shares.gis]
path = "//gis/share"
username = "etl"

[msag]
geometry_style = "hull_rectangle"

[[repositories]]
name = "taxmaps"
source = "/src"
destination = "/dst"
extensions = ["pdf", "tif"]
archive_bin = "/archive"
share = "gis"
"#
    )
    .unwrap();

    let config = EtlConfig::load(file.path()).unwrap();
    assert_eq!(config.store_path, PathBuf::from("warehouse.sqlite3"));
    assert_eq!(config.log_dir, PathBuf::from("logs"));
    assert_eq!(config.paths["taxmap_staging"], "//gis/staging/taxmaps");
    assert_eq!(config.shares["gis"].username.as_deref(), Some("etl"));
    assert_eq!(config.msag.geometry_style, GeometryStyle::HullRectangle);
    assert_eq!(config.msag.buffer_distance, 50.0);
    assert!(config.repository("taxmaps").unwrap().archive_bin.is_some());
    assert_eq!(config.repository("taxmaps").unwrap().share.as_deref(), Some("gis"));
    assert!(config.repository("other").is_err());

    let retry = RetryPolicy::from(config.retry);
    assert_eq!(retry, RetryPolicy::default());
  }

  #[test]
  fn missing_store_path_is_a_config_error() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "log_dir = \"x\"").unwrap();
    assert!(matches!(EtlConfig::load(file.path()), Err(Error::Config(_))));
  }

  #[test]
  fn host_overrides_replace_tool_templates() {
    let mut tools = ToolsConfig { image_to_pdf: vec!["convert".into()], ..ToolsConfig::default() };
    tools.hosts.insert("GIS01".into(), HostTools { image_to_pdf: Some(vec!["magick".into()]), watermark: None });
    assert_eq!(tools.for_host(Some("GIS01")).0, vec!["magick".to_owned()]);
    assert_eq!(tools.for_host(Some("OTHER")).0, vec!["convert".to_owned()]);
    assert_eq!(tools.for_host(None).1, Vec::<String>::new());
  }
}
