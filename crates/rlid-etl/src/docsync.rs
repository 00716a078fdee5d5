//! Document repository mirroring.
//!
//! A repository is a source tree mirrored into a destination tree. Files are
//! copied when they are new or byte-different; image files can get a PDF
//! twin, and repositories with an archive bin keep a watermarked copy of
//! every tax map they replace.

use std::{
  fs::{self, File},
  path::{Path, PathBuf},
  process::Command,
  time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use rlid_core::{
  catalog::keys,
  mail::Mailer,
  record::Record,
  store::GisStore,
};
use rlid_gis::cursor::{self, ensure_dataset};

use crate::{
  Error, EtlContext, Result,
  config::{RepositoryConfig, ToolsConfig},
  paths::with_share,
};

const IMAGE_EXTENSIONS: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff"];

const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ─── PDF tools ───────────────────────────────────────────────────────────────

/// External PDF conversion and stamping.
pub trait PdfTool {
  /// Start converting the image at `input` into `output`. The tool may
  /// finish writing after it returns.
  fn image_to_pdf(&self, input: &Path, output: &Path) -> Result<()>;

  /// Write `source` to `output` with `text` stamped across every page.
  fn watermark(&self, source: &Path, output: &Path, text: &str) -> Result<()>;
}

/// Runs the command templates from `[tools]`.
#[derive(Debug, Clone, Default)]
pub struct CommandPdfTool {
  image_to_pdf: Vec<String>,
  watermark:    Vec<String>,
}

impl CommandPdfTool {
  pub fn from_config(tools: &ToolsConfig, host: Option<&str>) -> Self {
    let (image_to_pdf, watermark) = tools.for_host(host);
    Self { image_to_pdf, watermark }
  }

  fn run(template: &[String], what: &str, input: &Path, output: &Path, text: &str) -> Result<()> {
    let args: Vec<String> = template
      .iter()
      .map(|a| {
        a.replace("{input}", &input.to_string_lossy())
          .replace("{output}", &output.to_string_lossy())
          .replace("{text}", text)
      })
      .collect();
    let (program, rest) = args.split_first().ok_or_else(|| Error::config(format!("no {what} command configured")))?;
    let status = Command::new(program).args(rest).status()?;
    if !status.success() {
      return Err(rlid_core::Error::Subprocess { program: program.clone(), status: status.to_string() }.into());
    }
    Ok(())
  }
}

impl PdfTool for CommandPdfTool {
  fn image_to_pdf(&self, input: &Path, output: &Path) -> Result<()> {
    Self::run(&self.image_to_pdf, "image_to_pdf", input, output, "")
  }

  fn watermark(&self, source: &Path, output: &Path, text: &str) -> Result<()> {
    Self::run(&self.watermark, "watermark", source, output, text)
  }
}

// ─── Change detection ────────────────────────────────────────────────────────

fn digest(path: &Path) -> Result<String> {
  let mut hasher = Sha256::new();
  std::io::copy(&mut File::open(path)?, &mut hasher)?;
  Ok(hex::encode(hasher.finalize()))
}

/// Whether `destination` is missing or differs from `source` byte for byte.
pub fn differs(source: &Path, destination: &Path) -> Result<bool> {
  if !destination.exists() {
    return Ok(true);
  }
  if fs::metadata(source)?.len() != fs::metadata(destination)?.len() {
    return Ok(true);
  }
  Ok(digest(source)? != digest(destination)?)
}

fn set_writable(path: &Path) -> Result<()> {
  if !path.exists() {
    return Ok(());
  }
  let mut permissions = fs::metadata(path)?.permissions();
  if permissions.readonly() {
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)?;
  }
  Ok(())
}

/// Copy `source` over `destination`, keeping the source's modified time.
fn overwrite(source: &Path, destination: &Path) -> Result<()> {
  set_writable(destination)?;
  fs::copy(source, destination)?;
  // The copy carries the source's permission bits.
  set_writable(destination)?;
  let modified = fs::metadata(source)?.modified()?;
  File::options().write(true).open(destination)?.set_modified(modified)?;
  set_writable(destination)
}

fn extension(path: &Path) -> Option<String> { path.extension().map(|e| e.to_string_lossy().to_lowercase()) }

/// Where `file` lands in the destination tree.
pub fn destination_for(repo: &RepositoryConfig, file: &Path) -> Result<PathBuf> {
  if repo.flatten {
    let name = file.file_name().ok_or_else(|| Error::config(format!("{} has no file name", file.display())))?;
    return Ok(repo.destination.join(name));
  }
  let relative = file
    .strip_prefix(&repo.source)
    .map_err(|_| Error::config(format!("{} is outside {}", file.display(), repo.source.display())))?;
  Ok(repo.destination.join(relative))
}

// ─── Sync ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
  pub copied:       usize,
  pub unchanged:    usize,
  pub pdfs_created: usize,
  pub archived:     usize,
}

/// Wait for a tool that writes its output asynchronously.
async fn wait_for(path: &Path, limit: Duration) -> Result<()> {
  let started = Instant::now();
  while !path.exists() {
    if started.elapsed() >= limit {
      return Err(
        rlid_core::Error::Subprocess {
          program: "image_to_pdf".into(),
          status:  format!("no {} after {limit:?}", path.display()),
        }
        .into(),
      );
    }
    tokio::time::sleep(POLL_INTERVAL).await;
  }
  Ok(())
}

async fn upsert<S: GisStore + Mailer>(ctx: &EtlContext<S>, key: &str, row: Record) -> Result<()> {
  let descriptor = ctx.catalog.describe(key)?;
  let path = ctx.catalog.path(key, None)?;
  ensure_dataset(&ctx.store, &path, &descriptor.schema(None)).await?;
  let id_fields = ctx.catalog.id_field_names(key)?;
  cursor::update_from_records(&ctx.store, &path, vec![row], &id_fields, false).await?;
  Ok(())
}

/// Keep a watermarked copy of the tax map about to be replaced.
async fn archive<S: GisStore + Mailer>(ctx: &EtlContext<S>, bin: &Path, current: &Path) -> Result<()> {
  let now = crate::now();
  let stem = current.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
  let archive_name = format!("{stem}_{}.pdf", now.format("%Y%m%d"));
  fs::create_dir_all(bin)?;
  let output = bin.join(&archive_name);
  ctx.pdf_tool.watermark(current, &output, &format!("ARCHIVED {}", now.format("%Y-%m-%d")))?;

  let source_name = current.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
  let row = Record::new()
    .with("archive_file_name", archive_name.as_str())
    .with("source_file_name", source_name)
    .with("archive_date", now);
  upsert(ctx, keys::TAXMAP_ARCHIVE, row).await?;
  info!(file = %current.display(), archive = %archive_name, "tax map archived");
  Ok(())
}

/// Mirror one repository.
pub async fn sync_repository<S: GisStore + Mailer>(ctx: &EtlContext<S>, repo: &RepositoryConfig) -> Result<SyncSummary> {
  let mut summary = SyncSummary::default();
  let wait = ctx.config.tools.pdf_wait();
  for entry in WalkDir::new(&repo.source).sort_by_file_name() {
    let entry = entry?;
    if !entry.file_type().is_file() {
      continue;
    }
    let source = entry.path();
    let Some(ext) = extension(source) else { continue };
    if !repo.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
      continue;
    }

    let destination = destination_for(repo, source)?;
    if let Some(parent) = destination.parent() {
      fs::create_dir_all(parent)?;
    }

    let changed = differs(source, &destination)?;
    if changed {
      if let Some(bin) = &repo.archive_bin
        && destination.exists()
      {
        archive(ctx, bin, &destination).await?;
        summary.archived += 1;
      }
      overwrite(source, &destination)?;
      if repo.archive_bin.is_some() {
        let file_name = destination.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let row = Record::new().with("file_name", file_name).with("release_date", crate::now());
        upsert(ctx, keys::TAXMAP_IMAGE_UPDATE, row).await?;
      }
      debug!(source = %source.display(), destination = %destination.display(), "copied");
      summary.copied += 1;
    } else {
      summary.unchanged += 1;
    }

    if repo.create_pdf_copies && IMAGE_EXTENSIONS.contains(&ext.as_str()) {
      let pdf = destination.with_extension("pdf");
      if changed || !pdf.exists() {
        if pdf.exists() {
          set_writable(&pdf)?;
          fs::remove_file(&pdf)?;
        }
        ctx.pdf_tool.image_to_pdf(&destination, &pdf)?;
        wait_for(&pdf, wait).await?;
        summary.pdfs_created += 1;
      }
    }
  }
  info!(repository = %repo.name, ?summary, "repository synced");
  Ok(summary)
}

/// Mirror every configured repository, each with its share attached.
pub async fn sync_repositories<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<Vec<(String, SyncSummary)>> {
  let mut out = Vec::new();
  for repo in &ctx.config.repositories {
    let summary = match &repo.share {
      Some(share) => with_share(&ctx.shares, share, async |_| sync_repository(ctx, repo).await).await?,
      None => sync_repository(ctx, repo).await?,
    };
    out.push((repo.name.clone(), summary));
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use rlid_core::store::ReadQuery;
  use tempfile::TempDir;

  use super::*;
  use crate::tests::{FakePdf, context};

  fn repo(dir: &TempDir, extensions: &[&str]) -> RepositoryConfig {
    RepositoryConfig {
      name:              "taxmaps".into(),
      source:            dir.path().join("src"),
      destination:       dir.path().join("dst"),
      extensions:        extensions.iter().map(|e| e.to_string()).collect(),
      flatten:           false,
      create_pdf_copies: false,
      archive_bin:       None,
      share:             None,
    }
  }

  fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
  }

  #[test]
  fn change_detection_compares_size_then_content() {
    let dir = TempDir::new().unwrap();
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    write(&a, "abc");
    assert!(differs(&a, &b).unwrap());
    write(&b, "abcd");
    assert!(differs(&a, &b).unwrap());
    write(&b, "abd");
    assert!(differs(&a, &b).unwrap());
    write(&b, "abc");
    assert!(!differs(&a, &b).unwrap());
  }

  #[test]
  fn flatten_drops_subdirectories() {
    let dir = TempDir::new().unwrap();
    let mut repo = repo(&dir, &["pdf"]);
    let file = repo.source.join("17").join("03").join("1703.pdf");
    assert_eq!(destination_for(&repo, &file).unwrap(), repo.destination.join("17/03/1703.pdf"));
    repo.flatten = true;
    assert_eq!(destination_for(&repo, &file).unwrap(), repo.destination.join("1703.pdf"));
  }

  fn set_readonly(path: &Path, readonly: bool) {
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_readonly(readonly);
    fs::set_permissions(path, permissions).unwrap();
  }

  #[test]
  fn read_only_source_leaves_a_writable_copy() {
    let dir = TempDir::new().unwrap();
    let (source, destination) = (dir.path().join("map.pdf"), dir.path().join("out").join("map.pdf"));
    write(&source, "v1");
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    set_readonly(&source, true);

    overwrite(&source, &destination).unwrap();
    assert!(!fs::metadata(&destination).unwrap().permissions().readonly());
    assert_eq!(
      fs::metadata(&destination).unwrap().modified().unwrap(),
      fs::metadata(&source).unwrap().modified().unwrap()
    );

    set_readonly(&source, false);
    write(&source, "v2");
    set_readonly(&source, true);
    overwrite(&source, &destination).unwrap();
    assert_eq!(fs::read_to_string(&destination).unwrap(), "v2");
    set_readonly(&source, false);
  }

  #[tokio::test]
  async fn mirror_copies_changed_files_only() {
    let dir = TempDir::new().unwrap();
    let repo = repo(&dir, &["pdf"]);
    write(&repo.source.join("a/one.pdf"), "one");
    write(&repo.source.join("two.PDF"), "two");
    write(&repo.source.join("notes.txt"), "skip me");

    let ctx = context(FakePdf::default()).await;
    let first = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(first, SyncSummary { copied: 2, ..SyncSummary::default() });
    assert!(repo.destination.join("a/one.pdf").exists());
    assert!(!repo.destination.join("notes.txt").exists());

    write(&repo.source.join("two.PDF"), "TWO");
    let second = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(second, SyncSummary { copied: 1, unchanged: 1, ..SyncSummary::default() });
    assert_eq!(fs::read_to_string(repo.destination.join("two.PDF")).unwrap(), "TWO");
  }

  #[tokio::test]
  async fn images_get_pdf_twins() {
    let dir = TempDir::new().unwrap();
    let mut repo = repo(&dir, &["tif"]);
    repo.create_pdf_copies = true;
    write(&repo.source.join("scan.tif"), "pixels");

    let ctx = context(FakePdf::default()).await;
    let summary = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(summary.pdfs_created, 1);
    assert!(repo.destination.join("scan.pdf").exists());

    let again = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(again, SyncSummary { unchanged: 1, ..SyncSummary::default() });
  }

  #[tokio::test]
  async fn replaced_tax_maps_are_archived() {
    let dir = TempDir::new().unwrap();
    let mut repo = repo(&dir, &["pdf"]);
    repo.archive_bin = Some(dir.path().join("bin"));
    write(&repo.source.join("1703.pdf"), "old map");

    let ctx = context(FakePdf::default()).await;
    let first = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(first.archived, 0);

    write(&repo.source.join("1703.pdf"), "new map!");
    let second = sync_repository(&ctx, &repo).await.unwrap();
    assert_eq!(second.archived, 1);

    let name = format!("1703_{}.pdf", crate::now().format("%Y%m%d"));
    let archived = fs::read_to_string(dir.path().join("bin").join(&name)).unwrap();
    assert!(archived.starts_with("old map"));
    assert!(archived.contains("ARCHIVED"));

    let archive_path = ctx.catalog.path(keys::TAXMAP_ARCHIVE, None).unwrap();
    let rows = ctx.store.read(&archive_path, &ReadQuery::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("archive_file_name"), Some(name.as_str()));
    assert_eq!(rows[0].text("source_file_name"), Some("1703.pdf"));

    let update_path = ctx.catalog.path(keys::TAXMAP_IMAGE_UPDATE, None).unwrap();
    let updates = ctx.store.read(&update_path, &ReadQuery::all()).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].text("file_name"), Some("1703.pdf"));
  }
}
