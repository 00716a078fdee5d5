//! Scoped temporary artifacts: views, copies and edit sessions.
//!
//! Each scope runs an async body and releases its artifact afterwards,
//! whether the body succeeded or not. A failed release is logged; it only
//! becomes the scope's error when the body itself succeeded.

use tracing::{debug, warn};
use uuid::Uuid;

use rlid_core::store::GisStore;

use crate::{Result, cursor::copy_dataset};

/// Prefix of every scratch path this crate mints.
pub const SCRATCH_PREFIX: &str = "scratch";

/// A fresh, unused scratch path: `scratch/<label>_<uuid>`.
pub fn unique_path(label: &str) -> String {
  format!("{SCRATCH_PREFIX}/{label}_{}", Uuid::new_v4().simple())
}

fn settle<T>(what: &str, body: Result<T>, release: Result<()>) -> Result<T> {
  match (body, release) {
    (Ok(value), Ok(())) => Ok(value),
    (Ok(_), Err(e)) => Err(e),
    (Err(e), Ok(())) => Err(e),
    (Err(e), Err(release_error)) => {
      warn!(what, error = %release_error, "release failed after an earlier error");
      Err(e)
    }
  }
}

/// Run `body` with a read-only view of `source` filtered by `where_` (and
/// restricted to `fields`). The view is dropped afterwards.
pub async fn with_view<S, T>(
  store: &S,
  source: &str,
  where_: Option<&str>,
  fields: Option<&[String]>,
  body: impl AsyncFnOnce(&str) -> Result<T>,
) -> Result<T>
where
  S: GisStore,
{
  let view = unique_path("view");
  store.create_view(&view, source, where_, fields).await?;
  debug!(view = %view, source, "view opened");
  let out = body(&view).await;
  let release = store.delete_dataset(&view).await;
  settle("view", out, release)
}

/// Run `body` with an independent copy of `source` (rows matching
/// `where_`). The copy is deleted afterwards.
pub async fn with_temp_copy<S, T>(
  store: &S,
  source: &str,
  where_: Option<&str>,
  body: impl AsyncFnOnce(&str) -> Result<T>,
) -> Result<T>
where
  S: GisStore,
{
  let copy = unique_path("copy");
  if let Err(e) = copy_dataset(store, source, &copy, where_).await {
    let release = store.delete_dataset(&copy).await;
    return settle("copy", Err(e), release);
  }
  let out = body(&copy).await;
  let release = store.delete_dataset(&copy).await;
  settle("copy", out, release)
}

/// Run `body` inside an edit session on `workspace`: committed when the
/// body succeeds, aborted when it fails.
pub async fn with_edit_session<S, T>(
  store: &S,
  workspace: &str,
  body: impl AsyncFnOnce() -> Result<T>,
) -> Result<T>
where
  S: GisStore,
{
  store.begin_edit(workspace).await?;
  let out = body().await;
  let release = if out.is_ok() {
    store.commit_edit(workspace).await
  } else {
    store.abort_edit(workspace).await
  };
  settle("edit session", out, release)
}
