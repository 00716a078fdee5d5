//! Named paths and remote-share sessions.
//!
//! A share is attached with its credentials when the first scope acquires
//! it and detached when the last scope releases it, so nested scopes on the
//! same share are cheap and distinct shares may be held at once.

use std::{cell::RefCell, collections::BTreeMap, process::Command};

use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  config::{ShareCommands, ShareConfig},
};

// ─── Named paths ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
  paths: BTreeMap<String, String>,
}

impl PathRegistry {
  pub fn new(paths: BTreeMap<String, String>) -> Self { Self { paths } }

  pub fn get(&self, name: &str) -> Result<&str> {
    self.paths.get(name).map(String::as_str).ok_or_else(|| Error::config(format!("no path named {name:?}")))
  }
}

// ─── Connectors ──────────────────────────────────────────────────────────────

/// Attaches and detaches remote shares.
pub trait ShareConnector {
  fn connect(&self, share: &ShareConfig) -> Result<()>;

  /// Detach `share`. Fails with [`Error::AlreadyReleased`] when the share
  /// was not attached.
  fn disconnect(&self, share: &ShareConfig) -> Result<()>;
}

/// Runs the configured connect/disconnect command lines.
#[derive(Debug, Clone)]
pub struct CommandShareConnector {
  commands: ShareCommands,
}

impl CommandShareConnector {
  pub fn new(commands: ShareCommands) -> Self { Self { commands } }

  fn run(&self, template: &[String], share: &ShareConfig) -> Result<std::process::Output> {
    let args: Vec<String> = template
      .iter()
      .map(|a| {
        a.replace("{path}", &share.path)
          .replace("{username}", share.username.as_deref().unwrap_or_default())
          .replace("{password}", share.password.as_deref().unwrap_or_default())
      })
      .collect();
    let (program, rest) = args.split_first().ok_or_else(|| Error::config("empty share command"))?;
    Ok(Command::new(program).args(rest).output()?)
  }
}

impl ShareConnector for CommandShareConnector {
  fn connect(&self, share: &ShareConfig) -> Result<()> {
    let out = self.run(&self.commands.connect, share)?;
    if !out.status.success() {
      return Err(Error::Share {
        share:   share.path.clone(),
        message: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
      });
    }
    Ok(())
  }

  fn disconnect(&self, share: &ShareConfig) -> Result<()> {
    let out = self.run(&self.commands.disconnect, share)?;
    if out.status.success() {
      return Ok(());
    }
    let message = String::from_utf8_lossy(&out.stderr).trim().to_owned();
    if message.to_lowercase().contains("could not be found") {
      Err(Error::AlreadyReleased(share.path.clone()))
    } else {
      Err(Error::Share { share: share.path.clone(), message })
    }
  }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// Reference-counted share attachments.
pub struct ShareSessions {
  connector: Box<dyn ShareConnector>,
  shares:    BTreeMap<String, ShareConfig>,
  held:      RefCell<BTreeMap<String, usize>>,
}

impl ShareSessions {
  pub fn new(connector: Box<dyn ShareConnector>, shares: BTreeMap<String, ShareConfig>) -> Self {
    Self { connector, shares, held: RefCell::new(BTreeMap::new()) }
  }

  pub fn share(&self, name: &str) -> Result<&ShareConfig> {
    self.shares.get(name).ok_or_else(|| Error::config(format!("no share named {name:?}")))
  }

  /// Number of scopes currently holding `name`.
  pub fn holders(&self, name: &str) -> usize { self.held.borrow().get(name).copied().unwrap_or(0) }

  pub fn acquire(&self, name: &str) -> Result<&ShareConfig> {
    let share = self.share(name)?;
    if self.holders(name) == 0 {
      self.connector.connect(share)?;
      info!(share = name, path = %share.path, "share connected");
    }
    *self.held.borrow_mut().entry(name.to_owned()).or_default() += 1;
    Ok(share)
  }

  pub fn release(&self, name: &str) -> Result<()> {
    let share = self.share(name)?;
    let remaining = {
      let mut held = self.held.borrow_mut();
      let Some(count) = held.get_mut(name) else { return Ok(()) };
      *count -= 1;
      let remaining = *count;
      if remaining == 0 {
        held.remove(name);
      }
      remaining
    };
    if remaining > 0 {
      return Ok(());
    }
    match self.connector.disconnect(share) {
      Err(Error::AlreadyReleased(_)) => {
        debug!(share = name, "share was already released");
        Ok(())
      }
      Err(e) => Err(e),
      Ok(()) => {
        info!(share = name, "share released");
        Ok(())
      }
    }
  }
}

/// Run `body` with `name` attached. The share is released afterwards,
/// whether the body succeeded or not.
pub async fn with_share<T>(
  sessions: &ShareSessions,
  name: &str,
  body: impl AsyncFnOnce(&ShareConfig) -> Result<T>,
) -> Result<T> {
  let share = sessions.acquire(name)?;
  let out = body(share).await;
  match (out, sessions.release(name)) {
    (Ok(value), Ok(())) => Ok(value),
    (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
    (Err(e), Err(release_error)) => {
      warn!(share = name, error = %release_error, "release failed after an earlier error");
      Err(e)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use super::*;

  /// Records calls; disconnecting an unattached share reports it as already
  /// released.
  #[derive(Default)]
  pub struct FakeConnector {
    pub calls:    Rc<RefCell<Vec<String>>>,
    pub attached: RefCell<Vec<String>>,
  }

  impl ShareConnector for FakeConnector {
    fn connect(&self, share: &ShareConfig) -> Result<()> {
      self.calls.borrow_mut().push(format!("connect {}", share.path));
      self.attached.borrow_mut().push(share.path.clone());
      Ok(())
    }

    fn disconnect(&self, share: &ShareConfig) -> Result<()> {
      self.calls.borrow_mut().push(format!("disconnect {}", share.path));
      let mut attached = self.attached.borrow_mut();
      match attached.iter().position(|p| *p == share.path) {
        Some(i) => {
          attached.remove(i);
          Ok(())
        }
        None => Err(Error::AlreadyReleased(share.path.clone())),
      }
    }
  }

  fn sessions(calls: Rc<RefCell<Vec<String>>>) -> ShareSessions {
    let connector = FakeConnector { calls, ..FakeConnector::default() };
    let shares = [("a", "//srv/a"), ("b", "//srv/b")]
      .into_iter()
      .map(|(n, p)| (n.to_owned(), ShareConfig { path: p.to_owned(), ..ShareConfig::default() }))
      .collect();
    ShareSessions::new(Box::new(connector), shares)
  }

  #[tokio::test]
  async fn nested_scopes_connect_once() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sessions = sessions(calls.clone());
    with_share(&sessions, "a", async |_| {
      with_share(&sessions, "a", async |_| Ok(())).await?;
      with_share(&sessions, "b", async |_| Ok(())).await?;
      assert_eq!(sessions.holders("a"), 1);
      Ok(())
    })
    .await
    .unwrap();
    assert_eq!(*calls.borrow(), ["connect //srv/a", "connect //srv/b", "disconnect //srv/b", "disconnect //srv/a"]);
    assert_eq!(sessions.holders("a"), 0);
  }

  #[tokio::test]
  async fn release_runs_on_failure_and_already_released_is_ignored() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sessions = sessions(calls.clone());
    let out: Result<()> = with_share(&sessions, "a", async |share| {
      // Something else detached the share underneath us.
      sessions.connector.disconnect(share)?;
      Err(Error::config("boom"))
    })
    .await;
    assert!(matches!(out, Err(Error::Core(rlid_core::Error::Config(_)))));
    assert_eq!(sessions.holders("a"), 0);
    assert_eq!(calls.borrow().len(), 3);
  }

  #[test]
  fn unknown_names_are_config_errors() {
    let sessions = sessions(Rc::default());
    assert!(sessions.acquire("nope").is_err());
    assert!(PathRegistry::default().get("nope").is_err());
  }
}
