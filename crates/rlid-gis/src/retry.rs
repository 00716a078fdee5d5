//! Bounded exponential-backoff retry for transient store failures.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total tries, including the first.
  pub attempts:     u32,
  pub initial_wait: Duration,
  pub max_wait:     Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { attempts: 4, initial_wait: Duration::from_secs(4), max_wait: Duration::from_secs(32) }
  }
}

impl RetryPolicy {
  /// Wait before retry number `retry` (1-based).
  pub fn wait(&self, retry: u32) -> Duration {
    let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
    self.initial_wait.saturating_mul(factor).min(self.max_wait)
  }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out of
/// attempts. Only [`rlid_core::Error::is_transient`] errors are retried.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 1;
  loop {
    match op().await {
      Err(e) if e.is_transient() && attempt < policy.attempts.max(1) => {
        let wait = policy.wait(attempt);
        warn!(what, attempt, ?wait, error = %e, "transient failure, retrying");
        tokio::time::sleep(wait).await;
        attempt += 1;
      }
      other => return other,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use rlid_core::Error;

  use super::*;

  fn quick(attempts: u32) -> RetryPolicy {
    RetryPolicy { attempts, initial_wait: Duration::from_millis(1), max_wait: Duration::from_millis(2) }
  }

  #[test]
  fn wait_doubles_up_to_the_cap() {
    let p = RetryPolicy::default();
    assert_eq!(p.wait(1), Duration::from_secs(4));
    assert_eq!(p.wait(3), Duration::from_secs(16));
    assert_eq!(p.wait(9), Duration::from_secs(32));
  }

  #[tokio::test]
  async fn transient_errors_are_retried_until_success() {
    let calls = Cell::new(0);
    let out = with_retry(&quick(4), "flaky", || {
      calls.set(calls.get() + 1);
      let n = calls.get();
      async move { if n < 3 { Err(Error::GisTransient("busy".into())) } else { Ok(n) } }
    })
    .await;
    assert_eq!(out.unwrap(), 3);
  }

  #[tokio::test]
  async fn attempts_are_bounded() {
    let calls = Cell::new(0);
    let out: Result<()> = with_retry(&quick(4), "down", || {
      calls.set(calls.get() + 1);
      async { Err(Error::GisTransient("busy".into())) }
    })
    .await;
    assert!(out.is_err());
    assert_eq!(calls.get(), 4);
  }

  #[tokio::test]
  async fn permanent_errors_fail_fast() {
    let calls = Cell::new(0);
    let out: Result<()> = with_retry(&quick(4), "schema", || {
      calls.set(calls.get() + 1);
      async { Err(Error::Gis("constraint".into())) }
    })
    .await;
    assert!(out.is_err());
    assert_eq!(calls.get(), 1);
  }
}
