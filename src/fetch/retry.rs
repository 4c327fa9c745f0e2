use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::warn;

use super::FetchClient;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::model::{Page, PageToken, QueryKey, UserProfile};

/// How many times, and how patiently, to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first
  pub max_attempts: u32,
  /// First backoff for unavailable errors, doubled per attempt
  pub base_delay: Duration,
  /// Upper bound for any single wait
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(15 * 60),
    }
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay: Duration::from_millis(config.base_delay_ms),
      max_delay: Duration::from_secs(config.max_delay_secs),
    }
  }
}

impl RetryPolicy {
  /// Waits between attempts: `base_delay` doubled each time, capped at
  /// `max_delay`, one fewer than `max_attempts`.
  pub fn delays(&self) -> impl Iterator<Item = Duration> {
    let factor = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
    ExponentialBackoff::from_millis(2)
      .factor(factor)
      .max_delay(self.max_delay)
      .take(self.max_attempts.saturating_sub(1) as usize)
  }
}

/// Wraps a client and retries rate limits and unavailability.
///
/// Errors are surfaced only once the attempt budget is spent. A rate-limited
/// attempt also waits out the server's `Retry-After` (capped at `max_delay`)
/// before the next one.
pub struct Retrying<C> {
  inner: C,
  policy: RetryPolicy,
}

impl<C: FetchClient> Retrying<C> {
  pub fn new(inner: C, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }

  pub fn inner(&self) -> &C {
    &self.inner
  }

  async fn with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let policy = self.policy;
    let mut attempt = 0u32;
    let action = || {
      attempt += 1;
      let current = attempt;
      let call = op();
      async move {
        match call.await {
          Err(Error::RateLimited { retry_after }) if current < policy.max_attempts => {
            let wait = retry_after.min(policy.max_delay);
            warn!(what, attempt = current, ?wait, "Rate limited, waiting before retry");
            tokio::time::sleep(wait).await;
            Err(Error::RateLimited { retry_after })
          }
          Err(e) => {
            if e.is_retryable() && current < policy.max_attempts {
              warn!(what, attempt = current, error = %e, "Retrying");
            }
            Err(e)
          }
          ok => ok,
        }
      }
    };
    RetryIf::spawn(policy.delays(), action, |e: &Error| e.is_retryable()).await
  }
}

#[async_trait]
impl<C: FetchClient> FetchClient for Retrying<C> {
  async fn fetch_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Page> {
    self
      .with_retry("page fetch", || self.inner.fetch_page(key, page_token))
      .await
  }

  async fn resolve_ids(&self, screen_names: &[String]) -> Result<Vec<UserProfile>> {
    self
      .with_retry("id lookup", || self.inner.resolve_ids(screen_names))
      .await
  }
}
