//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{CacheEntry, Page, PageToken, QueryKey};

/// Trait for cache storage backends.
///
/// Implementations keep at most one entry per `(key, page_token)` and treat
/// entries they cannot read back as absent.
pub trait CacheStorage: Send + Sync {
  /// Get the cached page for a key, if any.
  fn get_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Option<CacheEntry>>;

  /// Store or overwrite a page.
  fn store_page(
    &self,
    key: &QueryKey,
    page_token: Option<&PageToken>,
    page: &Page,
    fetched_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Remove every page stored under the key prefix. Returns the page count.
  fn invalidate(&self, key: &QueryKey) -> Result<usize>;

  /// Remove pages fetched before `cutoff`. Returns the page count.
  fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Result of a cache lookup, including where the page came from.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub page: Page,
  pub fetched_at: DateTime<Utc>,
  /// Served from cache without a remote call
  pub is_fresh: bool,
}

impl Fetched {
  pub(crate) fn from_cache(entry: CacheEntry) -> Self {
    Self {
      page: entry.page,
      fetched_at: entry.fetched_at,
      is_fresh: true,
    }
  }

  pub(crate) fn from_network(page: Page, fetched_at: DateTime<Utc>) -> Self {
    Self {
      page,
      fetched_at,
      is_fresh: false,
    }
  }
}
