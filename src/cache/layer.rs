//! Cache layer that orchestrates freshness checks with network fetching.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::traits::{CacheStorage, Fetched};
use crate::error::{Error, Result};
use crate::fetch::FetchClient;
use crate::model::{CacheEntry, MaxAge, PageToken, QueryKey};

type FetchKey = (QueryKey, Option<PageToken>);

/// A caller's claim on a per-key fetch lock.
///
/// Dropping it, including when the caller's future is cancelled, removes the
/// lock from the in-flight map once nobody else is using it.
struct FetchSlot<'a> {
  store: &'a CacheStore,
  key: FetchKey,
  lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FetchSlot<'_> {
  fn drop(&mut self) {
    let mut in_flight = self
      .store
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    // The map and this slot hold the only references: nobody is waiting.
    if Arc::strong_count(&self.lock) <= 2 {
      in_flight.remove(&self.key);
    }
  }
}

/// Cache store that sits between every read and the remote service.
///
/// Freshness is decided per call from the caller's `MaxAge`. Remote fetches
/// for the same `(key, page_token)` are serialized: a caller that finds a
/// fetch already running waits for it and reuses its result.
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  client: Arc<dyn FetchClient>,
  /// One lock per key with a fetch in progress or waiting
  in_flight: Mutex<HashMap<FetchKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
  /// Create a new cache store with the given storage backend and client.
  pub fn new(storage: Arc<dyn CacheStorage>, client: Arc<dyn FetchClient>) -> Self {
    Self {
      storage,
      client,
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Read a page, fetching it when it is missing or older than `max_age`.
  ///
  /// 1. Check storage - if fresh, return without a remote call
  /// 2. `MaxAge::Forever` with nothing stored fails with `CacheMiss`
  /// 3. Otherwise take the per-key fetch lock
  /// 4. If another caller stored the page while we waited, reuse it
  /// 5. Fetch, overwrite the entry, return it
  pub async fn get_or_fetch(
    &self,
    key: &QueryKey,
    page_token: Option<&PageToken>,
    max_age: MaxAge,
  ) -> Result<Fetched> {
    let requested_at = Utc::now();

    if let Some(entry) = self.storage.get_page(key, page_token)? {
      if max_age.is_fresh(entry.fetched_at, requested_at) {
        debug!(%key, token = ?page_token, "Cache hit");
        return Ok(Fetched::from_cache(entry));
      }
    } else if max_age == MaxAge::Forever {
      return Err(Error::CacheMiss);
    }

    let slot = self.fetch_slot(key, page_token);
    let _guard = slot.lock.lock().await;
    self.fetch_locked(key, page_token, max_age, requested_at).await
  }

  async fn fetch_locked(
    &self,
    key: &QueryKey,
    page_token: Option<&PageToken>,
    max_age: MaxAge,
    requested_at: DateTime<Utc>,
  ) -> Result<Fetched> {
    // Re-check now that we hold the lock; someone may have just fetched.
    if let Some(entry) = self.storage.get_page(key, page_token)? {
      if entry.fetched_at >= requested_at {
        debug!(%key, token = ?page_token, "Reusing page fetched by a concurrent caller");
        return Ok(Fetched::from_network(entry.page, entry.fetched_at));
      }
      if max_age.is_fresh(entry.fetched_at, Utc::now()) {
        return Ok(Fetched::from_cache(entry));
      }
    }

    debug!(%key, token = ?page_token, "Cache miss, fetching");
    let page = self.client.fetch_page(key, page_token).await?;
    let fetched_at = Utc::now();
    self.storage.store_page(key, page_token, &page, fetched_at)?;

    Ok(Fetched::from_network(page, fetched_at))
  }

  fn fetch_slot(&self, key: &QueryKey, page_token: Option<&PageToken>) -> FetchSlot<'_> {
    let fetch_key = (*key, page_token.cloned());
    let mut in_flight = self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let lock = Arc::clone(
      in_flight
        .entry(fetch_key.clone())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    );
    FetchSlot {
      store: self,
      key: fetch_key,
      lock,
    }
  }

  /// Read a cached page without ever calling the remote service.
  pub fn peek(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Option<CacheEntry>> {
    self.storage.get_page(key, page_token)
  }

  /// Drop every cached page for the key so the next read refetches.
  pub fn invalidate(&self, key: &QueryKey) -> Result<usize> {
    let removed = self.storage.invalidate(key)?;
    info!(%key, removed, "Invalidated cached pages");
    Ok(removed)
  }

  /// Delete pages fetched more than `older_than` ago.
  pub fn sweep_expired(&self, older_than: chrono::Duration) -> Result<usize> {
    let removed = self.storage.sweep(Utc::now() - older_than)?;
    info!(removed, "Swept expired cache pages");
    Ok(removed)
  }
}
