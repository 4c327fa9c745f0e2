//! Startup wiring: one configuration, one database, one cache store.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use tracing::{info, warn};

use crate::annotation::AnnotationStore;
use crate::cache::{CacheStore, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::fetch::{FetchClient, HttpFetchClient, RetryPolicy, Retrying};
use crate::model::{MaxAge, QueryKey, Record, UserId};
use crate::pagination::Pages;
use crate::resolve::IdResolver;
use crate::user::{QueryDefaults, User};
use crate::watchlist::{Watchlist, WatchlistStore};

/// Everything a query needs, built once from the configuration.
pub struct Session {
  store: Arc<CacheStore>,
  resolver: IdResolver,
  watchlists: WatchlistStore,
  annotations: Arc<AnnotationStore>,
  defaults: QueryDefaults,
}

impl Session {
  /// Open the cache database and build an authenticated HTTP client.
  pub fn open(config: &Config) -> Result<Self> {
    let db = match &config.cache_path {
      Some(path) => Database::open_at(path)?,
      None => Database::open()?,
    };
    let client = Retrying::new(HttpFetchClient::new(config)?, RetryPolicy::from(&config.retry));
    let session = Self::with_client(config, Arc::new(db), Arc::new(client));
    info!(base_url = %config.api.base_url, "Session ready");
    Ok(session)
  }

  /// Build a session over an existing database and fetch client.
  pub fn with_client(config: &Config, db: Arc<Database>, client: Arc<dyn FetchClient>) -> Self {
    let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    Self {
      store: Arc::new(CacheStore::new(storage, Arc::clone(&client))),
      resolver: IdResolver::new(client, config.resolve_ttl()),
      watchlists: WatchlistStore::new(Arc::clone(&db)),
      annotations: Arc::new(AnnotationStore::new(db)),
      defaults: QueryDefaults::from(config),
    }
  }

  pub fn user(&self, id: UserId) -> User {
    User::new(
      id,
      Arc::clone(&self.store),
      Arc::clone(&self.annotations),
      self.defaults,
    )
  }

  /// Resolve a screen name and return a handle for it, or `None` if the
  /// account is unknown or suspended.
  pub async fn user_by_name(&self, screen_name: &str) -> crate::Result<Option<User>> {
    let id = self.resolver.resolve_id(screen_name).await?;
    Ok(id.map(|id| self.user(id).with_screen_name(screen_name.trim_start_matches('@'))))
  }

  pub async fn resolve_ids(&self, screen_names: &[String]) -> crate::Result<HashMap<String, UserId>> {
    self.resolver.resolve_ids(screen_names).await
  }

  pub fn watchlists(&self) -> &WatchlistStore {
    &self.watchlists
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  pub fn annotations(&self) -> &Arc<AnnotationStore> {
    &self.annotations
  }

  async fn list_members(&self, list_id: u64, max_age: MaxAge) -> crate::Result<Vec<UserId>> {
    let records = Pages::new(Arc::clone(&self.store), QueryKey::list_members(list_id), max_age, None)
      .collect()
      .await?;
    Ok(records.iter().filter_map(Record::target_id).collect())
  }

  /// Import the members of remote list `list_id` into `watchlist` as a
  /// sublist. Returns the number of members. The caller saves the watchlist.
  pub async fn import_list(&self, watchlist: &mut Watchlist, list_id: u64, name: &str) -> crate::Result<usize> {
    let members = self.list_members(list_id, self.defaults.max_age).await?;
    let count = members.len();
    watchlist.import_sublist(list_id, name, members);
    info!(watchlist = %watchlist.name, list_id, members = count, "Imported list");
    Ok(count)
  }

  /// Re-fetch a sublist's members, keeping its local exclusions. Returns
  /// false if the watchlist has no such sublist.
  pub async fn refresh_sublist(&self, watchlist: &mut Watchlist, list_id: u64) -> crate::Result<bool> {
    let name = match watchlist.sublist(list_id) {
      Some(sublist) => sublist.name.clone(),
      None => return Ok(false),
    };
    let members = self.list_members(list_id, MaxAge::zero()).await?;
    watchlist.import_sublist(list_id, &name, members);
    Ok(true)
  }

  /// Refresh every sublist of `watchlist`.
  ///
  /// Stops at the first failure; sublists refreshed before it keep their
  /// new members.
  pub async fn refresh_sublists(&self, watchlist: &mut Watchlist) -> crate::Result<()> {
    let list_ids: Vec<u64> = watchlist.sublists.keys().copied().collect();
    for list_id in list_ids {
      if let Err(e) = self.refresh_sublist(watchlist, list_id).await {
        warn!(watchlist = %watchlist.name, list_id, error = %e, "Sublist refresh failed");
        return Err(e);
      }
    }
    Ok(())
  }

  /// Delete cached pages older than the configured expiry.
  pub fn sweep_expired(&self) -> crate::Result<usize> {
    match self.defaults.max_age {
      crate::model::MaxAge::Within(expiry) => self.store.sweep_expired(expiry),
      crate::model::MaxAge::Forever => Ok(0),
    }
  }
}
