//! Screen name to user id resolution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::Result;
use crate::fetch::{FetchClient, LOOKUP_BATCH_SIZE};
use crate::model::UserId;

/// Lowercase and strip a leading `@`.
pub fn normalize_screen_name(name: &str) -> String {
  name.trim().trim_start_matches('@').to_lowercase()
}

/// Resolves screen names in batches and remembers hits for a short time.
///
/// Only successful lookups are remembered; unknown names are asked again on
/// the next call.
pub struct IdResolver {
  client: Arc<dyn FetchClient>,
  resolved: Cache<String, UserId>,
}

impl IdResolver {
  pub fn new(client: Arc<dyn FetchClient>, ttl: Duration) -> Self {
    Self {
      client,
      resolved: Cache::builder().time_to_live(ttl).build(),
    }
  }

  /// Map each resolvable name to its id.
  ///
  /// Keys are normalized names. Names missing from the result are unknown
  /// or suspended accounts.
  pub async fn resolve_ids(&self, screen_names: &[String]) -> Result<HashMap<String, UserId>> {
    let wanted: BTreeSet<String> = screen_names
      .iter()
      .map(|name| normalize_screen_name(name))
      .filter(|name| !name.is_empty())
      .collect();

    let mut result = HashMap::with_capacity(wanted.len());
    let mut missing = Vec::new();
    for name in wanted {
      match self.resolved.get(&name).await {
        Some(id) => {
          result.insert(name, id);
        }
        None => missing.push(name),
      }
    }

    debug!(cached = result.len(), lookup = missing.len(), "Resolving screen names");

    for chunk in missing.chunks(LOOKUP_BATCH_SIZE) {
      for profile in self.client.resolve_ids(chunk).await? {
        let name = normalize_screen_name(&profile.screen_name);
        self.resolved.insert(name.clone(), profile.id).await;
        result.insert(name, profile.id);
      }
    }

    Ok(result)
  }

  /// Resolve a single name.
  pub async fn resolve_id(&self, screen_name: &str) -> Result<Option<UserId>> {
    let name = normalize_screen_name(screen_name);
    let mut ids = self.resolve_ids(std::slice::from_ref(&name)).await?;
    Ok(ids.remove(&name))
  }
}
