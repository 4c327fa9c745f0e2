//! Remote fetch client boundary.
//!
//! Everything that talks to the remote service goes through [`FetchClient`].
//! The cache store only ever sees pages and resolved profiles.

mod api_types;
mod http;
mod retry;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Page, PageToken, QueryKey, UserProfile};

pub use http::{HttpFetchClient, LOOKUP_BATCH_SIZE};
pub use retry::{RetryPolicy, Retrying};

/// Paginated access to the remote service.
#[async_trait]
pub trait FetchClient: Send + Sync {
  /// Fetch one page of a collection. `None` requests the first page.
  async fn fetch_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Page>;

  /// Look up accounts by screen name. Unknown or suspended accounts are
  /// left out of the result.
  async fn resolve_ids(&self, screen_names: &[String]) -> Result<Vec<UserProfile>>;
}
