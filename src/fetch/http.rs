use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::eyre::eyre;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::api_types::{
  ids_page, list_members_page, list_memberships_page, timeline_page, ApiIdsResponse,
  ApiListsResponse, ApiTweet, ApiUser, ApiUsersResponse,
};
use super::FetchClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Page, PageToken, QueryKey, QueryKind, UserId, UserProfile};

/// Most names `users/lookup` accepts per request.
pub const LOOKUP_BATCH_SIZE: usize = 100;

/// Wait assumed when a 429 carries no usable hint (one rate-limit window).
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// REST client for the v1.1-style API.
#[derive(Clone)]
pub struct HttpFetchClient {
  client: reqwest::Client,
  base_url: Url,
  page_size: u32,
}

impl HttpFetchClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let token = config.credentials.token()?;

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| eyre!("Invalid bearer token: {}", e))?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, auth);

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // A base without a trailing slash would drop its last segment on join.
    let mut base = config.api.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", config.api.base_url, e))?;

    Ok(Self {
      client,
      base_url,
      page_size: config.api.page_size,
    })
  }

  async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let mut url = self.base_url.join(path)?;
    url
      .query_pairs_mut()
      .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

    debug!(%url, "GET");

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(classify_send_error)?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      return Err(Error::RateLimited {
        retry_after: retry_after(response.headers(), Utc::now()),
      });
    }
    if status.is_server_error() {
      return Err(Error::RemoteUnavailable(format!("HTTP {}", status)));
    }
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(Error::Remote {
        status: status.as_u16(),
        message,
      });
    }

    Ok(response.json::<T>().await?)
  }

  async fn fetch_posts(&self, path: &str, key: &QueryKey, max_id: Option<&PageToken>) -> Result<Page> {
    let mut query = vec![
      ("user_id", key.entity_id.to_string()),
      ("count", self.page_size.to_string()),
      ("tweet_mode", "extended".to_string()),
    ];
    if let Some(max_id) = max_id {
      query.push(("max_id", max_id.as_str().to_string()));
    }

    let tweets: Vec<ApiTweet> = self.get(path, &query).await?;
    Ok(timeline_page(tweets))
  }

  async fn fetch_ids(&self, path: &str, key: &QueryKey, cursor: Option<&PageToken>) -> Result<Page> {
    let query = cursor_query("user_id", key, cursor);
    let response: ApiIdsResponse = self.get(path, &query).await?;
    Ok(ids_page(UserId(key.entity_id), response))
  }
}

/// Query for `cursor`-paged endpoints; -1 asks for the first page.
fn cursor_query(id_param: &'static str, key: &QueryKey, cursor: Option<&PageToken>) -> Vec<(&'static str, String)> {
  vec![
    (id_param, key.entity_id.to_string()),
    (
      "cursor",
      cursor.map(|c| c.as_str().to_string()).unwrap_or_else(|| "-1".to_string()),
    ),
  ]
}

#[async_trait]
impl FetchClient for HttpFetchClient {
  async fn fetch_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Page> {
    match key.kind {
      QueryKind::Timeline => self.fetch_posts("statuses/user_timeline.json", key, page_token).await,
      QueryKind::Favorites => self.fetch_posts("favorites/list.json", key, page_token).await,
      QueryKind::Friends => self.fetch_ids("friends/ids.json", key, page_token).await,
      QueryKind::Followers => self.fetch_ids("followers/ids.json", key, page_token).await,
      QueryKind::ListMemberships => {
        let query = cursor_query("user_id", key, page_token);
        let response: ApiListsResponse = self.get("lists/memberships.json", &query).await?;
        Ok(list_memberships_page(UserId(key.entity_id), response))
      }
      QueryKind::ListMembers => {
        let query = cursor_query("list_id", key, page_token);
        let response: ApiUsersResponse = self.get("lists/members.json", &query).await?;
        Ok(list_members_page(response))
      }
    }
  }

  async fn resolve_ids(&self, screen_names: &[String]) -> Result<Vec<UserProfile>> {
    let mut profiles = Vec::with_capacity(screen_names.len());

    for chunk in screen_names.chunks(LOOKUP_BATCH_SIZE) {
      let query = [("screen_name", chunk.join(","))];
      // Lookups where no name resolves come back as 404.
      match self.get::<Vec<ApiUser>>("users/lookup.json", &query).await {
        Ok(users) => profiles.extend(users.into_iter().map(UserProfile::from)),
        Err(Error::Remote { status: 404, .. }) => {}
        Err(e) => return Err(e),
      }
    }

    Ok(profiles)
  }
}

fn classify_send_error(e: reqwest::Error) -> Error {
  if e.is_connect() || e.is_timeout() {
    Error::RemoteUnavailable(e.to_string())
  } else {
    Error::Http(e)
  }
}

/// Work out how long a 429 asks us to wait.
///
/// Prefers `Retry-After` (seconds), then the `x-rate-limit-reset` epoch.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
  let header_num = |name: &str| -> Option<i64> {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse().ok())
  };

  if let Some(secs) = header_num("retry-after") {
    return Duration::from_secs(secs.max(0) as u64);
  }

  if let Some(reset) = header_num("x-rate-limit-reset") {
    let wait = reset - now.timestamp();
    return Duration::from_secs(wait.max(0) as u64);
  }

  DEFAULT_RATE_LIMIT_WAIT
}
