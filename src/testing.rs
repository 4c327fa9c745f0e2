//! Scripted fetch client for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fetch::FetchClient;
use crate::model::{Page, PageToken, QueryKey, Record, UserProfile};

type Failure = Box<dyn FnOnce() -> Error + Send>;

/// Serves fixture pages and records every request.
///
/// Page `n` of a collection is requested with token `page-n`; the first page
/// has no token.
#[derive(Default)]
pub struct MockFetchClient {
  pages: Mutex<HashMap<QueryKey, Vec<Vec<Record>>>>,
  failures: Mutex<HashMap<(QueryKey, usize), VecDeque<Failure>>>,
  profiles: Mutex<HashMap<String, UserProfile>>,
  requests: Mutex<Vec<(QueryKey, usize)>>,
  lookups: Mutex<Vec<Vec<String>>>,
  delay: Mutex<Option<Duration>>,
  calls: AtomicUsize,
}

pub fn token_for(index: usize) -> Option<PageToken> {
  (index > 0).then(|| PageToken::new(format!("page-{}", index)))
}

fn index_of(token: Option<&PageToken>) -> usize {
  token
    .and_then(|t| t.as_str().strip_prefix("page-"))
    .and_then(|n| n.parse().ok())
    .unwrap_or(0)
}

impl MockFetchClient {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the fixture pages for a collection.
  pub fn add_pages(&self, key: QueryKey, pages: Vec<Vec<Record>>) {
    self.pages.lock().unwrap().insert(key, pages);
  }

  /// Make the next request for page `index` fail with `error()`.
  pub fn fail_next(&self, key: QueryKey, index: usize, error: impl FnOnce() -> Error + Send + 'static) {
    self
      .failures
      .lock()
      .unwrap()
      .entry((key, index))
      .or_default()
      .push_back(Box::new(error));
  }

  pub fn add_profile(&self, screen_name: &str, id: u64) {
    self.profiles.lock().unwrap().insert(
      screen_name.to_lowercase(),
      UserProfile {
        id: id.into(),
        screen_name: screen_name.to_string(),
      },
    );
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Total remote calls, page fetches and lookups together.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Page indexes requested for a collection, in request order.
  pub fn requested_pages(&self, key: &QueryKey) -> Vec<usize> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|(k, _)| k == key)
      .map(|(_, index)| *index)
      .collect()
  }

  pub fn lookups(&self) -> Vec<Vec<String>> {
    self.lookups.lock().unwrap().clone()
  }
}

#[async_trait]
impl FetchClient for MockFetchClient {
  async fn fetch_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Page> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let index = index_of(page_token);
    self.requests.lock().unwrap().push((*key, index));

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let failure = self
      .failures
      .lock()
      .unwrap()
      .get_mut(&(*key, index))
      .and_then(|queue| queue.pop_front());
    if let Some(failure) = failure {
      return Err(failure());
    }

    let pages = self.pages.lock().unwrap().get(key).cloned().unwrap_or_default();
    let records = pages.get(index).cloned().unwrap_or_default();
    Ok(if index + 1 < pages.len() {
      Page::with_next(records, token_for(index + 1).unwrap_or_else(|| PageToken::new("")))
    } else {
      Page::last(records)
    })
  }

  async fn resolve_ids(&self, screen_names: &[String]) -> Result<Vec<UserProfile>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.lookups.lock().unwrap().push(screen_names.to_vec());

    let profiles = self.profiles.lock().unwrap();
    Ok(
      screen_names
        .iter()
        .filter_map(|name| profiles.get(&name.to_lowercase()).cloned())
        .collect(),
    )
  }
}
