//! Lazy, restartable iteration over paginated collections.
//!
//! A [`Pages`] walks a collection one page at a time through the cache store.
//! Each page checks its own freshness, so a walk may mix cached and freshly
//! fetched pages. Suspension happens only at page boundaries, and dropping a
//! `Pages` (or its stream) stops the walk with no further fetches.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::model::{Cursor, MaxAge, QueryKey, Record};

pub struct Pages {
  store: Arc<CacheStore>,
  key: QueryKey,
  max_age: MaxAge,
  limit: Option<usize>,
  cursor: Cursor,
  yielded: usize,
  failed: bool,
}

impl Pages {
  /// Start at the first page of `key`.
  pub fn new(store: Arc<CacheStore>, key: QueryKey, max_age: MaxAge, limit: Option<usize>) -> Self {
    let cursor = Cursor::start(key.kind);
    Self::resume(store, key, cursor, max_age, limit)
  }

  /// Continue from a cursor returned by an earlier failure or checkpoint.
  ///
  /// `limit` counts records produced by this walk only.
  pub fn resume(
    store: Arc<CacheStore>,
    key: QueryKey,
    cursor: Cursor,
    max_age: MaxAge,
    limit: Option<usize>,
  ) -> Self {
    debug_assert_eq!(cursor.kind, key.kind);
    Self {
      store,
      key,
      max_age,
      limit,
      cursor,
      yielded: 0,
      failed: false,
    }
  }

  /// Position of the next page to be requested.
  pub fn cursor(&self) -> &Cursor {
    &self.cursor
  }

  pub fn is_done(&self) -> bool {
    self.failed || self.cursor.exhausted || self.remaining() == Some(0)
  }

  fn remaining(&self) -> Option<usize> {
    self.limit.map(|limit| limit.saturating_sub(self.yielded))
  }

  /// Fetch the next page's records, or `None` once the walk is over.
  ///
  /// On failure the cursor is left pointing at the failed page and the
  /// returned `Error::Fetch` carries a copy of it. No further pages are
  /// produced after an error.
  pub async fn next_page(&mut self) -> Option<Result<Vec<Record>>> {
    if self.is_done() {
      return None;
    }

    let token = self.cursor.next_page_token.clone();
    match self.store.get_or_fetch(&self.key, token.as_ref(), self.max_age).await {
      Ok(fetched) => {
        let page = fetched.page;
        let skip = self.cursor.offset.min(page.records.len());
        let available = page.records.len() - skip;
        let take = self.remaining().map_or(available, |r| r.min(available));

        if take < available {
          // Stopped inside this page: stay on it so a resume picks up the rest.
          self.cursor.offset = skip + take;
        } else {
          self.cursor.advance(&page);
        }

        let records: Vec<Record> = page.records.into_iter().skip(skip).take(take).collect();
        self.yielded += records.len();

        debug!(
          key = %self.key,
          token = ?token,
          count = records.len(),
          cached = fetched.is_fresh,
          "Page ready"
        );
        Some(Ok(records))
      }
      Err(source) => {
        self.failed = true;
        Some(Err(Error::fetch(self.cursor.clone(), Vec::new(), source)))
      }
    }
  }

  /// Drain every remaining page into one ordered list.
  ///
  /// If a page fails, the error carries all records gathered before it.
  pub async fn collect(mut self) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    while let Some(page) = self.next_page().await {
      match page {
        Ok(page) => records.extend(page),
        Err(Error::Fetch(mut failure)) => {
          failure.partial = records;
          return Err(Error::Fetch(failure));
        }
        Err(e) => return Err(e),
      }
    }
    Ok(records)
  }

  /// Record-at-a-time view of the walk.
  ///
  /// Records of pages that succeeded are yielded before the error of the
  /// first page that failed; the stream ends after that error.
  pub fn into_stream(self) -> impl Stream<Item = Result<Record>> {
    stream::unfold((self, VecDeque::new()), |(mut pages, mut buffer)| async move {
      loop {
        if let Some(record) = buffer.pop_front() {
          return Some((Ok(record), (pages, buffer)));
        }
        match pages.next_page().await? {
          Ok(records) => buffer.extend(records),
          Err(e) => return Some((Err(e), (pages, buffer))),
        }
      }
    })
  }
}
