//! Error taxonomy for the cache, pagination and fetch layers.

use std::time::Duration;

use thiserror::Error;

use crate::model::{Cursor, Record};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  /// Nothing cached for the key and the caller asked for a pure cache read.
  #[error("No cached entry and expiry is disabled for this read")]
  CacheMiss,
  /// A page failed mid-pagination. Carries the cursor of the failed page.
  #[error("Failed to fetch page: {}", .0.source)]
  Fetch(Box<FetchFailure>),
  #[error("Rate limited, retry after {retry_after:?}")]
  RateLimited { retry_after: Duration },
  #[error("Remote service unavailable: {0}")]
  RemoteUnavailable(String),
  #[error("Remote service returned {status}: {message}")]
  Remote { status: u16, message: String },
  #[error("Invalid input: {0}")]
  InvalidInput(String),
  #[error("Invalid response from remote service: {0}")]
  InvalidResponse(String),
  #[error("Storage error: {0}")]
  Storage(#[from] rusqlite::Error),
  #[error("Cannot encode/decode JSON: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Network error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("Cannot parse URL: {0}")]
  InvalidUrl(#[from] url::ParseError),
}

/// State handed back when pagination stops on a failed page.
#[derive(Debug)]
pub struct FetchFailure {
  /// Points at the page that failed; pass it to `Pages::resume`.
  pub cursor: Cursor,
  /// Records fetched before the failure that the caller has not seen yet.
  pub partial: Vec<Record>,
  pub source: Error,
}

impl Error {
  pub(crate) fn fetch(cursor: Cursor, partial: Vec<Record>, source: Error) -> Self {
    Error::Fetch(Box::new(FetchFailure {
      cursor,
      partial,
      source,
    }))
  }

  /// Whether the error is transient and worth retrying after a delay.
  pub fn is_retryable(&self) -> bool {
    match self {
      Error::RateLimited { .. } | Error::RemoteUnavailable(_) => true,
      Error::Http(e) => e.is_timeout() || e.is_connect(),
      _ => false,
    }
  }

  /// The underlying cause, looking through pagination failures.
  pub fn root(&self) -> &Error {
    match self {
      Error::Fetch(failure) => failure.source.root(),
      other => other,
    }
  }
}
