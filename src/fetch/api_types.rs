//! Serde-deserializable types matching the REST API responses.
//!
//! Only the fields the cache keeps are mapped; everything else is ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Content, Page, PageToken, Record, UserId, UserProfile};

/// Timestamp format used by the v1.1 API, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const API_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: u64,
  #[serde(default)]
  pub screen_name: String,
}

impl From<ApiUser> for UserProfile {
  fn from(user: ApiUser) -> Self {
    UserProfile {
      id: UserId(user.id),
      screen_name: user.screen_name,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiTweet {
  pub id: u64,
  /// Present when requested with `tweet_mode=extended`
  pub full_text: Option<String>,
  pub text: Option<String>,
  pub created_at: Option<String>,
  pub user: ApiUser,
  pub retweeted_status: Option<Box<ApiTweet>>,
}

impl ApiTweet {
  fn body(&self) -> String {
    self
      .full_text
      .clone()
      .or_else(|| self.text.clone())
      .unwrap_or_default()
  }

  pub fn into_record(self) -> Record {
    // Retweets carry a truncated copy; the original holds the full text.
    let (text, retweet_of) = match &self.retweeted_status {
      Some(original) => (original.body(), Some(UserId(original.user.id))),
      None => (self.body(), None),
    };

    Record {
      id: self.id,
      author_id: UserId(self.user.id),
      created_at: self.created_at.as_deref().and_then(parse_api_date),
      content: Content::Post { text, retweet_of },
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiIdsResponse {
  #[serde(default)]
  pub ids: Vec<u64>,
  #[serde(default)]
  pub next_cursor: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiList {
  pub id: u64,
  #[serde(default)]
  pub name: String,
  /// `@owner/slug`, preferred over the bare name
  pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiListsResponse {
  #[serde(default)]
  pub lists: Vec<ApiList>,
  #[serde(default)]
  pub next_cursor: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiUsersResponse {
  #[serde(default)]
  pub users: Vec<ApiUser>,
  #[serde(default)]
  pub next_cursor: i64,
}

pub fn parse_api_date(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_str(s, API_DATE_FORMAT)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

/// Build a page from a `max_id`-paged timeline response.
///
/// The next page asks for everything older than the oldest tweet seen; an
/// empty response ends the collection.
pub fn timeline_page(tweets: Vec<ApiTweet>) -> Page {
  let oldest = tweets.iter().map(|t| t.id).min();
  let records: Vec<Record> = tweets.into_iter().map(ApiTweet::into_record).collect();

  match oldest {
    Some(id) if id > 0 => Page::with_next(records, PageToken::new((id - 1).to_string())),
    _ => Page::last(records),
  }
}

/// A `cursor`-paged response ends when `next_cursor` is 0.
fn cursor_page(records: Vec<Record>, next_cursor: i64) -> Page {
  if next_cursor == 0 {
    Page::last(records)
  } else {
    Page::with_next(records, PageToken::new(next_cursor.to_string()))
  }
}

/// Build a page from a `cursor`-paged id list response.
pub fn ids_page(owner: UserId, response: ApiIdsResponse) -> Page {
  let records = response
    .ids
    .into_iter()
    .map(|id| Record::relationship(owner, UserId(id)))
    .collect();
  cursor_page(records, response.next_cursor)
}

pub fn list_memberships_page(member: UserId, response: ApiListsResponse) -> Page {
  let records = response
    .lists
    .into_iter()
    .map(|list| {
      let name = list.full_name.filter(|n| !n.is_empty()).unwrap_or(list.name);
      Record::list_membership(member, list.id, name)
    })
    .collect();
  cursor_page(records, response.next_cursor)
}

pub fn list_members_page(response: ApiUsersResponse) -> Page {
  let records = response
    .users
    .into_iter()
    .map(|user| Record::list_member(UserId(user.id)))
    .collect();
  cursor_page(records, response.next_cursor)
}
