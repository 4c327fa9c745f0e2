//! Domain types shared by the cache, pagination and analysis layers.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stable numeric account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<u64> for UserId {
  fn from(id: u64) -> Self {
    UserId(id)
  }
}

/// Kinds of remote object that own cached pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  User,
  List,
}

impl EntityType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityType::User => "user",
      EntityType::List => "list",
    }
  }
}

/// The paginated collections the cache knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
  Timeline,
  Favorites,
  Friends,
  Followers,
  /// Lists a user has been added to
  ListMemberships,
  /// Accounts on a list
  ListMembers,
}

impl QueryKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueryKind::Timeline => "timeline",
      QueryKind::Favorites => "favorites",
      QueryKind::Friends => "friends",
      QueryKind::Followers => "followers",
      QueryKind::ListMemberships => "list_memberships",
      QueryKind::ListMembers => "list_members",
    }
  }

  /// Posts are read up to a fetch limit; every other collection is read whole.
  pub fn is_post(&self) -> bool {
    matches!(self, QueryKind::Timeline | QueryKind::Favorites)
  }
}

/// Identifies one paginated collection: the cache key minus the page token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
  pub entity_type: EntityType,
  /// Account id or list id, depending on `entity_type`
  pub entity_id: u64,
  pub kind: QueryKind,
}

impl QueryKey {
  pub fn user(id: UserId, kind: QueryKind) -> Self {
    Self {
      entity_type: EntityType::User,
      entity_id: id.0,
      kind,
    }
  }

  /// Members of a list.
  pub fn list_members(list_id: u64) -> Self {
    Self {
      entity_type: EntityType::List,
      entity_id: list_id,
      kind: QueryKind::ListMembers,
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}",
      self.entity_type.as_str(),
      self.entity_id,
      self.kind.as_str()
    )
  }
}

/// Opaque continuation token returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(pub String);

impl PageToken {
  pub fn new(token: impl Into<String>) -> Self {
    PageToken(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// What a record carries besides its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
  /// A post on a timeline or in favorites.
  Post {
    text: String,
    /// Original author when the post is a retweet
    retweet_of: Option<UserId>,
  },
  /// An edge in the follow graph, or an account on a list.
  Relationship { target_id: UserId },
  /// A list the record's author was added to. The record id is the list id.
  ListMembership { name: String },
}

/// A fetched post or relationship. Never mutated once cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub id: u64,
  pub author_id: UserId,
  pub created_at: Option<DateTime<Utc>>,
  pub content: Content,
}

impl Record {
  pub fn post(id: u64, author_id: UserId, text: impl Into<String>) -> Self {
    Self {
      id,
      author_id,
      created_at: None,
      content: Content::Post {
        text: text.into(),
        retweet_of: None,
      },
    }
  }

  pub fn relationship(owner: UserId, target_id: UserId) -> Self {
    Self {
      id: target_id.0,
      author_id: owner,
      created_at: None,
      content: Content::Relationship { target_id },
    }
  }

  /// An account on a list.
  pub fn list_member(member: UserId) -> Self {
    Self {
      id: member.0,
      author_id: member,
      created_at: None,
      content: Content::Relationship { target_id: member },
    }
  }

  pub fn list_membership(member: UserId, list_id: u64, name: impl Into<String>) -> Self {
    Self {
      id: list_id,
      author_id: member,
      created_at: None,
      content: Content::ListMembership { name: name.into() },
    }
  }

  pub fn text(&self) -> Option<&str> {
    match &self.content {
      Content::Post { text, .. } => Some(text),
      _ => None,
    }
  }

  pub fn retweet_of(&self) -> Option<UserId> {
    match &self.content {
      Content::Post { retweet_of, .. } => *retweet_of,
      _ => None,
    }
  }

  pub fn target_id(&self) -> Option<UserId> {
    match &self.content {
      Content::Relationship { target_id } => Some(*target_id),
      _ => None,
    }
  }

  pub fn list(&self) -> Option<ListInfo> {
    match &self.content {
      Content::ListMembership { name } => Some(ListInfo {
        id: self.id,
        name: name.clone(),
      }),
      _ => None,
    }
  }
}

/// A list as seen from one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListInfo {
  pub id: u64,
  pub name: String,
}

/// One page as delivered by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
  pub records: Vec<Record>,
  pub next_page_token: Option<PageToken>,
  pub exhausted: bool,
}

impl Page {
  /// Last page of a collection.
  pub fn last(records: Vec<Record>) -> Self {
    Self {
      records,
      next_page_token: None,
      exhausted: true,
    }
  }

  pub fn with_next(records: Vec<Record>, next: PageToken) -> Self {
    Self {
      records,
      next_page_token: Some(next),
      exhausted: false,
    }
  }
}

/// A cached page together with its fetch time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub page_token: Option<PageToken>,
  pub page: Page,
  pub fetched_at: DateTime<Utc>,
}

/// Pagination position within one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
  pub kind: QueryKind,
  /// Token of the next page to request; `None` is the first page
  pub next_page_token: Option<PageToken>,
  /// Records of the current page already handed out
  #[serde(default)]
  pub offset: usize,
  pub exhausted: bool,
}

impl Cursor {
  pub fn start(kind: QueryKind) -> Self {
    Self {
      kind,
      next_page_token: None,
      offset: 0,
      exhausted: false,
    }
  }

  pub(crate) fn advance(&mut self, page: &Page) {
    self.next_page_token = page.next_page_token.clone();
    self.offset = 0;
    // A page without a continuation token cannot be followed.
    self.exhausted = page.exhausted || page.next_page_token.is_none();
  }
}

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: UserId,
  pub screen_name: String,
}

/// How old a cached page may be and still be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
  Within(Duration),
  /// Never expire; serve only from cache.
  Forever,
}

impl MaxAge {
  /// Always refresh.
  pub fn zero() -> Self {
    MaxAge::Within(Duration::zero())
  }

  pub fn seconds(secs: i64) -> Self {
    MaxAge::Within(Duration::seconds(secs))
  }

  /// Whether a page fetched at `fetched_at` may be served at `now`.
  pub fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match self {
      MaxAge::Forever => true,
      MaxAge::Within(d) if d.is_zero() => false,
      MaxAge::Within(d) => now - fetched_at <= *d,
    }
  }
}
