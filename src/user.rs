//! User handle: the entry point for queries about one account.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::annotation::{AnnotationStore, Note, PostKind, Tag};
use crate::association::{ratio, RecordFilter};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::Result;
use crate::model::{ListInfo, MaxAge, QueryKey, QueryKind, Record, UserId};
use crate::pagination::Pages;
use crate::watchlist::Watchlist;

/// Defaults applied when a call leaves an option unset.
#[derive(Debug, Clone, Copy)]
pub struct QueryDefaults {
  pub max_age: MaxAge,
  pub fetch_limit: usize,
}

impl From<&Config> for QueryDefaults {
  fn from(config: &Config) -> Self {
    Self {
      max_age: config.max_age(),
      fetch_limit: config.fetch_limit,
    }
  }
}

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
  /// Most records to fetch. Unset means the configured fetch limit for
  /// posts and the whole collection for everything else.
  pub limit: Option<usize>,
  pub max_age: Option<MaxAge>,
}

impl FetchOptions {
  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn max_age(mut self, max_age: MaxAge) -> Self {
    self.max_age = Some(max_age);
    self
  }
}

/// A remote account. Holds no cached data of its own; every read goes
/// through the shared cache store, and notes and tags live in the shared
/// annotation store.
#[derive(Clone)]
pub struct User {
  pub id: UserId,
  pub screen_name: Option<String>,
  store: Arc<CacheStore>,
  annotations: Arc<AnnotationStore>,
  defaults: QueryDefaults,
}

impl User {
  pub fn new(
    id: UserId,
    store: Arc<CacheStore>,
    annotations: Arc<AnnotationStore>,
    defaults: QueryDefaults,
  ) -> Self {
    Self {
      id,
      screen_name: None,
      store,
      annotations,
      defaults,
    }
  }

  pub fn with_screen_name(mut self, screen_name: impl Into<String>) -> Self {
    self.screen_name = Some(screen_name.into());
    self
  }

  pub fn key(&self, kind: QueryKind) -> QueryKey {
    QueryKey::user(self.id, kind)
  }

  /// Lazy page walk over one of this user's collections.
  pub fn pages(&self, kind: QueryKind, opts: FetchOptions) -> Pages {
    let limit = match opts.limit {
      Some(limit) => Some(limit),
      None if !kind.is_post() => None,
      None => Some(self.defaults.fetch_limit),
    };
    Pages::new(
      Arc::clone(&self.store),
      self.key(kind),
      opts.max_age.unwrap_or(self.defaults.max_age),
      limit,
    )
  }

  async fn posts(
    &self,
    kind: QueryKind,
    opts: FetchOptions,
    filter: Option<RecordFilter<'_>>,
  ) -> Result<Vec<Record>> {
    let records = self.pages(kind, opts).collect().await?;
    Ok(match filter {
      Some(filter) => filter.apply(records),
      None => records,
    })
  }

  async fn relationships(&self, kind: QueryKind, opts: FetchOptions) -> Result<Vec<UserId>> {
    let records = self.pages(kind, opts).collect().await?;
    Ok(records.iter().filter_map(Record::target_id).collect())
  }

  /// Posts on this user's timeline, newest first.
  ///
  /// The limit bounds how many posts are fetched; the filter then narrows
  /// that window.
  pub async fn get_timeline(&self, opts: FetchOptions, filter: Option<RecordFilter<'_>>) -> Result<Vec<Record>> {
    self.posts(QueryKind::Timeline, opts, filter).await
  }

  /// Posts this user liked.
  pub async fn get_favorites(&self, opts: FetchOptions, filter: Option<RecordFilter<'_>>) -> Result<Vec<Record>> {
    self.posts(QueryKind::Favorites, opts, filter).await
  }

  /// Accounts this user follows.
  pub async fn get_friends(&self, opts: FetchOptions) -> Result<Vec<UserId>> {
    self.relationships(QueryKind::Friends, opts).await
  }

  /// Accounts following this user.
  pub async fn get_followers(&self, opts: FetchOptions) -> Result<Vec<UserId>> {
    self.relationships(QueryKind::Followers, opts).await
  }

  /// Lists this user has been added to.
  pub async fn get_list_memberships(&self, opts: FetchOptions) -> Result<Vec<ListInfo>> {
    let records = self.pages(QueryKind::ListMemberships, opts).collect().await?;
    Ok(records.iter().filter_map(Record::list).collect())
  }

  /// Fetched posts of `kind` that carry the tag, in delivered order.
  pub async fn get_tagged(&self, kind: PostKind, tag_id: i64, opts: FetchOptions) -> Result<Vec<Record>> {
    let ids = self.annotations.tagged_post_ids(self.id, kind, tag_id)?;
    self.posts(kind.query_kind(), opts, Some(RecordFilter::Ids(&ids))).await
  }

  pub fn add_note(&self, text: &str) -> Result<Note> {
    self.annotations.add_user_note(self.id, text)
  }

  /// Notes on this user, newest first.
  pub fn notes(&self) -> Result<Vec<Note>> {
    self.annotations.user_notes(self.id)
  }

  pub fn remove_note(&self, note_id: i64) -> Result<bool> {
    self.annotations.remove_user_note(self.id, note_id)
  }

  pub fn add_post_note(&self, kind: PostKind, post_id: u64, text: &str) -> Result<Note> {
    self.annotations.add_post_note(self.id, kind, post_id, text)
  }

  pub fn post_notes(&self, kind: PostKind, post_id: u64) -> Result<Vec<Note>> {
    self.annotations.post_notes(self.id, kind, post_id)
  }

  pub fn remove_post_note(&self, kind: PostKind, post_id: u64, note_id: i64) -> Result<bool> {
    self.annotations.remove_post_note(self.id, kind, post_id, note_id)
  }

  pub fn add_tag(&self, kind: PostKind, post_id: u64, text: &str) -> Result<Tag> {
    self.annotations.add_tag(self.id, kind, post_id, text)
  }

  pub fn remove_tag(&self, kind: PostKind, post_id: u64, tag_id: i64) -> Result<bool> {
    self.annotations.remove_tag(self.id, kind, post_id, tag_id)
  }

  pub fn post_tags(&self, kind: PostKind, post_id: u64) -> Result<Vec<Tag>> {
    self.annotations.post_tags(self.id, kind, post_id)
  }

  /// Tags used on this user's posts of `kind`.
  pub fn tags(&self, kind: PostKind) -> Result<Vec<Tag>> {
    self.annotations.tags(self.id, kind)
  }

  async fn relationship_set(&self, kind: QueryKind) -> Result<BTreeSet<UserId>> {
    Ok(self.relationships(kind, FetchOptions::default()).await?.into_iter().collect())
  }

  /// Share of friends that are on the watchlist.
  pub async fn get_friends_watchlist_percent(&self, watchlist: &Watchlist) -> Result<f64> {
    let friends = self.relationship_set(QueryKind::Friends).await?;
    Ok(ratio(&friends, &watchlist.user_ids()))
  }

  /// Share of followers that are on the watchlist.
  pub async fn get_followers_watchlist_percent(&self, watchlist: &Watchlist) -> Result<f64> {
    let followers = self.relationship_set(QueryKind::Followers).await?;
    Ok(ratio(&followers, &watchlist.user_ids()))
  }

  /// Share of the watchlist this user follows.
  pub async fn get_friends_watchlist_completion(&self, watchlist: &Watchlist) -> Result<f64> {
    let friends = self.relationship_set(QueryKind::Friends).await?;
    Ok(ratio(&watchlist.user_ids(), &friends))
  }

  /// Share of the watchlist that follows this user.
  pub async fn get_followers_watchlist_completion(&self, watchlist: &Watchlist) -> Result<f64> {
    let followers = self.relationship_set(QueryKind::Followers).await?;
    Ok(ratio(&watchlist.user_ids(), &followers))
  }

  /// Share of fetched favorites authored by a watched user.
  pub async fn get_favorites_watchlist_percent(&self, watchlist: &Watchlist, opts: FetchOptions) -> Result<f64> {
    let favorites = self.get_favorites(opts, None).await?;
    Ok(matching_share(&favorites, RecordFilter::WatchlistAuthors(watchlist)))
  }

  /// Share of fetched retweets whose original author is watched.
  pub async fn get_retweet_watchlist_percent(&self, watchlist: &Watchlist, opts: FetchOptions) -> Result<f64> {
    let retweets: Vec<Record> = self
      .get_timeline(opts, None)
      .await?
      .into_iter()
      .filter(|r| r.retweet_of().is_some())
      .collect();
    Ok(matching_share(&retweets, RecordFilter::WatchlistRetweets(watchlist)))
  }

  /// Drop this user's cached pages of `kind`; the next read refetches.
  pub fn invalidate(&self, kind: QueryKind) -> Result<usize> {
    self.store.invalidate(&self.key(kind))
  }
}

fn matching_share(records: &[Record], filter: RecordFilter<'_>) -> f64 {
  let all: BTreeSet<u64> = records.iter().map(|r| r.id).collect();
  let matched: BTreeSet<u64> = records
    .iter()
    .filter(|r| filter.matches(r))
    .map(|r| r.id)
    .collect();
  ratio(&all, &matched)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::model::Content;
  use crate::testing::MockFetchClient;

  const ME: UserId = UserId(5);

  fn setup() -> (Arc<MockFetchClient>, User) {
    let mock = Arc::new(MockFetchClient::new());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    let store = Arc::new(CacheStore::new(storage, mock.clone()));
    let defaults = QueryDefaults {
      max_age: MaxAge::seconds(3600),
      fetch_limit: 3,
    };
    let annotations = Arc::new(AnnotationStore::new(db));
    (mock, User::new(ME, store, annotations, defaults))
  }

  fn relationships(targets: &[u64]) -> Vec<Record> {
    targets.iter().map(|&t| Record::relationship(ME, UserId(t))).collect()
  }

  fn watchlist(ids: &[u64]) -> Watchlist {
    let mut watchlist = Watchlist::new("test");
    watchlist.add_users(ids.iter().copied().map(UserId));
    watchlist
  }

  fn retweet(id: u64, original: u64) -> Record {
    Record {
      id,
      author_id: ME,
      created_at: None,
      content: Content::Post {
        text: "RT".to_string(),
        retweet_of: Some(UserId(original)),
      },
    }
  }

  #[tokio::test]
  async fn test_repeated_reads_hit_cache() {
    let (mock, user) = setup();
    mock.add_pages(
      user.key(QueryKind::Timeline),
      vec![vec![Record::post(1, ME, "a"), Record::post(2, ME, "b")]],
    );

    let first = user.get_timeline(FetchOptions::default(), None).await.unwrap();
    let calls = mock.calls();
    let second = user.get_timeline(FetchOptions::default(), None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(mock.calls(), calls);
  }

  #[tokio::test]
  async fn test_post_limit_defaults_to_fetch_limit() {
    let (mock, user) = setup();
    let key = user.key(QueryKind::Timeline);
    mock.add_pages(
      key,
      vec![
        vec![Record::post(1, ME, "a"), Record::post(2, ME, "b")],
        vec![Record::post(3, ME, "c"), Record::post(4, ME, "d")],
        vec![Record::post(5, ME, "e")],
      ],
    );

    let records = user.get_timeline(FetchOptions::default(), None).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(mock.requested_pages(&key), vec![0, 1]);

    let all = user.get_timeline(FetchOptions::default().limit(10), None).await.unwrap();
    assert_eq!(all.len(), 5);
  }

  #[tokio::test]
  async fn test_filter_applies_to_fetched_window() {
    let (mock, user) = setup();
    mock.add_pages(
      user.key(QueryKind::Favorites),
      vec![vec![
        Record::post(1, UserId(1), "one"),
        Record::post(2, UserId(2), "two"),
        Record::post(3, UserId(3), "three"),
        Record::post(4, UserId(1), "four"),
      ]],
    );
    let watched = watchlist(&[1]);

    let records = user
      .get_favorites(FetchOptions::default(), Some(RecordFilter::WatchlistAuthors(&watched)))
      .await
      .unwrap();
    // Post 4 is outside the three-record window.
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
  }

  #[tokio::test]
  async fn test_friends_fetch_every_page_by_default() {
    let (mock, user) = setup();
    mock.add_pages(
      user.key(QueryKind::Friends),
      vec![relationships(&[1, 2, 3]), relationships(&[4, 5])],
    );

    let friends = user.get_friends(FetchOptions::default()).await.unwrap();
    assert_eq!(friends, vec![UserId(1), UserId(2), UserId(3), UserId(4), UserId(5)]);
  }

  #[tokio::test]
  async fn test_friends_watchlist_percent() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Friends), vec![relationships(&[1, 2, 3, 4])]);

    let percent = user.get_friends_watchlist_percent(&watchlist(&[1, 3])).await.unwrap();
    assert_eq!(percent, 0.5);

    let completion = user.get_friends_watchlist_completion(&watchlist(&[1, 3, 8, 9])).await.unwrap();
    assert_eq!(completion, 0.5);
  }

  #[tokio::test]
  async fn test_no_friends_is_zero_percent() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Friends), vec![vec![]]);
    assert_eq!(user.get_friends_watchlist_percent(&watchlist(&[1])).await.unwrap(), 0.0);
  }

  #[tokio::test]
  async fn test_followers_watchlist_ratios() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Followers), vec![relationships(&[1, 2])]);

    assert_eq!(user.get_followers(FetchOptions::default()).await.unwrap().len(), 2);
    assert_eq!(user.get_followers_watchlist_percent(&watchlist(&[2, 7])).await.unwrap(), 0.5);
    assert_eq!(
      user.get_followers_watchlist_completion(&watchlist(&[2, 7, 8, 9])).await.unwrap(),
      0.25
    );
  }

  #[tokio::test]
  async fn test_favorites_and_retweet_percent() {
    let (mock, user) = setup();
    mock.add_pages(
      user.key(QueryKind::Favorites),
      vec![vec![Record::post(1, UserId(1), "a"), Record::post(2, UserId(2), "b")]],
    );
    mock.add_pages(
      user.key(QueryKind::Timeline),
      vec![vec![retweet(10, 1), Record::post(11, ME, "own"), retweet(12, 4)]],
    );
    let watched = watchlist(&[1]);

    let favorites = user
      .get_favorites_watchlist_percent(&watched, FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(favorites, 0.5);

    let retweets = user
      .get_retweet_watchlist_percent(&watched, FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(retweets, 0.5);
  }

  #[tokio::test]
  async fn test_sublist_members_count_in_ratios() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Friends), vec![relationships(&[1, 2, 3, 4])]);
    let mut watched = watchlist(&[1]);
    watched.import_sublist(70, "list", [UserId(2), UserId(3)]);
    watched.set_exclusion(70, UserId(3), true);

    assert_eq!(user.get_friends_watchlist_percent(&watched).await.unwrap(), 0.5);
    assert_eq!(user.get_friends_watchlist_completion(&watched).await.unwrap(), 1.0);
  }

  #[tokio::test]
  async fn test_list_memberships_read_whole_collection() {
    let (mock, user) = setup();
    let lists = |ids: &[u64]| -> Vec<Record> {
      ids
        .iter()
        .map(|&id| Record::list_membership(ME, id, format!("list {}", id)))
        .collect()
    };
    mock.add_pages(
      user.key(QueryKind::ListMemberships),
      vec![lists(&[70, 71, 72]), lists(&[73])],
    );

    let memberships = user.get_list_memberships(FetchOptions::default()).await.unwrap();
    assert_eq!(memberships.len(), 4);
    assert_eq!(memberships[3], ListInfo { id: 73, name: "list 73".to_string() });
  }

  #[tokio::test]
  async fn test_tagged_posts_come_from_fetched_window() {
    let (mock, user) = setup();
    mock.add_pages(
      user.key(QueryKind::Timeline),
      vec![vec![
        Record::post(1, ME, "a"),
        Record::post(2, ME, "b"),
        Record::post(3, ME, "c"),
        Record::post(4, ME, "d"),
      ]],
    );
    let spam = user.add_tag(PostKind::Timeline, 2, "spam").unwrap();
    user.add_tag(PostKind::Timeline, 4, "spam").unwrap();
    user.add_tag(PostKind::Favorites, 1, "spam").unwrap();

    let tagged = user
      .get_tagged(PostKind::Timeline, spam.id, FetchOptions::default().limit(10))
      .await
      .unwrap();
    assert_eq!(tagged.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 4]);

    let windowed = user.get_tagged(PostKind::Timeline, spam.id, FetchOptions::default()).await.unwrap();
    assert_eq!(windowed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
  }

  #[tokio::test]
  async fn test_notes_survive_cache_invalidation() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Timeline), vec![vec![Record::post(1, ME, "a")]]);
    user.get_timeline(FetchOptions::default(), None).await.unwrap();

    let note = user.add_note("follow up").unwrap();
    user.add_post_note(PostKind::Timeline, 1, "source?").unwrap();
    user.invalidate(QueryKind::Timeline).unwrap();

    assert_eq!(user.notes().unwrap(), vec![note.clone()]);
    assert_eq!(user.post_notes(PostKind::Timeline, 1).unwrap().len(), 1);
    assert!(user.remove_note(note.id).unwrap());
    assert!(user.notes().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Friends), vec![relationships(&[1])]);

    user.get_friends(FetchOptions::default()).await.unwrap();
    assert_eq!(user.invalidate(QueryKind::Friends).unwrap(), 1);
    user.get_friends(FetchOptions::default()).await.unwrap();
    assert_eq!(mock.calls(), 2);
  }

  #[tokio::test]
  async fn test_cache_only_read() {
    let (mock, user) = setup();
    mock.add_pages(user.key(QueryKind::Friends), vec![relationships(&[1])]);
    let cache_only = FetchOptions::default().max_age(MaxAge::Forever);

    assert!(user.get_friends(cache_only).await.is_err());
    user.get_friends(FetchOptions::default()).await.unwrap();
    assert_eq!(user.get_friends(cache_only).await.unwrap(), vec![UserId(1)]);
    assert_eq!(mock.calls(), 1);
  }
}
