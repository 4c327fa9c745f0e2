//! Watchlist association: filters over fetched records and set ratios.
//!
//! Nothing here performs I/O. Inputs are records already fetched through the
//! cache, so the same data can be analysed any number of times.

use std::collections::BTreeSet;

use crate::model::Record;
use crate::watchlist::Watchlist;

/// Records authored by a watched user, in their original order.
pub fn filter_by_watchlist_authors(records: &[Record], watchlist: &Watchlist) -> Vec<Record> {
  filter(records, RecordFilter::WatchlistAuthors(watchlist))
}

/// Records whose text contains any watch-word, ignoring case.
///
/// Matching is by substring, so "the" also matches "theory".
pub fn filter_by_watchwords(records: &[Record], watchlist: &Watchlist) -> Vec<Record> {
  filter(records, RecordFilter::Watchwords(watchlist))
}

/// Retweets whose original author is watched.
pub fn filter_by_retweeted_authors(records: &[Record], watchlist: &Watchlist) -> Vec<Record> {
  filter(records, RecordFilter::WatchlistRetweets(watchlist))
}

/// `|a ∩ b| / |a|`, or 0.0 when `a` is empty.
pub fn ratio<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
  if a.is_empty() {
    return 0.0;
  }
  a.intersection(b).count() as f64 / a.len() as f64
}

/// How a get-operation narrows the records it fetched.
#[derive(Debug, Clone, Copy)]
pub enum RecordFilter<'a> {
  /// Keep records authored by a watched user
  WatchlistAuthors(&'a Watchlist),
  /// Keep retweets of a watched user
  WatchlistRetweets(&'a Watchlist),
  /// Keep records containing a watch-word
  Watchwords(&'a Watchlist),
  /// Keep records whose id is in the set, e.g. posts carrying a tag
  Ids(&'a BTreeSet<u64>),
}

impl RecordFilter<'_> {
  pub fn matches(&self, record: &Record) -> bool {
    match self {
      RecordFilter::WatchlistAuthors(watchlist) => watchlist.contains_user(record.author_id),
      RecordFilter::WatchlistRetweets(watchlist) => record
        .retweet_of()
        .is_some_and(|author| watchlist.contains_user(author)),
      RecordFilter::Watchwords(watchlist) => match record.text() {
        Some(text) => {
          let text = text.to_lowercase();
          watchlist.watch_words.iter().any(|word| text.contains(word.as_str()))
        }
        None => false,
      },
      RecordFilter::Ids(ids) => ids.contains(&record.id),
    }
  }

  pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
    records.into_iter().filter(|r| self.matches(r)).collect()
  }
}

fn filter(records: &[Record], filter: RecordFilter<'_>) -> Vec<Record> {
  records.iter().filter(|r| filter.matches(r)).cloned().collect()
}
