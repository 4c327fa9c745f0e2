//! Watchlists: curated accounts and keywords, plus their persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::model::UserId;

/// A named set of watched accounts and watch-words.
///
/// Accounts are either added directly or imported from remote lists as
/// sublists. Watch-words are stored trimmed and lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
  pub name: String,
  /// Accounts added directly
  pub watched_user_ids: BTreeSet<UserId>,
  pub watch_words: BTreeSet<String>,
  /// Imported lists by list id
  #[serde(default)]
  pub sublists: BTreeMap<u64, Sublist>,
}

/// Members of a remote list, as last imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sublist {
  pub list_id: u64,
  pub name: String,
  pub members: BTreeSet<UserId>,
  /// Accounts left out locally. Kept when the list is imported again.
  pub excluded: BTreeSet<UserId>,
}

impl Sublist {
  /// Members that count towards the watchlist.
  pub fn watched(&self) -> impl Iterator<Item = UserId> + '_ {
    self.members.difference(&self.excluded).copied()
  }
}

fn normalize_word(word: &str) -> Option<String> {
  let word = word.trim().to_lowercase();
  (!word.is_empty()).then_some(word)
}

impl Watchlist {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  /// Returns false if the user was already watched.
  pub fn add_user(&mut self, id: UserId) -> bool {
    self.watched_user_ids.insert(id)
  }

  pub fn add_users(&mut self, ids: impl IntoIterator<Item = UserId>) {
    self.watched_user_ids.extend(ids);
  }

  pub fn remove_user(&mut self, id: UserId) -> bool {
    self.watched_user_ids.remove(&id)
  }

  /// Remove directly added accounts. Sublists are left alone.
  pub fn clear_users(&mut self) {
    self.watched_user_ids.clear();
  }

  pub fn contains_user(&self, id: UserId) -> bool {
    self.watched_user_ids.contains(&id)
      || self
        .sublists
        .values()
        .any(|sublist| sublist.members.contains(&id) && !sublist.excluded.contains(&id))
  }

  /// Every watched account: direct ones plus non-excluded sublist members.
  pub fn user_ids(&self) -> BTreeSet<UserId> {
    let mut ids = self.watched_user_ids.clone();
    for sublist in self.sublists.values() {
      ids.extend(sublist.watched());
    }
    ids
  }

  /// Replace the members of sublist `list_id`, creating it if needed.
  ///
  /// Local exclusions of an existing sublist are kept.
  pub fn import_sublist(&mut self, list_id: u64, name: &str, members: impl IntoIterator<Item = UserId>) {
    let sublist = self.sublists.entry(list_id).or_insert_with(|| Sublist {
      list_id,
      ..Sublist::default()
    });
    sublist.name = name.to_string();
    sublist.members = members.into_iter().collect();
  }

  pub fn sublist(&self, list_id: u64) -> Option<&Sublist> {
    self.sublists.get(&list_id)
  }

  /// Include or exclude one account of a sublist. Returns false if there is
  /// no such sublist.
  pub fn set_exclusion(&mut self, list_id: u64, user: UserId, excluded: bool) -> bool {
    match self.sublists.get_mut(&list_id) {
      Some(sublist) => {
        if excluded {
          sublist.excluded.insert(user);
        } else {
          sublist.excluded.remove(&user);
        }
        true
      }
      None => false,
    }
  }

  /// Drop a sublist. Its members stay watched only if added directly or
  /// through another sublist.
  pub fn remove_sublist(&mut self, list_id: u64) -> Option<Sublist> {
    self.sublists.remove(&list_id)
  }

  /// Add a watch-word. Blank words are rejected and return false.
  pub fn add_watchword(&mut self, word: &str) -> bool {
    match normalize_word(word) {
      Some(word) => self.watch_words.insert(word),
      None => false,
    }
  }

  pub fn remove_watchword(&mut self, word: &str) -> bool {
    match normalize_word(word) {
      Some(word) => self.watch_words.remove(&word),
      None => false,
    }
  }

  pub fn user_count(&self) -> usize {
    self.user_ids().len()
  }

  pub fn word_count(&self) -> usize {
    self.watch_words.len()
  }
}

/// Persists watchlists next to the page cache.
pub struct WatchlistStore {
  db: Arc<Database>,
}

impl WatchlistStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Save a watchlist, replacing any stored membership under the same name.
  pub fn save(&self, watchlist: &Watchlist) -> Result<()> {
    let mut conn = self.db.conn();
    let tx = conn.transaction()?;
    let name = watchlist.name.as_str();

    tx.execute(
      "INSERT OR REPLACE INTO watchlists (name, updated_at) VALUES (?, ?)",
      params![name, Utc::now().timestamp_micros()],
    )?;
    tx.execute("DELETE FROM watchlist_users WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_words WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_sublists WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_sublist_users WHERE watchlist = ?", params![name])?;

    {
      let mut insert_user =
        tx.prepare("INSERT INTO watchlist_users (watchlist, user_id) VALUES (?, ?)")?;
      for id in &watchlist.watched_user_ids {
        insert_user.execute(params![name, id.0 as i64])?;
      }

      let mut insert_word = tx.prepare("INSERT INTO watchlist_words (watchlist, word) VALUES (?, ?)")?;
      for word in &watchlist.watch_words {
        insert_word.execute(params![name, word])?;
      }

      let mut insert_sublist =
        tx.prepare("INSERT INTO watchlist_sublists (watchlist, list_id, name) VALUES (?, ?, ?)")?;
      let mut insert_sublist_user = tx.prepare(
        "INSERT INTO watchlist_sublist_users (watchlist, list_id, user_id, member, excluded)
         VALUES (?, ?, ?, ?, ?)",
      )?;
      for sublist in watchlist.sublists.values() {
        let list_id = sublist.list_id as i64;
        insert_sublist.execute(params![name, list_id, sublist.name])?;
        for id in sublist.members.union(&sublist.excluded) {
          insert_sublist_user.execute(params![
            name,
            list_id,
            id.0 as i64,
            sublist.members.contains(id),
            sublist.excluded.contains(id)
          ])?;
        }
      }
    }

    tx.commit()?;
    debug!(
      name,
      users = watchlist.user_count(),
      words = watchlist.word_count(),
      "Saved watchlist"
    );
    Ok(())
  }

  pub fn load(&self, name: &str) -> Result<Option<Watchlist>> {
    let conn = self.db.conn();

    let exists = conn
      .query_row("SELECT 1 FROM watchlists WHERE name = ?", params![name], |_| Ok(()))
      .optional()?;
    if exists.is_none() {
      return Ok(None);
    }

    let mut watchlist = Watchlist::new(name);

    let mut stmt = conn.prepare("SELECT user_id FROM watchlist_users WHERE watchlist = ?")?;
    let ids = stmt.query_map(params![name], |row| row.get::<_, i64>(0))?;
    for id in ids {
      watchlist.add_user(UserId(id? as u64));
    }

    let mut stmt = conn.prepare("SELECT word FROM watchlist_words WHERE watchlist = ?")?;
    let words = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
    for word in words {
      watchlist.watch_words.insert(word?);
    }

    let mut stmt = conn.prepare("SELECT list_id, name FROM watchlist_sublists WHERE watchlist = ?")?;
    let sublists = stmt.query_map(params![name], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for sublist in sublists {
      let (list_id, list_name) = sublist?;
      let list_id = list_id as u64;
      watchlist.sublists.insert(
        list_id,
        Sublist {
          list_id,
          name: list_name,
          ..Sublist::default()
        },
      );
    }

    let mut stmt = conn.prepare(
      "SELECT list_id, user_id, member, excluded FROM watchlist_sublist_users WHERE watchlist = ?",
    )?;
    let rows = stmt.query_map(params![name], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, i64>(1)?,
        row.get::<_, bool>(2)?,
        row.get::<_, bool>(3)?,
      ))
    })?;
    for row in rows {
      let (list_id, user_id, member, excluded) = row?;
      if let Some(sublist) = watchlist.sublists.get_mut(&(list_id as u64)) {
        let id = UserId(user_id as u64);
        if member {
          sublist.members.insert(id);
        }
        if excluded {
          sublist.excluded.insert(id);
        }
      }
    }

    Ok(Some(watchlist))
  }

  /// Names of all stored watchlists, sorted.
  pub fn list(&self) -> Result<Vec<String>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare("SELECT name FROM watchlists ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
  }

  /// Returns false if no watchlist had that name.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM watchlist_users WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_words WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_sublists WHERE watchlist = ?", params![name])?;
    tx.execute("DELETE FROM watchlist_sublist_users WHERE watchlist = ?", params![name])?;
    let removed = tx.execute("DELETE FROM watchlists WHERE name = ?", params![name])?;
    tx.commit()?;

    if removed > 0 {
      info!(name, "Deleted watchlist");
    }
    Ok(removed > 0)
  }
}
