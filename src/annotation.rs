//! Local notes and tags attached to accounts and their posts.
//!
//! Annotations never reach the remote service and are not part of the page
//! cache, so expiring or invalidating cached pages leaves them in place.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::model::{QueryKind, UserId};

/// Post collections that can carry notes and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
  Timeline,
  Favorites,
}

impl PostKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      PostKind::Timeline => "timeline",
      PostKind::Favorites => "favorites",
    }
  }

  pub fn query_kind(&self) -> QueryKind {
    match self {
      PostKind::Timeline => QueryKind::Timeline,
      PostKind::Favorites => QueryKind::Favorites,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
  pub id: i64,
  pub text: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
  pub id: i64,
  pub text: String,
}

fn non_blank(text: &str, what: &str) -> Result<String> {
  let text = text.trim();
  if text.is_empty() {
    return Err(Error::InvalidInput(format!("{} must not be blank", what)));
  }
  Ok(text.to_string())
}

fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
  let micros: i64 = row.get(2)?;
  Ok(Note {
    id: row.get(0)?,
    text: row.get(1)?,
    created_at: DateTime::from_timestamp_micros(micros).unwrap_or_default(),
  })
}

fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
  Ok(Tag {
    id: row.get(0)?,
    text: row.get(1)?,
  })
}

/// Persists notes and tags next to the page cache.
pub struct AnnotationStore {
  db: Arc<Database>,
}

impl AnnotationStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  pub fn add_user_note(&self, user: UserId, text: &str) -> Result<Note> {
    let text = non_blank(text, "note")?;
    let created_at = Utc::now();
    let conn = self.db.conn();
    conn.execute(
      "INSERT INTO user_notes (user_id, text, created_at) VALUES (?, ?, ?)",
      params![user.0 as i64, text, created_at.timestamp_micros()],
    )?;
    Ok(Note {
      id: conn.last_insert_rowid(),
      text,
      created_at,
    })
  }

  /// Notes on an account, newest first.
  pub fn user_notes(&self, user: UserId) -> Result<Vec<Note>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare(
      "SELECT note_id, text, created_at FROM user_notes
       WHERE user_id = ? ORDER BY created_at DESC, note_id DESC",
    )?;
    let notes = stmt
      .query_map(params![user.0 as i64], note_from_row)?
      .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(notes)
  }

  /// Returns false if the account had no such note.
  pub fn remove_user_note(&self, user: UserId, note_id: i64) -> Result<bool> {
    let removed = self.db.conn().execute(
      "DELETE FROM user_notes WHERE user_id = ? AND note_id = ?",
      params![user.0 as i64, note_id],
    )?;
    Ok(removed > 0)
  }

  pub fn add_post_note(&self, user: UserId, kind: PostKind, post_id: u64, text: &str) -> Result<Note> {
    let text = non_blank(text, "note")?;
    let created_at = Utc::now();
    let conn = self.db.conn();
    conn.execute(
      "INSERT INTO post_notes (user_id, post_kind, post_id, text, created_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        user.0 as i64,
        kind.as_str(),
        post_id as i64,
        text,
        created_at.timestamp_micros()
      ],
    )?;
    Ok(Note {
      id: conn.last_insert_rowid(),
      text,
      created_at,
    })
  }

  /// Notes on one post, newest first.
  pub fn post_notes(&self, user: UserId, kind: PostKind, post_id: u64) -> Result<Vec<Note>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare(
      "SELECT note_id, text, created_at FROM post_notes
       WHERE user_id = ? AND post_kind = ? AND post_id = ?
       ORDER BY created_at DESC, note_id DESC",
    )?;
    let notes = stmt
      .query_map(params![user.0 as i64, kind.as_str(), post_id as i64], note_from_row)?
      .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(notes)
  }

  pub fn remove_post_note(&self, user: UserId, kind: PostKind, post_id: u64, note_id: i64) -> Result<bool> {
    let removed = self.db.conn().execute(
      "DELETE FROM post_notes
       WHERE user_id = ? AND post_kind = ? AND post_id = ? AND note_id = ?",
      params![user.0 as i64, kind.as_str(), post_id as i64, note_id],
    )?;
    Ok(removed > 0)
  }

  /// Id of the tag with this text, creating it on first use.
  ///
  /// Tag text is trimmed; case is kept.
  pub fn tag(&self, text: &str) -> Result<Tag> {
    let text = non_blank(text, "tag")?;
    let mut conn = self.db.conn();
    let tx = conn.transaction()?;

    let existing = tx
      .query_row("SELECT tag_id FROM tags WHERE text = ?", params![text], |row| row.get(0))
      .optional()?;
    let id = match existing {
      Some(id) => id,
      None => {
        tx.execute("INSERT INTO tags (text) VALUES (?)", params![text])?;
        let id = tx.last_insert_rowid();
        debug!(tag = %text, id, "Created tag");
        id
      }
    };

    tx.commit()?;
    Ok(Tag { id, text })
  }

  /// Apply a tag to a post. Tagging twice is a no-op.
  pub fn add_tag(&self, user: UserId, kind: PostKind, post_id: u64, text: &str) -> Result<Tag> {
    let tag = self.tag(text)?;
    self.db.conn().execute(
      "INSERT OR IGNORE INTO post_tags (user_id, post_kind, post_id, tag_id) VALUES (?, ?, ?, ?)",
      params![user.0 as i64, kind.as_str(), post_id as i64, tag.id],
    )?;
    Ok(tag)
  }

  pub fn remove_tag(&self, user: UserId, kind: PostKind, post_id: u64, tag_id: i64) -> Result<bool> {
    let removed = self.db.conn().execute(
      "DELETE FROM post_tags WHERE user_id = ? AND post_kind = ? AND post_id = ? AND tag_id = ?",
      params![user.0 as i64, kind.as_str(), post_id as i64, tag_id],
    )?;
    Ok(removed > 0)
  }

  /// Tags on one post, by text.
  pub fn post_tags(&self, user: UserId, kind: PostKind, post_id: u64) -> Result<Vec<Tag>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare(
      "SELECT t.tag_id, t.text FROM tags t
       JOIN post_tags pt ON pt.tag_id = t.tag_id
       WHERE pt.user_id = ? AND pt.post_kind = ? AND pt.post_id = ?
       ORDER BY t.text",
    )?;
    let tags = stmt
      .query_map(params![user.0 as i64, kind.as_str(), post_id as i64], tag_from_row)?
      .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
  }

  /// Every tag used on this account's posts of `kind`, by text.
  pub fn tags(&self, user: UserId, kind: PostKind) -> Result<Vec<Tag>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare(
      "SELECT DISTINCT t.tag_id, t.text FROM tags t
       JOIN post_tags pt ON pt.tag_id = t.tag_id
       WHERE pt.user_id = ? AND pt.post_kind = ?
       ORDER BY t.text",
    )?;
    let tags = stmt
      .query_map(params![user.0 as i64, kind.as_str()], tag_from_row)?
      .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
  }

  /// Ids of this account's posts of `kind` carrying the tag.
  pub fn tagged_post_ids(&self, user: UserId, kind: PostKind, tag_id: i64) -> Result<BTreeSet<u64>> {
    let conn = self.db.conn();
    let mut stmt = conn.prepare(
      "SELECT post_id FROM post_tags WHERE user_id = ? AND post_kind = ? AND tag_id = ?",
    )?;
    let ids = stmt
      .query_map(params![user.0 as i64, kind.as_str(), tag_id], |row| row.get::<_, i64>(0))?
      .map(|id| id.map(|id| id as u64))
      .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(ids)
  }
}
