//! SQLite implementation of the page cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use super::traits::CacheStorage;
use crate::db::schema::SCHEMA_VERSION;
use crate::db::Database;
use crate::error::Result;
use crate::model::{CacheEntry, Page, PageToken, QueryKey, Record};

/// SQLite-based cache storage implementation.
///
/// Pages map to an ordered list of record ids; the records themselves live
/// in their own table. Refreshing a page never rewrites a readable record of
/// the current schema version, and drops records no page refers to any more.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// Row key for the first page, which has no token.
fn token_column(page_token: Option<&PageToken>) -> &str {
  page_token.map(PageToken::as_str).unwrap_or("")
}

fn decode(data: &[u8]) -> Option<Record> {
  serde_json::from_slice(data).ok()
}

fn micros(at: DateTime<Utc>) -> i64 {
  at.timestamp_micros()
}

fn from_micros(value: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp_micros(value)
}

impl CacheStorage for SqliteStorage {
  fn get_page(&self, key: &QueryKey, page_token: Option<&PageToken>) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn();
    let entity_type = key.entity_type.as_str();
    let entity_id = key.entity_id as i64;
    let kind = key.kind.as_str();
    let token = token_column(page_token);

    let page_info: Option<(i64, Option<String>, bool, i64)> = conn
      .query_row(
        "SELECT schema_version, next_page_token, exhausted, fetched_at FROM cache_pages
         WHERE entity_type = ? AND entity_id = ? AND query_kind = ? AND page_token = ?",
        params![entity_type, entity_id, kind, token],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    let (version, next_page_token, exhausted, fetched_at) = match page_info {
      Some(info) => info,
      None => return Ok(None),
    };

    if version != SCHEMA_VERSION {
      warn!(%key, token, version, "Ignoring cached page written by another schema version");
      return Ok(None);
    }

    let Some(fetched_at) = from_micros(fetched_at) else {
      warn!(%key, token, fetched_at, "Ignoring cached page with unreadable timestamp");
      return Ok(None);
    };

    // Get records in delivered order
    let mut stmt = conn.prepare(
      "SELECT r.schema_version, r.data FROM cache_page_records pr
       LEFT JOIN cache_records r
         ON r.entity_type = pr.entity_type AND r.entity_id = pr.entity_id
         AND r.query_kind = pr.query_kind AND r.record_id = pr.record_id
       WHERE pr.entity_type = ? AND pr.entity_id = ? AND pr.query_kind = ? AND pr.page_token = ?
       ORDER BY pr.position",
    )?;

    let rows: Vec<(Option<i64>, Option<Vec<u8>>)> = stmt
      .query_map(params![entity_type, entity_id, kind, token], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })?
      .collect::<std::result::Result<_, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    for (version, data) in rows {
      let record = match (version, data) {
        (Some(SCHEMA_VERSION), Some(data)) => decode(&data),
        _ => None,
      };
      match record {
        Some(record) => records.push(record),
        None => {
          warn!(%key, token, "Ignoring cached page with missing or unreadable records");
          return Ok(None);
        }
      }
    }

    Ok(Some(CacheEntry {
      key: *key,
      page_token: page_token.cloned(),
      page: Page {
        records,
        next_page_token: next_page_token.map(PageToken),
        exhausted,
      },
      fetched_at,
    }))
  }

  fn store_page(
    &self,
    key: &QueryKey,
    page_token: Option<&PageToken>,
    page: &Page,
    fetched_at: DateTime<Utc>,
  ) -> Result<()> {
    let mut conn = self.db.conn();
    let entity_type = key.entity_type.as_str();
    let entity_id = key.entity_id as i64;
    let kind = key.kind.as_str();
    let token = token_column(page_token);

    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM cache_page_records
       WHERE entity_type = ? AND entity_id = ? AND query_kind = ? AND page_token = ?",
      params![entity_type, entity_id, kind, token],
    )?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_pages
       (entity_type, entity_id, query_kind, page_token, schema_version, next_page_token, exhausted, fetched_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        entity_type,
        entity_id,
        kind,
        token,
        SCHEMA_VERSION,
        page.next_page_token.as_ref().map(PageToken::as_str),
        page.exhausted,
        micros(fetched_at),
      ],
    )?;

    for (position, record) in page.records.iter().enumerate() {
      let record_id = record.id as i64;

      // Readable records of the current version are kept as first cached.
      let existing: Option<(i64, Vec<u8>)> = tx
        .query_row(
          "SELECT schema_version, data FROM cache_records
           WHERE entity_type = ? AND entity_id = ? AND query_kind = ? AND record_id = ?",
          params![entity_type, entity_id, kind, record_id],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
      let readable = matches!(
        &existing,
        Some((version, data)) if *version == SCHEMA_VERSION && decode(data).is_some()
      );

      if !readable {
        if existing.is_some() {
          debug!(%key, record_id, "Replacing unreadable cached record");
        }
        tx.execute(
          "INSERT OR REPLACE INTO cache_records
           (entity_type, entity_id, query_kind, record_id, schema_version, data)
           VALUES (?, ?, ?, ?, ?, ?)",
          params![entity_type, entity_id, kind, record_id, SCHEMA_VERSION, serde_json::to_vec(record)?],
        )?;
      }

      tx.execute(
        "INSERT INTO cache_page_records
         (entity_type, entity_id, query_kind, page_token, position, record_id)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![entity_type, entity_id, kind, token, position as i64, record_id],
      )?;
    }

    // Records no page of this collection points at any more
    tx.execute(
      "DELETE FROM cache_records
       WHERE entity_type = ?1 AND entity_id = ?2 AND query_kind = ?3
         AND NOT EXISTS (
           SELECT 1 FROM cache_page_records pr
           WHERE pr.entity_type = ?1 AND pr.entity_id = ?2 AND pr.query_kind = ?3
             AND pr.record_id = cache_records.record_id)",
      params![entity_type, entity_id, kind],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn invalidate(&self, key: &QueryKey) -> Result<usize> {
    let mut conn = self.db.conn();
    let entity_type = key.entity_type.as_str();
    let entity_id = key.entity_id as i64;
    let kind = key.kind.as_str();

    let tx = conn.transaction()?;
    let removed = tx.execute(
      "DELETE FROM cache_pages WHERE entity_type = ? AND entity_id = ? AND query_kind = ?",
      params![entity_type, entity_id, kind],
    )?;
    tx.execute(
      "DELETE FROM cache_page_records WHERE entity_type = ? AND entity_id = ? AND query_kind = ?",
      params![entity_type, entity_id, kind],
    )?;
    tx.execute(
      "DELETE FROM cache_records WHERE entity_type = ? AND entity_id = ? AND query_kind = ?",
      params![entity_type, entity_id, kind],
    )?;
    tx.commit()?;

    Ok(removed)
  }

  fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut conn = self.db.conn();
    let tx = conn.transaction()?;

    let removed = tx.execute(
      "DELETE FROM cache_pages WHERE fetched_at < ? OR schema_version != ?",
      params![micros(cutoff), SCHEMA_VERSION],
    )?;

    tx.execute(
      "DELETE FROM cache_page_records WHERE NOT EXISTS (
         SELECT 1 FROM cache_pages p
         WHERE p.entity_type = cache_page_records.entity_type
           AND p.entity_id = cache_page_records.entity_id
           AND p.query_kind = cache_page_records.query_kind
           AND p.page_token = cache_page_records.page_token)",
      [],
    )?;

    tx.execute(
      "DELETE FROM cache_records WHERE schema_version != ? OR NOT EXISTS (
         SELECT 1 FROM cache_page_records pr
         WHERE pr.entity_type = cache_records.entity_type
           AND pr.entity_id = cache_records.entity_id
           AND pr.query_kind = cache_records.query_kind
           AND pr.record_id = cache_records.record_id)",
      params![SCHEMA_VERSION],
    )?;

    tx.commit()?;
    Ok(removed)
  }
}

#[cfg(test)]
impl SqliteStorage {
  /// Overwrite every cached record payload with `data`.
  pub(crate) fn overwrite_record_data(&self, data: &[u8]) {
    self
      .db
      .conn()
      .execute("UPDATE cache_records SET data = ?", params![data])
      .unwrap();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{QueryKind, UserId};
  use chrono::Duration;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn timeline() -> QueryKey {
    QueryKey::user(UserId(7), QueryKind::Timeline)
  }

  #[test]
  fn test_missing_page_returns_none() {
    let storage = storage();
    assert!(storage.get_page(&timeline(), None).unwrap().is_none());
  }

  #[test]
  fn test_page_preserves_record_order_and_continuation() {
    let storage = storage();
    let page = Page::with_next(
      vec![
        Record::post(30, UserId(1), "newest"),
        Record::post(20, UserId(2), "middle"),
        Record::post(10, UserId(1), "oldest"),
      ],
      PageToken::new("9"),
    );
    storage.store_page(&timeline(), None, &page, Utc::now()).unwrap();

    let entry = storage.get_page(&timeline(), None).unwrap().unwrap();
    let ids: Vec<u64> = entry.page.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![30, 20, 10]);
    assert_eq!(entry.page.next_page_token, Some(PageToken::new("9")));
    assert!(!entry.page.exhausted);
  }

  #[test]
  fn test_pages_are_keyed_by_token() {
    let storage = storage();
    let token = PageToken::new("p2");
    storage
      .store_page(&timeline(), None, &Page::with_next(vec![Record::post(2, UserId(1), "a")], token.clone()), Utc::now())
      .unwrap();
    storage
      .store_page(&timeline(), Some(&token), &Page::last(vec![Record::post(1, UserId(1), "b")]), Utc::now())
      .unwrap();

    let second = storage.get_page(&timeline(), Some(&token)).unwrap().unwrap();
    assert_eq!(second.page.records[0].id, 1);
    assert!(second.page.exhausted);
  }

  #[test]
  fn test_refresh_overwrites_page_but_not_records() {
    let storage = storage();
    let first = Page::last(vec![Record::post(1, UserId(1), "original")]);
    storage.store_page(&timeline(), None, &first, Utc::now()).unwrap();

    let refreshed = Page::last(vec![
      Record::post(2, UserId(1), "new"),
      Record::post(1, UserId(1), "edited"),
    ]);
    storage.store_page(&timeline(), None, &refreshed, Utc::now()).unwrap();

    let entry = storage.get_page(&timeline(), None).unwrap().unwrap();
    assert_eq!(entry.page.records.len(), 2);
    assert_eq!(entry.page.records[0].text(), Some("new"));
    assert_eq!(entry.page.records[1].text(), Some("original"));
  }

  #[test]
  fn test_other_schema_version_reads_as_absent() {
    let storage = storage();
    storage
      .store_page(&timeline(), None, &Page::last(vec![Record::post(1, UserId(1), "x")]), Utc::now())
      .unwrap();
    storage
      .db
      .conn()
      .execute("UPDATE cache_pages SET schema_version = 0", [])
      .unwrap();

    assert!(storage.get_page(&timeline(), None).unwrap().is_none());
  }

  #[test]
  fn test_unreadable_record_reads_as_absent() {
    let storage = storage();
    storage
      .store_page(&timeline(), None, &Page::last(vec![Record::post(1, UserId(1), "x")]), Utc::now())
      .unwrap();
    storage
      .db
      .conn()
      .execute("UPDATE cache_records SET data = x'7b7d'", [])
      .unwrap();

    assert!(storage.get_page(&timeline(), None).unwrap().is_none());
  }

  #[test]
  fn test_refetch_replaces_unreadable_record() {
    let storage = storage();
    let page = Page::last(vec![Record::post(1, UserId(1), "x")]);
    storage.store_page(&timeline(), None, &page, Utc::now()).unwrap();
    storage
      .db
      .conn()
      .execute("UPDATE cache_records SET data = x'7b7d'", [])
      .unwrap();
    assert!(storage.get_page(&timeline(), None).unwrap().is_none());

    storage.store_page(&timeline(), None, &page, Utc::now()).unwrap();
    let entry = storage.get_page(&timeline(), None).unwrap().unwrap();
    assert_eq!(entry.page.records[0].text(), Some("x"));
  }

  #[test]
  fn test_refetch_replaces_record_from_other_version() {
    let storage = storage();
    let page = Page::last(vec![Record::post(1, UserId(1), "x")]);
    storage.store_page(&timeline(), None, &page, Utc::now()).unwrap();
    storage
      .db
      .conn()
      .execute("UPDATE cache_records SET schema_version = 0", [])
      .unwrap();
    assert!(storage.get_page(&timeline(), None).unwrap().is_none());

    storage.store_page(&timeline(), None, &page, Utc::now()).unwrap();
    assert!(storage.get_page(&timeline(), None).unwrap().is_some());
  }

  #[test]
  fn test_refresh_drops_records_no_page_refers_to() {
    let storage = storage();
    let friends = QueryKey::user(UserId(7), QueryKind::Friends);
    let token = PageToken::new("p2");
    storage
      .store_page(&timeline(), None, &Page::with_next(vec![Record::post(1, UserId(1), "a"), Record::post(2, UserId(1), "b")], token.clone()), Utc::now())
      .unwrap();
    storage
      .store_page(&timeline(), Some(&token), &Page::last(vec![Record::post(5, UserId(1), "e")]), Utc::now())
      .unwrap();
    storage
      .store_page(&friends, None, &Page::last(vec![Record::relationship(UserId(7), UserId(2))]), Utc::now())
      .unwrap();

    storage
      .store_page(&timeline(), None, &Page::with_next(vec![Record::post(2, UserId(1), "b"), Record::post(3, UserId(1), "c")], token), Utc::now())
      .unwrap();

    let conn = storage.db.conn();
    let mut stmt = conn
      .prepare("SELECT query_kind, record_id FROM cache_records ORDER BY query_kind, record_id")
      .unwrap();
    let rows: Vec<(String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .unwrap()
      .collect::<std::result::Result<_, _>>()
      .unwrap();
    assert_eq!(
      rows,
      vec![
        ("friends".to_string(), 2),
        ("timeline".to_string(), 2),
        ("timeline".to_string(), 3),
        ("timeline".to_string(), 5),
      ]
    );
  }

  #[test]
  fn test_invalidate_removes_only_the_prefix() {
    let storage = storage();
    let friends = QueryKey::user(UserId(7), QueryKind::Friends);
    let token = PageToken::new("p2");
    storage
      .store_page(&timeline(), None, &Page::with_next(vec![], token.clone()), Utc::now())
      .unwrap();
    storage
      .store_page(&timeline(), Some(&token), &Page::last(vec![]), Utc::now())
      .unwrap();
    storage
      .store_page(&friends, None, &Page::last(vec![Record::relationship(UserId(7), UserId(3))]), Utc::now())
      .unwrap();

    assert_eq!(storage.invalidate(&timeline()).unwrap(), 2);
    assert!(storage.get_page(&timeline(), None).unwrap().is_none());
    assert!(storage.get_page(&friends, None).unwrap().is_some());
  }

  #[test]
  fn test_sweep_removes_old_pages_and_orphaned_records() {
    let storage = storage();
    let favorites = QueryKey::user(UserId(7), QueryKind::Favorites);
    let old = Utc::now() - Duration::days(10);
    storage
      .store_page(&timeline(), None, &Page::last(vec![Record::post(1, UserId(1), "old")]), old)
      .unwrap();
    storage
      .store_page(&favorites, None, &Page::last(vec![Record::post(2, UserId(1), "new")]), Utc::now())
      .unwrap();

    let removed = storage.sweep(Utc::now() - Duration::days(1)).unwrap();
    assert_eq!(removed, 1);
    assert!(storage.get_page(&timeline(), None).unwrap().is_none());
    assert!(storage.get_page(&favorites, None).unwrap().is_some());

    let records: i64 = storage
      .db
      .conn()
      .query_row("SELECT COUNT(*) FROM cache_records", [], |row| row.get(0))
      .unwrap();
    assert_eq!(records, 1);
  }

  #[test]
  fn test_pages_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let fetched_at = Utc::now();

    {
      let storage = SqliteStorage::new(Arc::new(Database::open_at(&path).unwrap()));
      storage
        .store_page(&timeline(), None, &Page::last(vec![Record::post(1, UserId(1), "kept")]), fetched_at)
        .unwrap();
    }

    let storage = SqliteStorage::new(Arc::new(Database::open_at(&path).unwrap()));
    let entry = storage.get_page(&timeline(), None).unwrap().unwrap();
    assert_eq!(entry.page.records[0].text(), Some("kept"));
    assert_eq!(entry.fetched_at.timestamp_micros(), fetched_at.timestamp_micros());
  }
}
