/// Version stamped on every cached page and record. Rows written under
/// another version are ignored on read and replaced on the next fetch.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema for cache, watchlist and annotation tables.
pub const SCHEMA: &str = r#"
-- One row per cached page
CREATE TABLE IF NOT EXISTS cache_pages (
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    query_kind TEXT NOT NULL,
    page_token TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    next_page_token TEXT,
    exhausted INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (entity_type, entity_id, query_kind, page_token)
);

CREATE INDEX IF NOT EXISTS idx_cache_pages_fetched
    ON cache_pages(fetched_at);

-- Records, rewritten only when unreadable or from another schema version
CREATE TABLE IF NOT EXISTS cache_records (
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    query_kind TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    schema_version INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (entity_type, entity_id, query_kind, record_id)
);

-- Page to record mapping (preserves delivered order)
CREATE TABLE IF NOT EXISTS cache_page_records (
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    query_kind TEXT NOT NULL,
    page_token TEXT NOT NULL,
    position INTEGER NOT NULL,
    record_id INTEGER NOT NULL,
    PRIMARY KEY (entity_type, entity_id, query_kind, page_token, position)
);

CREATE TABLE IF NOT EXISTS watchlists (
    name TEXT PRIMARY KEY,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS watchlist_users (
    watchlist TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (watchlist, user_id),
    FOREIGN KEY (watchlist) REFERENCES watchlists(name) ON DELETE CASCADE
);

-- Accounts imported from a remote list; excluded rows survive refreshes
CREATE TABLE IF NOT EXISTS watchlist_sublists (
    watchlist TEXT NOT NULL,
    list_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (watchlist, list_id)
);

CREATE TABLE IF NOT EXISTS watchlist_sublist_users (
    watchlist TEXT NOT NULL,
    list_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    member INTEGER NOT NULL,
    excluded INTEGER NOT NULL,
    PRIMARY KEY (watchlist, list_id, user_id)
);

CREATE TABLE IF NOT EXISTS watchlist_words (
    watchlist TEXT NOT NULL,
    word TEXT NOT NULL,
    PRIMARY KEY (watchlist, word),
    FOREIGN KEY (watchlist) REFERENCES watchlists(name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_notes (
    note_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS post_notes (
    note_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    post_kind TEXT NOT NULL,
    post_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_notes_post
    ON post_notes(user_id, post_kind, post_id);

-- Tag texts are shared by every user and post kind
CREATE TABLE IF NOT EXISTS tags (
    tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS post_tags (
    user_id INTEGER NOT NULL,
    post_kind TEXT NOT NULL,
    post_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, post_kind, post_id, tag_id)
);
"#;
