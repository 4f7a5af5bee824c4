//! SQLite database layer for clip storage
//!
//! Single `clips` table + `stats` key/value table + FTS5 shadow index (see `schema`).
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.
//!
//! The pool sits behind an RwLock: every unit of work holds a shared lease for its
//! duration, and compaction takes the exclusive side to close all pooled handles
//! before rewriting the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockWriteGuard};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::interface::{Clip, ClipPreview};
use crate::models::{
    format_timestamp, parse_db_timestamp, type_list_predicate, DerivedColumns,
    FILE_BASED_PREDICATE,
};
use crate::schema::{self, stat_keys, SchemaReport};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration to schema version {version} failed: {message}")]
    Migration { version: u32, message: String },
    #[error("Content already stored as clip {existing_id}")]
    DuplicateContent { existing_id: i64 },
    #[error("Clip {0} not found")]
    NotFound(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Connection pool is closed")]
    Closed,
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub(crate) type SqlitePool = Pool<SqliteConnectionManager>;

/// Columns read by [`Database::row_to_clip`], in order
pub(crate) const CLIP_COLUMNS: &str = "id, content, content_hash, preview, timestamp, clip_type, source_app, is_pinned, was_trimmed, size_bytes";

/// Columns read by [`Database::row_to_preview`], in order
pub(crate) const PREVIEW_COLUMNS: &str =
    "id, preview, timestamp, clip_type, source_app, is_pinned, was_trimmed, size_bytes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    File(PathBuf),
    Memory,
}

/// Pool tuning shared by the initial pool and every rebuild after compaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub(crate) max_size: u32,
    pub(crate) busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Whether `add` created a row or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insertion {
    Inserted(i64),
    Deduplicated(i64),
}

impl Insertion {
    pub(crate) fn id(self) -> i64 {
        match self {
            Insertion::Inserted(id) | Insertion::Deduplicated(id) => id,
        }
    }
}

/// Thread-safe database wrapper using connection pooling
///
/// WAL mode lets search readers proceed while a writer commits.
pub struct Database {
    pool: RwLock<Option<SqlitePool>>,
    location: Location,
    settings: PoolSettings,
}

impl Database {
    /// Open or create a database file. The schema is not touched until
    /// [`Database::initialize_schema`] runs.
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        Self::open_with(path, PoolSettings::default())
    }

    pub(crate) fn open_with<P: AsRef<Path>>(path: P, settings: PoolSettings) -> DatabaseResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let location = Location::File(path);
        let pool = Self::build_pool(&location, settings)?;
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            location,
            settings,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let location = Location::Memory;
        let settings = PoolSettings::default();
        let pool = Self::build_pool(&location, settings)?;
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            location,
            settings,
        })
    }

    pub(crate) fn build_pool(location: &Location, settings: PoolSettings) -> DatabaseResult<SqlitePool> {
        let busy_timeout = settings.busy_timeout;
        let manager = match location {
            Location::File(path) => SqliteConnectionManager::file(path),
            Location::Memory => SqliteConnectionManager::memory(),
        }
        .with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA temp_store=MEMORY;
                PRAGMA cache_size=-32000;
            ",
            )?;
            Ok(())
        });

        let pool = match location {
            // In-memory needs a single connection that is never recycled to keep its state
            Location::Memory => Pool::builder()
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .build(manager)?,
            Location::File(_) => Pool::builder()
                .max_size(settings.max_size.max(1))
                .build(manager)?,
        };
        Ok(pool)
    }

    pub(crate) fn location(&self) -> &Location {
        &self.location
    }

    pub(crate) fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Run `f` on a pooled connection while holding a shared lease on the pool.
    /// Must not be nested: a queued compaction would deadlock the inner lease.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> DatabaseResult<T>,
    ) -> DatabaseResult<T> {
        let lease = self.pool.read();
        let pool = lease.as_ref().ok_or(DatabaseError::Closed)?;
        let conn = pool.get()?;
        f(&conn)
    }

    /// Exclusive access to the pool slot. Waits for every in-flight lease to finish.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, Option<SqlitePool>> {
        self.pool.write()
    }

    /// Create or upgrade the schema
    pub fn initialize_schema(&self) -> DatabaseResult<SchemaReport> {
        self.with_conn(schema::initialize)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Insert new content, or refresh timestamp and source of the clip already holding it.
    /// Lookup and insert share one IMMEDIATE transaction so concurrent adds cannot both insert.
    pub(crate) fn insert_or_touch(
        &self,
        content: &str,
        clip_type: &str,
        source_app: Option<&str>,
        was_trimmed: bool,
    ) -> DatabaseResult<Insertion> {
        let derived = DerivedColumns::from_content(content);
        let now = format_timestamp(Utc::now());

        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

            if let Some(id) = Self::find_by_hash(&tx, &derived.content_hash, None)? {
                tx.execute(
                    "UPDATE clips SET timestamp = ?1, source_app = ?2 WHERE id = ?3",
                    params![now, source_app, id],
                )?;
                tx.commit()?;
                return Ok(Insertion::Deduplicated(id));
            }

            tx.execute(
                r#"INSERT INTO clips (content, content_hash, preview, timestamp, clip_type, source_app, is_pinned, was_trimmed, size_bytes)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)"#,
                params![
                    content,
                    derived.content_hash,
                    derived.preview,
                    now,
                    clip_type,
                    source_app,
                    was_trimmed,
                    derived.size_bytes,
                ],
            )
            .map_err(|e| Self::duplicate_or(e, &tx, &derived.content_hash))?;
            let id = tx.last_insert_rowid();
            crate::stats::bump_counter(&tx, stat_keys::TOTAL_CLIPS_EVER)?;
            tx.commit()?;
            Ok(Insertion::Inserted(id))
        })
    }

    /// Replace content and recompute hash, preview and size. The timestamp is kept.
    pub(crate) fn update_content(&self, id: i64, content: &str) -> DatabaseResult<()> {
        let derived = DerivedColumns::from_content(content);
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let exists = tx
                .query_row("SELECT 1 FROM clips WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(DatabaseError::NotFound(id));
            }
            if let Some(existing_id) = Self::find_by_hash(&tx, &derived.content_hash, Some(id))? {
                return Err(DatabaseError::DuplicateContent { existing_id });
            }
            tx.execute(
                "UPDATE clips SET content = ?1, content_hash = ?2, preview = ?3, size_bytes = ?4 WHERE id = ?5",
                params![content, derived.content_hash, derived.preview, derived.size_bytes, id],
            )
            .map_err(|e| Self::duplicate_or(e, &tx, &derived.content_hash))?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Update the timestamp of an existing clip
    pub(crate) fn update_timestamp(&self, id: i64, timestamp: DateTime<Utc>) -> DatabaseResult<()> {
        let timestamp_str = format_timestamp(timestamp);
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE clips SET timestamp = ?1 WHERE id = ?2",
                params![timestamp_str, id],
            )?)
        })?;
        Self::expect_row(changed, id)
    }

    pub(crate) fn set_pinned(&self, id: i64, pinned: bool) -> DatabaseResult<()> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE clips SET is_pinned = ?1 WHERE id = ?2",
                params![pinned, id],
            )?)
        })?;
        Self::expect_row(changed, id)
    }

    /// Retag clips atomically. Any unknown id or empty tag rolls back the whole batch.
    pub(crate) fn update_clip_types(&self, updates: &HashMap<i64, String>) -> DatabaseResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare("UPDATE clips SET clip_type = ?1 WHERE id = ?2")?;
                for (id, clip_type) in updates {
                    if clip_type.trim().is_empty() {
                        return Err(DatabaseError::InvalidInput(format!(
                            "empty clip type for clip {}",
                            id
                        )));
                    }
                    if stmt.execute(params![clip_type, id])? == 0 {
                        return Err(DatabaseError::NotFound(*id));
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete a clip by ID. Returns false when nothing matched.
    pub(crate) fn delete_clip(&self, id: i64) -> DatabaseResult<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM clips WHERE id = ?1", [id])? > 0))
    }

    /// Delete clips by ID in one transaction
    pub(crate) fn delete_clips(&self, ids: &[i64]) -> DatabaseResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM clips WHERE id = ?1")?;
                for id in ids {
                    removed += stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Delete every clip, or every unpinned clip
    pub(crate) fn clear(&self, include_pinned: bool) -> DatabaseResult<usize> {
        let sql = if include_pinned {
            "DELETE FROM clips"
        } else {
            "DELETE FROM clips WHERE is_pinned = 0"
        };
        self.with_conn(|conn| Ok(conn.execute(sql, [])?))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    pub(crate) fn fetch_clip(&self, id: i64) -> DatabaseResult<Option<Clip>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM clips WHERE id = ?1", CLIP_COLUMNS),
                    [id],
                    Self::row_to_clip,
                )
                .optional()?)
        })
    }

    pub(crate) fn fetch_preview(&self, id: i64) -> DatabaseResult<Option<ClipPreview>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM clips WHERE id = ?1", PREVIEW_COLUMNS),
                    [id],
                    Self::row_to_preview,
                )
                .optional()?)
        })
    }

    /// One keyset page of file/folder clips with `id > after_id`
    pub(crate) fn fetch_file_based_page(&self, after_id: i64, limit: usize) -> DatabaseResult<Vec<Clip>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM clips WHERE id > ?1 AND {} ORDER BY id LIMIT ?2",
                CLIP_COLUMNS, FILE_BASED_PREDICATE
            );
            let mut stmt = conn.prepare(&sql)?;
            let clips = stmt
                .query_map(params![after_id, limit as i64], Self::row_to_clip)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(clips)
        })
    }

    /// One keyset page of distinct content values for the given type tags, ordered by value
    pub(crate) fn fetch_distinct_content_page(
        &self,
        types: &[&str],
        after: Option<&str>,
        limit: usize,
    ) -> DatabaseResult<Vec<String>> {
        let predicate = type_list_predicate(types);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT DISTINCT content FROM clips WHERE {} AND (?1 IS NULL OR content > ?1) ORDER BY content LIMIT ?2",
                predicate
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = stmt
                .query_map(params![after, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(values)
        })
    }

    /// Get the database size in bytes: the main file plus its WAL sidecar on disk,
    /// or the page total in memory
    pub fn database_size(&self) -> DatabaseResult<u64> {
        fn file_len(path: &Path) -> DatabaseResult<u64> {
            match std::fs::metadata(path) {
                Ok(meta) => Ok(meta.len()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        match &self.location {
            Location::File(path) => {
                let mut wal = path.as_os_str().to_owned();
                wal.push("-wal");
                Ok(file_len(path)? + file_len(Path::new(&wal))?)
            }
            Location::Memory => self.with_conn(|conn| {
                let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
                let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
                Ok((page_count * page_size).max(0) as u64)
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────────

    /// Find the clip holding `hash`, optionally ignoring one id
    fn find_by_hash(conn: &Connection, hash: &str, except: Option<i64>) -> DatabaseResult<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT id FROM clips WHERE content_hash = ?1 AND (?2 IS NULL OR id != ?2) LIMIT 1",
                params![hash, except],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Surface a constraint violation on the hash path as `DuplicateContent`
    fn duplicate_or(err: rusqlite::Error, conn: &Connection, hash: &str) -> DatabaseError {
        let is_constraint = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        );
        if is_constraint {
            if let Ok(Some(existing_id)) = Self::find_by_hash(conn, hash, None) {
                return DatabaseError::DuplicateContent { existing_id };
            }
        }
        err.into()
    }

    fn expect_row(changed: usize, id: i64) -> DatabaseResult<()> {
        if changed == 0 {
            Err(DatabaseError::NotFound(id))
        } else {
            Ok(())
        }
    }

    /// Convert a row selected with [`CLIP_COLUMNS`]
    pub(crate) fn row_to_clip(row: &rusqlite::Row) -> rusqlite::Result<Clip> {
        let timestamp: String = row.get(4)?;
        Ok(Clip {
            id: row.get(0)?,
            content: row.get(1)?,
            content_hash: row.get(2)?,
            preview: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            timestamp: parse_db_timestamp(&timestamp),
            clip_type: row.get(5)?,
            source_app: row.get(6)?,
            is_pinned: row.get(7)?,
            was_trimmed: row.get(8)?,
            size_bytes: row.get(9)?,
        })
    }

    /// Convert a row selected with [`PREVIEW_COLUMNS`]
    pub(crate) fn row_to_preview(row: &rusqlite::Row) -> rusqlite::Result<ClipPreview> {
        let timestamp: String = row.get(2)?;
        Ok(ClipPreview {
            id: row.get(0)?,
            preview: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            timestamp: parse_db_timestamp(&timestamp),
            clip_type: row.get(3)?,
            source_app: row.get(4)?,
            is_pinned: row.get(5)?,
            was_trimmed: row.get(6)?,
            size_bytes: row.get(7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{clip_types, PREVIEW_MAX_BYTES};

    fn open() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize_schema().unwrap();
        db
    }

    fn add(db: &Database, content: &str) -> i64 {
        db.insert_or_touch(content, clip_types::TEXT, None, false)
            .unwrap()
            .id()
    }

    fn row_count(db: &Database) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM clips", [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_insert_and_fetch_roundtrip() {
        let db = open();
        let content = "line one\nline two\t\u{1F600} \0 trailing";
        let insertion = db
            .insert_or_touch(content, clip_types::CODE, Some("Editor"), true)
            .unwrap();
        assert!(matches!(insertion, Insertion::Inserted(_)));

        let clip = db.fetch_clip(insertion.id()).unwrap().unwrap();
        assert_eq!(clip.content.as_bytes(), content.as_bytes());
        assert_eq!(clip.clip_type, clip_types::CODE);
        assert_eq!(clip.source_app.as_deref(), Some("Editor"));
        assert!(clip.was_trimmed);
        assert!(!clip.is_pinned);
        assert_eq!(clip.size_bytes, content.len() as i64);
        assert_eq!(clip.preview, content);
    }

    #[test]
    fn test_duplicate_content_refreshes_existing_row() {
        let db = open();
        let first = db
            .insert_or_touch("same content", clip_types::TEXT, Some("A"), false)
            .unwrap();
        let before = db.fetch_clip(first.id()).unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(2));
        let second = db
            .insert_or_touch("same content", clip_types::TEXT, Some("B"), false)
            .unwrap();
        assert_eq!(second, Insertion::Deduplicated(first.id()));
        assert_eq!(row_count(&db), 1);

        let after = db.fetch_clip(first.id()).unwrap().unwrap();
        assert!(after.timestamp > before.timestamp);
        assert_eq!(after.source_app.as_deref(), Some("B"));
        assert_eq!(after.preview, before.preview);
    }

    #[test]
    fn test_long_content_gets_truncated_preview() {
        let db = open();
        let content = "x".repeat(PREVIEW_MAX_BYTES * 2);
        let id = add(&db, &content);
        let preview = db.fetch_preview(id).unwrap().unwrap();
        assert_eq!(preview.preview.len(), PREVIEW_MAX_BYTES);
        assert_eq!(preview.size_bytes, content.len() as i64);
    }

    #[test]
    fn test_update_content_recomputes_derived_columns() {
        let db = open();
        let id = add(&db, "short");
        let before = db.fetch_clip(id).unwrap().unwrap();

        db.update_content(id, "a much longer replacement").unwrap();
        let after = db.fetch_clip(id).unwrap().unwrap();
        assert_eq!(after.content, "a much longer replacement");
        assert_eq!(after.size_bytes, 25);
        assert_eq!(after.preview, "a much longer replacement");
        assert_ne!(after.content_hash, before.content_hash);
        assert_eq!(after.timestamp, before.timestamp);
    }

    #[test]
    fn test_update_content_to_existing_content_is_duplicate() {
        let db = open();
        let first = add(&db, "first");
        let second = add(&db, "second");
        let err = db.update_content(second, "first").unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateContent { existing_id } if existing_id == first));
        assert_eq!(db.fetch_clip(second).unwrap().unwrap().content, "second");
    }

    #[test]
    fn test_missing_rows_report_not_found() {
        let db = open();
        assert!(db.fetch_clip(42).unwrap().is_none());
        assert!(db.fetch_preview(42).unwrap().is_none());
        assert!(matches!(db.update_content(42, "x"), Err(DatabaseError::NotFound(42))));
        assert!(matches!(db.set_pinned(42, true), Err(DatabaseError::NotFound(42))));
        assert!(matches!(
            db.update_timestamp(42, Utc::now()),
            Err(DatabaseError::NotFound(42))
        ));
        assert!(!db.delete_clip(42).unwrap());
    }

    #[test]
    fn test_bulk_type_update_is_all_or_nothing() {
        let db = open();
        let a = add(&db, "a");
        let b = add(&db, "b");

        let mut updates = HashMap::new();
        updates.insert(a, clip_types::CODE.to_string());
        updates.insert(b, clip_types::CODE.to_string());
        updates.insert(9999, clip_types::CODE.to_string());
        assert!(matches!(
            db.update_clip_types(&updates),
            Err(DatabaseError::NotFound(9999))
        ));
        assert_eq!(db.fetch_clip(a).unwrap().unwrap().clip_type, clip_types::TEXT);
        assert_eq!(db.fetch_clip(b).unwrap().unwrap().clip_type, clip_types::TEXT);

        updates.remove(&9999);
        db.update_clip_types(&updates).unwrap();
        assert_eq!(db.fetch_clip(a).unwrap().unwrap().clip_type, clip_types::CODE);
        assert_eq!(db.fetch_clip(b).unwrap().unwrap().clip_type, clip_types::CODE);
    }

    #[test]
    fn test_bulk_type_update_rejects_empty_tag() {
        let db = open();
        let a = add(&db, "a");
        let b = add(&db, "b");
        let mut updates = HashMap::new();
        updates.insert(a, clip_types::LINK.to_string());
        updates.insert(b, "  ".to_string());
        assert!(matches!(
            db.update_clip_types(&updates),
            Err(DatabaseError::InvalidInput(_))
        ));
        assert_eq!(db.fetch_clip(a).unwrap().unwrap().clip_type, clip_types::TEXT);
    }

    #[test]
    fn test_clear_keeps_pinned_unless_asked() {
        let db = open();
        let pinned = add(&db, "keep me");
        add(&db, "drop me");
        add(&db, "drop me too");
        db.set_pinned(pinned, true).unwrap();

        assert_eq!(db.clear(false).unwrap(), 2);
        assert_eq!(row_count(&db), 1);
        assert_eq!(db.clear(true).unwrap(), 1);
        assert_eq!(row_count(&db), 0);
    }

    #[test]
    fn test_file_based_pages_use_keyset() {
        let db = open();
        let mut file_ids = Vec::new();
        for i in 0..5 {
            file_ids.push(
                db.insert_or_touch(&format!("/tmp/file-{}", i), clip_types::FILE, None, false)
                    .unwrap()
                    .id(),
            );
            add(&db, &format!("text {}", i));
        }
        file_ids.push(
            db.insert_or_touch("/tmp/dir", clip_types::FOLDER, None, false)
                .unwrap()
                .id(),
        );

        let first = db.fetch_file_based_page(0, 4).unwrap();
        assert_eq!(first.len(), 4);
        let rest = db.fetch_file_based_page(first[3].id, 4).unwrap();
        assert_eq!(rest.len(), 2);
        let seen: Vec<i64> = first.iter().chain(rest.iter()).map(|c| c.id).collect();
        assert_eq!(seen, file_ids);
    }

    #[test]
    fn test_distinct_content_pages() {
        let db = open();
        db.insert_or_touch("https://b.example", clip_types::LINK, None, false).unwrap();
        db.insert_or_touch("https://a.example", clip_types::LINK, None, false).unwrap();
        db.insert_or_touch("/links/c.url", clip_types::FILE_LINK, None, false).unwrap();
        db.insert_or_touch("plain", clip_types::TEXT, None, false).unwrap();

        let first = db
            .fetch_distinct_content_page(clip_types::LINK_TYPES, None, 2)
            .unwrap();
        assert_eq!(first, vec!["/links/c.url", "https://a.example"]);
        let rest = db
            .fetch_distinct_content_page(clip_types::LINK_TYPES, Some(&first[1]), 2)
            .unwrap();
        assert_eq!(rest, vec!["https://b.example"]);
    }

    #[test]
    fn test_in_memory_size_is_nonzero() {
        let db = open();
        assert!(db.database_size().unwrap() > 0);
    }
}
