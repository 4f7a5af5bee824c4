//! Schema creation and upgrades
//!
//! The schema version lives in `PRAGMA user_version`. Each step runs in its own
//! transaction together with the version bump, so a failed step leaves the store at
//! the previous version with no partial DDL applied.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::database::{DatabaseError, DatabaseResult};
use crate::models::{format_timestamp, DerivedColumns};

pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Rows processed per backfill round when upgrading existing clips
const BACKFILL_BATCH: i64 = 500;

pub(crate) mod stat_keys {
    pub const PASTE_COUNT: &str = "paste_count";
    pub const TOTAL_CLIPS_EVER: &str = "total_clips_ever";
    pub const CREATION_TIMESTAMP: &str = "creation_timestamp";
    pub const LAST_CLEANUP_TIMESTAMP: &str = "last_cleanup_timestamp";
}

type MigrationStep = fn(&Transaction) -> rusqlite::Result<()>;

/// Ordered upgrade steps; index `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: [MigrationStep; CURRENT_SCHEMA_VERSION as usize] = [
    create_base_tables,
    add_preview_and_size,
    add_was_trimmed,
    create_fulltext_index,
];

/// Outcome of [`initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaReport {
    pub previous_version: u32,
    pub current_version: u32,
}

impl SchemaReport {
    pub fn upgraded(&self) -> bool {
        self.previous_version != self.current_version
    }
}

/// Bring the store up to [`CURRENT_SCHEMA_VERSION`] and seed missing stats rows.
/// Idempotent: a store already at the current version only gets its stats checked.
pub fn initialize(conn: &Connection) -> DatabaseResult<SchemaReport> {
    let previous_version = schema_version(conn)?;
    if previous_version > CURRENT_SCHEMA_VERSION {
        return Err(DatabaseError::Migration {
            version: previous_version,
            message: format!(
                "store was written by a newer schema (version {}, supported {})",
                previous_version, CURRENT_SCHEMA_VERSION
            ),
        });
    }

    for version in previous_version..CURRENT_SCHEMA_VERSION {
        let target = version + 1;
        apply_step(conn, target, MIGRATIONS[version as usize]).map_err(|e| {
            DatabaseError::Migration {
                version: target,
                message: e.to_string(),
            }
        })?;
        info!(version = target, "applied schema migration");
    }

    seed_stats(conn).map_err(|e| DatabaseError::Migration {
        version: CURRENT_SCHEMA_VERSION,
        message: e.to_string(),
    })?;

    debug!(previous_version, "schema ready");
    Ok(SchemaReport {
        previous_version,
        current_version: CURRENT_SCHEMA_VERSION,
    })
}

pub fn schema_version(conn: &Connection) -> DatabaseResult<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version.max(0) as u32)
}

fn apply_step(conn: &Connection, target: u32, step: MigrationStep) -> rusqlite::Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    step(&tx)?;
    // user_version is part of the database header, so the bump commits with the step
    tx.execute_batch(&format!("PRAGMA user_version = {}", target))?;
    tx.commit()
}

/// Insert any missing stats rows: counters start at 0, timestamps at now.
fn seed_stats(conn: &Connection) -> rusqlite::Result<()> {
    let now = format_timestamp(Utc::now());
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    for key in [stat_keys::PASTE_COUNT, stat_keys::TOTAL_CLIPS_EVER] {
        tx.execute(
            "INSERT OR IGNORE INTO stats (key, int_value) VALUES (?1, 0)",
            [key],
        )?;
    }
    for key in [stat_keys::CREATION_TIMESTAMP, stat_keys::LAST_CLEANUP_TIMESTAMP] {
        tx.execute(
            "INSERT OR IGNORE INTO stats (key, text_value) VALUES (?1, ?2)",
            params![key, now],
        )?;
    }
    tx.commit()
}

fn has_column(tx: &Transaction, table: &str, column: &str) -> bool {
    tx.prepare(&format!("SELECT {} FROM {} LIMIT 0", column, table))
        .is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// STEPS
// ─────────────────────────────────────────────────────────────────────────────

/// v1: clips + stats
fn create_base_tables(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS clips (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            clip_type TEXT NOT NULL DEFAULT 'text',
            source_app TEXT,
            is_pinned INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS stats (
            key TEXT PRIMARY KEY,
            int_value INTEGER,
            text_value TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_clips_timestamp ON clips(timestamp);
        CREATE INDEX IF NOT EXISTS idx_clips_hash ON clips(content_hash);
    "#,
    )
}

/// v2: stored preview and byte size, backfilled for existing rows
fn add_preview_and_size(tx: &Transaction) -> rusqlite::Result<()> {
    if !has_column(tx, "clips", "preview") {
        tx.execute_batch("ALTER TABLE clips ADD COLUMN preview TEXT")?;
    }
    if !has_column(tx, "clips", "size_bytes") {
        tx.execute_batch("ALTER TABLE clips ADD COLUMN size_bytes INTEGER NOT NULL DEFAULT 0")?;
    }

    let mut select =
        tx.prepare("SELECT id, content FROM clips WHERE preview IS NULL ORDER BY id LIMIT ?1")?;
    let mut update =
        tx.prepare("UPDATE clips SET preview = ?1, size_bytes = ?2, content_hash = ?3 WHERE id = ?4")?;
    loop {
        let batch: Vec<(i64, String)> = select
            .query_map([BACKFILL_BATCH], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        if batch.is_empty() {
            break;
        }
        for (id, content) in &batch {
            let derived = DerivedColumns::from_content(content);
            update.execute(params![
                derived.preview,
                derived.size_bytes,
                derived.content_hash,
                id
            ])?;
        }
    }
    Ok(())
}

/// v3: capture-time truncation flag
fn add_was_trimmed(tx: &Transaction) -> rusqlite::Result<()> {
    if !has_column(tx, "clips", "was_trimmed") {
        tx.execute_batch("ALTER TABLE clips ADD COLUMN was_trimmed INTEGER NOT NULL DEFAULT 0")?;
    }
    Ok(())
}

/// v4: FTS5 shadow index over content with sync triggers
fn create_fulltext_index(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS clips_fts USING fts5(
            content,
            content='clips',
            content_rowid='id',
            tokenize='unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS clips_fts_ai AFTER INSERT ON clips BEGIN
            INSERT INTO clips_fts(rowid, content) VALUES (new.id, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS clips_fts_ad AFTER DELETE ON clips BEGIN
            INSERT INTO clips_fts(clips_fts, rowid, content) VALUES ('delete', old.id, old.content);
        END;

        CREATE TRIGGER IF NOT EXISTS clips_fts_au AFTER UPDATE OF content ON clips BEGIN
            INSERT INTO clips_fts(clips_fts, rowid, content) VALUES ('delete', old.id, old.content);
            INSERT INTO clips_fts(rowid, content) VALUES (new.id, new.content);
        END;

        INSERT INTO clips_fts(clips_fts) VALUES ('rebuild');
    "#,
    )
}
