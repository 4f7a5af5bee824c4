//! Stats Aggregator and the persisted counters in the `stats` table

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::database::{Database, DatabaseResult};
use crate::interface::Stats;
use crate::models::{format_timestamp, parse_timestamp};
use crate::schema::stat_keys;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Increment an integer counter, creating it when missing.
/// Takes a connection so it can run inside the caller's transaction.
pub(crate) fn bump_counter(conn: &Connection, key: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO stats (key, int_value) VALUES (?1, 1)
         ON CONFLICT(key) DO UPDATE SET int_value = COALESCE(int_value, 0) + 1",
        [key],
    )?;
    Ok(())
}

fn set_text(conn: &Connection, key: &str, value: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO stats (key, text_value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET text_value = excluded.text_value",
        [key, value],
    )?;
    Ok(())
}

fn int_stat(conn: &Connection, key: &str) -> DatabaseResult<u64> {
    let value: Option<Option<i64>> = conn
        .query_row("SELECT int_value FROM stats WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value.flatten().unwrap_or(0).max(0) as u64)
}

fn text_stat(conn: &Connection, key: &str) -> DatabaseResult<Option<String>> {
    let value: Option<Option<String>> = conn
        .query_row("SELECT text_value FROM stats WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value.flatten())
}

/// Megabytes rounded to 2 decimals
pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

impl Database {
    pub(crate) fn record_paste(&self) -> DatabaseResult<()> {
        self.with_conn(|conn| bump_counter(conn, stat_keys::PASTE_COUNT))
    }

    pub(crate) fn record_cleanup_time(&self) -> DatabaseResult<()> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| set_text(conn, stat_keys::LAST_CLEANUP_TIMESTAMP, &now))
    }

    /// Read-only aggregate over clips and the stats table
    pub(crate) fn get_stats(&self) -> DatabaseResult<Stats> {
        let database_size = self.database_size()?;
        self.with_conn(|conn| {
            let (total_clips, pinned_clips, total_bytes): (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_pinned), 0), COALESCE(SUM(size_bytes), 0) FROM clips",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            Ok(Stats {
                total_clips: total_clips.max(0) as u64,
                pinned_clips: pinned_clips.max(0) as u64,
                total_bytes: total_bytes.max(0) as u64,
                paste_count: int_stat(conn, stat_keys::PASTE_COUNT)?,
                total_clips_ever: int_stat(conn, stat_keys::TOTAL_CLIPS_EVER)?,
                database_size_mb: bytes_to_mb(database_size),
                created_at: text_stat(conn, stat_keys::CREATION_TIMESTAMP)?
                    .as_deref()
                    .and_then(parse_timestamp),
                last_cleanup_at: text_stat(conn, stat_keys::LAST_CLEANUP_TIMESTAMP)?
                    .as_deref()
                    .and_then(parse_timestamp),
            })
        })
    }
}
