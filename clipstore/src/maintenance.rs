//! Maintenance Engine: retention policies, orphan sweep and compaction
//!
//! Age, count and size policies spare pinned clips; the orphan sweep does not.
//! All of them are plain deletes through the pooled handle, so the FTS triggers
//! keep the shadow index in step.
//!
//! Compaction closes every pooled connection before rewriting the file: under WAL an
//! idle pooled handle is enough to keep VACUUM from getting exclusive access.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::database::{Database, DatabaseError, DatabaseResult, Location};
use crate::interface::CompactionReport;
use crate::models::{format_timestamp, FILE_BASED_PREDICATE};

/// Rows examined per orphan scan batch
pub const ORPHAN_BATCH_SIZE: usize = 500;

/// Wait before the single compaction retry, giving the OS time to release file handles
const COMPACTION_RETRY_DELAY: Duration = Duration::from_millis(250);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Byte ceiling for a size policy in MB. Zero, negative or non-finite disables it.
pub(crate) fn size_ceiling_bytes(max_mb: f64) -> Option<i64> {
    if max_mb.is_finite() && max_mb > 0.0 {
        Some((max_mb * BYTES_PER_MB) as i64)
    } else {
        None
    }
}

/// Log a failed policy and count it as removing nothing
pub(crate) fn degrade(policy: &str, result: DatabaseResult<usize>) -> u64 {
    match result {
        Ok(removed) => removed as u64,
        Err(e) => {
            warn!(policy, error = %e, "retention policy failed");
            0
        }
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Rewrite the file through a dedicated connection and truncate the WAL.
/// A checkpoint held back by another reader is reported as busy: until it
/// completes the rewritten pages live only in the WAL.
fn vacuum_file(path: &Path, busy_timeout: Duration) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("VACUUM")?;
    let blocked: i64 = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
    if blocked != 0 {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("wal checkpoint blocked by an open reader".to_string()),
        ));
    }
    Ok(())
}

/// Ids whose referenced path no longer exists. A failed check counts as existing.
fn missing_targets(refs: &[(i64, String)]) -> Vec<i64> {
    refs.par_iter()
        .filter_map(|(id, content)| {
            let path = Path::new(content.trim());
            match path.try_exists() {
                Ok(true) => None,
                Ok(false) => Some(*id),
                Err(e) => {
                    warn!(clip_id = id, path = %path.display(), error = %e, "existence check failed; keeping clip");
                    None
                }
            }
        })
        .collect()
}

impl Database {
    // ─────────────────────────────────────────────────────────────────────────────
    // Retention policies
    // ─────────────────────────────────────────────────────────────────────────────

    /// Delete unpinned clips last touched before `cutoff`
    pub(crate) fn evict_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<usize> {
        let cutoff = format_timestamp(cutoff);
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM clips WHERE is_pinned = 0 AND timestamp < ?1",
                [cutoff],
            )?)
        })
    }

    /// Delete the oldest unpinned clips beyond `max_total`
    pub(crate) fn evict_excess(&self, max_total: u32) -> DatabaseResult<usize> {
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let unpinned: i64 =
                tx.query_row("SELECT COUNT(*) FROM clips WHERE is_pinned = 0", [], |row| row.get(0))?;
            let excess = unpinned - i64::from(max_total);
            if excess <= 0 {
                return Ok(0);
            }
            let removed = tx.execute(
                "DELETE FROM clips WHERE id IN (
                    SELECT id FROM clips WHERE is_pinned = 0
                    ORDER BY timestamp ASC, id ASC LIMIT ?1
                )",
                [excess],
            )?;
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Delete unpinned clips larger than `max_bytes`
    pub(crate) fn evict_oversized(&self, max_bytes: i64) -> DatabaseResult<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM clips WHERE is_pinned = 0 AND size_bytes > ?1",
                [max_bytes],
            )?)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orphan sweep
    // ─────────────────────────────────────────────────────────────────────────────

    /// `(id, content)` of file-based clips with `id > after_id`
    fn fetch_file_refs(&self, after_id: i64, limit: usize) -> DatabaseResult<Vec<(i64, String)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, content FROM clips WHERE id > ?1 AND {} ORDER BY id LIMIT ?2",
                FILE_BASED_PREDICATE
            );
            let mut stmt = conn.prepare(&sql)?;
            let refs = stmt
                .query_map(rusqlite::params![after_id, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(refs)
        })
    }

    /// Remove file and folder clips whose target is gone.
    ///
    /// Scans in keyset batches. Existence checks run in parallel on the rayon pool with
    /// no connection held. Each batch's deletions commit in one transaction; a failed
    /// batch stops the sweep and the count so far is returned.
    pub(crate) fn sweep_orphans(&self, batch_size: usize) -> u64 {
        let batch_size = batch_size.max(1);
        let mut after_id = 0;
        let mut removed = 0u64;

        loop {
            let refs = match self.fetch_file_refs(after_id, batch_size) {
                Ok(refs) => refs,
                Err(e) => {
                    error!(after_id, error = %e, "orphan scan aborted");
                    break;
                }
            };
            let Some(&(last_id, _)) = refs.last() else {
                break;
            };
            after_id = last_id;

            let missing = missing_targets(&refs);
            if !missing.is_empty() {
                match self.delete_clips(&missing) {
                    Ok(n) => removed += n as u64,
                    Err(e) => {
                        error!(batch = missing.len(), error = %e, "orphan batch delete failed; stopping sweep");
                        break;
                    }
                }
            }
            if refs.len() < batch_size {
                break;
            }
        }

        debug!(removed, "orphan sweep finished");
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Compaction
    // ─────────────────────────────────────────────────────────────────────────────

    /// Merge FTS segments, then rewrite the file with every pooled handle closed.
    ///
    /// Contention during the rewrite is retried once; if it persists the report says
    /// `reclaimed: false` and the store stays usable uncompacted.
    pub(crate) fn compact_storage(&self) -> DatabaseResult<CompactionReport> {
        let size_before_bytes = self.database_size()?;

        self.with_conn(|conn| {
            conn.execute_batch("INSERT INTO clips_fts(clips_fts) VALUES('optimize')")?;
            Ok(())
        })?;

        let reclaimed = {
            let mut slot = self.exclusive();
            match self.location() {
                Location::Memory => {
                    let pool = slot.as_ref().ok_or(DatabaseError::Closed)?;
                    pool.get()?.execute_batch("VACUUM")?;
                    true
                }
                Location::File(path) => {
                    // Close every pooled handle before the rewrite
                    drop(slot.take());

                    let settings = self.settings();
                    let mut outcome = vacuum_file(path, settings.busy_timeout);
                    if matches!(&outcome, Err(e) if is_contention(e)) {
                        debug!("compaction contended; retrying once");
                        std::thread::sleep(COMPACTION_RETRY_DELAY);
                        outcome = vacuum_file(path, settings.busy_timeout);
                    }

                    match Database::build_pool(self.location(), settings) {
                        Ok(pool) => *slot = Some(pool),
                        Err(e) => {
                            error!(error = %e, "failed to reopen connection pool after compaction");
                            return Err(e);
                        }
                    }

                    match outcome {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, "compaction skipped; database left uncompacted");
                            false
                        }
                    }
                }
            }
        };

        let size_after_bytes = self.database_size()?;
        info!(
            size_before_bytes,
            size_after_bytes,
            reclaimed,
            "compaction finished"
        );
        Ok(CompactionReport {
            size_before_bytes,
            size_after_bytes,
            reclaimed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::clip_types;

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

    fn set_timestamp(db: &Database, id: i64, timestamp: DateTime<Utc>) {
        db.update_timestamp(id, timestamp).unwrap();
    }

    fn count(db: &Database, sql: &str) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_size_ceiling() {
        assert_eq!(size_ceiling_bytes(1.0), Some(1_048_576));
        assert_eq!(size_ceiling_bytes(0.5), Some(524_288));
        assert_eq!(size_ceiling_bytes(0.0), None);
        assert_eq!(size_ceiling_bytes(-3.0), None);
        assert_eq!(size_ceiling_bytes(f64::NAN), None);
    }

    #[test]
    fn test_age_eviction_spares_pinned() {
        let db = open();
        let now = Utc::now();
        let old = add(&db, "old");
        let old_pinned = add(&db, "old pinned");
        let fresh = add(&db, "fresh");
        set_timestamp(&db, old, now - chrono::Duration::days(40));
        set_timestamp(&db, old_pinned, now - chrono::Duration::days(40));
        db.set_pinned(old_pinned, true).unwrap();

        let removed = db.evict_older_than(now - chrono::Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(db.fetch_clip(old).unwrap().is_none());
        assert!(db.fetch_clip(old_pinned).unwrap().is_some());
        assert!(db.fetch_clip(fresh).unwrap().is_some());
    }

    #[test]
    fn test_count_eviction_removes_oldest_excess() {
        let db = open();
        let base = Utc::now() - chrono::Duration::hours(1);
        let mut unpinned = Vec::new();
        for i in 0..6 {
            let id = add(&db, &format!("clip {}", i));
            set_timestamp(&db, id, base + chrono::Duration::seconds(i));
            unpinned.push(id);
        }
        let pinned = add(&db, "pinned");
        set_timestamp(&db, pinned, base - chrono::Duration::days(1));
        db.set_pinned(pinned, true).unwrap();

        assert_eq!(db.evict_excess(4).unwrap(), 2);
        assert!(db.fetch_clip(unpinned[0]).unwrap().is_none());
        assert!(db.fetch_clip(unpinned[1]).unwrap().is_none());
        for id in &unpinned[2..] {
            assert!(db.fetch_clip(*id).unwrap().is_some());
        }
        assert!(db.fetch_clip(pinned).unwrap().is_some());

        assert_eq!(db.evict_excess(4).unwrap(), 0);
    }

    #[test]
    fn test_oversized_eviction() {
        let db = open();
        let big = add(&db, &"x".repeat(2048));
        let big_pinned = add(&db, &"y".repeat(2048));
        let small = add(&db, "tiny");
        db.set_pinned(big_pinned, true).unwrap();

        assert_eq!(db.evict_oversized(1024).unwrap(), 1);
        assert!(db.fetch_clip(big).unwrap().is_none());
        assert!(db.fetch_clip(big_pinned).unwrap().is_some());
        assert!(db.fetch_clip(small).unwrap().is_some());
    }

    #[test]
    fn test_sweep_orphans_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let db = open();

        let mut kept = Vec::new();
        let mut gone = Vec::new();
        for i in 0..7 {
            let path = dir.path().join(format!("f{}.txt", i));
            std::fs::write(&path, "x").unwrap();
            let content = format!("  {}\n", path.display());
            let id = db
                .insert_or_touch(&content, clip_types::FILE, None, false)
                .unwrap()
                .id();
            if i % 2 == 0 {
                std::fs::remove_file(&path).unwrap();
                gone.push(id);
            } else {
                kept.push(id);
            }
        }
        let folder = db
            .insert_or_touch(&dir.path().display().to_string(), clip_types::FOLDER, None, false)
            .unwrap()
            .id();
        let text = add(&db, "/definitely/not/a/real/path");

        assert_eq!(db.sweep_orphans(3), gone.len() as u64);
        for id in gone {
            assert!(db.fetch_clip(id).unwrap().is_none());
        }
        for id in kept {
            assert!(db.fetch_clip(id).unwrap().is_some());
        }
        assert!(db.fetch_clip(folder).unwrap().is_some());
        assert!(db.fetch_clip(text).unwrap().is_some());
    }

    #[test]
    fn test_compact_in_memory_keeps_data_and_index() {
        let db = open();
        for i in 0..50 {
            add(&db, &format!("compaction payload {} {}", i, "z".repeat(500)));
        }
        db.clear(false).unwrap();
        let keep = add(&db, "survivor");

        let report = db.compact_storage().unwrap();
        assert!(report.reclaimed);
        assert!(report.size_after_bytes <= report.size_before_bytes);
        assert!(db.fetch_clip(keep).unwrap().is_some());
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM clips_fts WHERE clips_fts MATCH 'survivor'"),
            1
        );
    }

    #[test]
    fn test_compact_file_reopens_pool() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("clips.sqlite")).unwrap();
        db.initialize_schema().unwrap();
        for i in 0..200 {
            add(&db, &format!("{} {}", i, "payload ".repeat(200)));
        }
        db.clear(true).unwrap();

        let report = db.compact_storage().unwrap();
        assert!(report.reclaimed);
        assert!(report.size_after_bytes < report.size_before_bytes);

        let id = add(&db, "after compaction");
        assert_eq!(db.fetch_clip(id).unwrap().unwrap().content, "after compaction");
    }

    #[test]
    fn test_vacuum_reports_reader_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.sqlite");
        let db = Database::open(&path).unwrap();
        db.initialize_schema().unwrap();
        add(&db, "held by a reader");
        drop(db);

        let reader = Connection::open(&path).unwrap();
        reader.execute_batch("BEGIN").unwrap();
        let _: i64 = reader
            .query_row("SELECT COUNT(*) FROM clips", [], |row| row.get(0))
            .unwrap();

        let err = vacuum_file(&path, Duration::from_millis(20)).unwrap_err();
        assert!(is_contention(&err));

        reader.execute_batch("COMMIT").unwrap();
        assert!(vacuum_file(&path, Duration::from_millis(20)).is_ok());
    }
}
