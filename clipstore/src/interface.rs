//! Clip Store public interface
//!
//! Records, the error type and the async service trait consumed by collaborators
//! (clipboard monitor, UI, classifier). This file is the source of truth for shared types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::clip_types;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// One captured clipboard entry, full content included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: i64,
    pub content: String,
    pub content_hash: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    pub clip_type: String,
    pub source_app: Option<String>,
    pub is_pinned: bool,
    pub was_trimmed: bool,
    pub size_bytes: i64,
}

/// Lightweight projection for list rendering (no full content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipPreview {
    pub id: i64,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    pub clip_type: String,
    pub source_app: Option<String>,
    pub is_pinned: bool,
    pub was_trimmed: bool,
    pub size_bytes: i64,
}

impl From<&Clip> for ClipPreview {
    fn from(clip: &Clip) -> Self {
        Self {
            id: clip.id,
            preview: clip.preview.clone(),
            timestamp: clip.timestamp,
            clip_type: clip.clip_type.clone(),
            source_app: clip.source_app.clone(),
            is_pinned: clip.is_pinned,
            was_trimmed: clip.was_trimmed,
            size_bytes: clip.size_bytes,
        }
    }
}

/// Result filter for browse and search
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchFilter {
    #[default]
    All,
    Pinned,
    /// `link` plus link-valued file variants
    Link,
    /// Exact clip type tag
    Type(String),
}

impl SearchFilter {
    /// Map a filter string from the UI: "all", "pinned", "link", or any clip type tag.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "all" => SearchFilter::All,
            "pinned" => SearchFilter::Pinned,
            clip_types::LINK => SearchFilter::Link,
            other => SearchFilter::Type(other.to_string()),
        }
    }
}

/// One row of a browse or search page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub clip: ClipPreview,
    /// Match tier: 0 literal phrase, 1 index match, 2 substring fallback. `None` when browsing.
    pub rank: Option<u8>,
    /// Excerpt with `<mark>` markers around the match. `None` when browsing.
    pub snippet: Option<String>,
}

/// Summary counters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_clips: u64,
    pub pinned_clips: u64,
    pub total_bytes: u64,
    pub paste_count: u64,
    pub total_clips_ever: u64,
    /// Size of the database file in MB, rounded to 2 decimals
    pub database_size_mb: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub last_cleanup_at: Option<DateTime<Utc>>,
}

/// Outcome of a compaction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactionReport {
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
    /// False when the file rewrite was skipped because the file stayed locked
    pub reclaimed: bool,
}

/// Per-policy counts from a configured maintenance pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub removed_by_age: u64,
    pub removed_by_count: u64,
    pub removed_oversized: u64,
    pub removed_orphans: u64,
    pub compaction: Option<CompactionReport>,
}

impl MaintenanceReport {
    pub fn total_removed(&self) -> u64 {
        self.removed_by_age + self.removed_by_count + self.removed_oversized + self.removed_orphans
    }
}

/// Error type for Clip Store operations
#[derive(Debug, Error)]
pub enum ClipStoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Clip {0} not found")]
    NotFound(i64),
    #[error("Content already stored as clip {existing_id}")]
    DuplicateContent { existing_id: i64 },
    #[error("IO error: {0}")]
    Io(String),
    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),
    #[error("Store not initialized")]
    NotInitialized,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ClipStoreResult<T> = Result<T, ClipStoreError>;

impl From<crate::database::DatabaseError> for ClipStoreError {
    fn from(e: crate::database::DatabaseError) -> Self {
        use crate::database::DatabaseError;
        match e {
            DatabaseError::NotFound(id) => ClipStoreError::NotFound(id),
            DatabaseError::DuplicateContent { existing_id } => {
                ClipStoreError::DuplicateContent { existing_id }
            }
            DatabaseError::Io(err) => ClipStoreError::Io(err.to_string()),
            DatabaseError::Migration { .. } => ClipStoreError::MigrationFailed(e.to_string()),
            DatabaseError::InvalidInput(msg) => ClipStoreError::InvalidInput(msg),
            other => ClipStoreError::DatabaseError(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ClipStoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClipStoreError::Internal(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The contract collaborators use to reach the Clip Store.
/// Implemented by [`crate::ClipStore`].
#[async_trait::async_trait]
pub trait ClipStoreApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Create or upgrade the schema. Must succeed before any other call.
    async fn initialize(&self) -> ClipStoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Browse (empty term) or ranked search. A cancelled search yields an empty page.
    async fn search(
        &self,
        limit: u32,
        offset: u32,
        term: String,
        filter: SearchFilter,
        cancel: CancellationToken,
    ) -> ClipStoreResult<Vec<SearchHit>>;

    async fn get(&self, id: i64) -> ClipStoreResult<Option<Clip>>;

    async fn get_preview(&self, id: i64) -> ClipStoreResult<Option<ClipPreview>>;

    /// Lazily enumerate clips that reference files or folders
    fn stream_file_based_clips(&self) -> BoxStream<'static, ClipStoreResult<Clip>>;

    /// Lazily enumerate distinct image locations
    fn stream_image_paths(&self) -> BoxStream<'static, ClipStoreResult<String>>;

    /// Lazily enumerate distinct link URLs
    fn stream_link_urls(&self) -> BoxStream<'static, ClipStoreResult<String>>;

    async fn get_stats(&self) -> ClipStoreResult<Stats>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Store content, or refresh the existing clip with the same content. Returns the clip id.
    async fn add(
        &self,
        content: String,
        clip_type: String,
        source_app: Option<String>,
        was_trimmed: bool,
    ) -> ClipStoreResult<i64>;

    async fn update_content(&self, id: i64, content: String) -> ClipStoreResult<()>;

    async fn set_pinned(&self, id: i64, pinned: bool) -> ClipStoreResult<()>;

    /// Move a clip to the top of the history
    async fn touch(&self, id: i64) -> ClipStoreResult<()>;

    /// Retag clips in one transaction; all or nothing
    async fn bulk_update_types(&self, updates: HashMap<i64, String>) -> ClipStoreResult<()>;

    async fn record_paste(&self) -> ClipStoreResult<()>;

    async fn record_cleanup_time(&self) -> ClipStoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Delete Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn delete(&self, id: i64) -> ClipStoreResult<()>;

    async fn clear_unpinned(&self) -> ClipStoreResult<u64>;

    async fn clear_all(&self) -> ClipStoreResult<u64>;

    /// Age and count eviction. Returns the number of clips removed.
    async fn run_retention(
        &self,
        max_age_days: u32,
        max_total: u32,
        force_compact: bool,
    ) -> ClipStoreResult<u64>;

    async fn remove_orphans(&self) -> ClipStoreResult<u64>;

    async fn remove_oversized(&self, max_mb: f64) -> ClipStoreResult<u64>;

    async fn compact(&self) -> ClipStoreResult<CompactionReport>;
}
