//! ClipStore - async facade over the storage engine
//!
//! Every operation clones the `Arc<Database>` and runs its blocking SQLite work on
//! tokio's blocking pool. Outside of any runtime a process-wide fallback runtime is used.
//!
//! Async Cancellation Architecture:
//! A search derives a child of the caller's CancellationToken and arms a DropGuard on it,
//! so dropping the search future cancels it too. The blocking search thread turns the
//! token into a SQLite interrupt and also checks it between rows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Once};

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::database::{Database, DatabaseResult, Insertion, PoolSettings};
use crate::interface::{
    Clip, ClipPreview, ClipStoreApi, ClipStoreError, ClipStoreResult, CompactionReport,
    MaintenanceReport, SearchFilter, SearchHit, Stats,
};
use crate::maintenance::{degrade, size_ceiling_bytes};
use crate::models::clip_types;
use crate::search::SearchQuery;

/// Rows fetched per page by the streaming enumerations
pub const STREAM_PAGE_SIZE: usize = 100;

/// Global fallback Tokio runtime for when async functions are called outside any runtime context.
/// Shared across all ClipStore instances and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Initialize the global Rayon pool used by orphan existence checks
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        // Reserve 2 cores for Tokio to ensure responsiveness, but use at least 1 thread.
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("clipstore-rayon-{}", i))
            .build_global();
    });
}

/// RAII guard that cancels a token when dropped.
/// Dropping a search future drops this guard, which cancels the in-flight query.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone)]
enum InitState {
    Pending,
    Ready,
    Failed(String),
}

/// Oldest timestamp age retention keeps. `None` when the window reaches past
/// the representable calendar, in which case nothing is old enough to evict.
fn age_cutoff(max_age_days: u32) -> Option<chrono::DateTime<Utc>> {
    Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(max_age_days)))
}

/// Thread-safe clip store
///
/// Concurrency Model:
/// - Database uses an r2d2 pool in WAL mode (readers never wait on writers)
/// - Search is async with cancellation support via CancellationToken
/// - Blocking work runs on tokio::spawn_blocking threads
/// - Compaction is serialized and takes exclusive access to the pool
pub struct ClipStore {
    db: Arc<Database>,
    state: RwLock<InitState>,
    init_lock: tokio::sync::Mutex<()>,
    compaction_lock: tokio::sync::Mutex<()>,
    config: StoreConfig,
}

impl ClipStore {
    /// Open (or create) the database described by `config`.
    /// [`ClipStoreApi::initialize`] must complete before any other call.
    pub fn open(config: &StoreConfig) -> ClipStoreResult<Self> {
        let settings = PoolSettings {
            max_size: config.pool_size,
            busy_timeout: config.busy_timeout(),
        };
        let database = Database::open_with(&config.db_path, settings)?;
        Ok(Self::with_database(database, config.clone()))
    }

    /// Open the database at `path` with default settings
    pub fn new(path: impl AsRef<Path>) -> ClipStoreResult<Self> {
        Self::open(&StoreConfig::with_path(path.as_ref()))
    }

    /// Create a store with an in-memory database (tests, benchmarks)
    pub fn new_in_memory() -> ClipStoreResult<Self> {
        let database = Database::open_in_memory()?;
        Ok(Self::with_database(database, StoreConfig::default()))
    }

    fn with_database(database: Database, config: StoreConfig) -> Self {
        Self {
            db: Arc::new(database),
            state: RwLock::new(InitState::Pending),
            init_lock: tokio::sync::Mutex::new(()),
            compaction_lock: tokio::sync::Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get a tokio runtime handle - uses current runtime if available, otherwise global fallback
    fn runtime_handle(&self) -> tokio::runtime::Handle {
        tokio::runtime::Handle::try_current()
            .unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
    }

    fn ensure_ready(&self) -> ClipStoreResult<()> {
        match &*self.state.read() {
            InitState::Ready => Ok(()),
            InitState::Pending => Err(ClipStoreError::NotInitialized),
            InitState::Failed(message) => Err(ClipStoreError::MigrationFailed(message.clone())),
        }
    }

    /// Run storage work on the blocking pool once the store is ready
    async fn blocking<T, F>(&self, work: F) -> ClipStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DatabaseResult<T> + Send + 'static,
    {
        self.ensure_ready()?;
        let db = Arc::clone(&self.db);
        let result = self
            .runtime_handle()
            .spawn_blocking(move || work(&db))
            .await?;
        Ok(result?)
    }

    /// Lazy keyset-paged stream. `fetch` returns one page and the cursor for the next,
    /// or `None` when the page was the last one.
    fn paged_stream<T, C, F>(&self, first: C, fetch: F) -> BoxStream<'static, ClipStoreResult<T>>
    where
        T: Send + 'static,
        C: Send + 'static,
        F: Fn(&Database, C) -> DatabaseResult<(Vec<T>, Option<C>)> + Send + Sync + 'static,
    {
        if let Err(e) = self.ensure_ready() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let db = Arc::clone(&self.db);
        let runtime = self.runtime_handle();
        let fetch = Arc::new(fetch);

        stream::unfold(Some(first), move |cursor| {
            let db = Arc::clone(&db);
            let runtime = runtime.clone();
            let fetch = Arc::clone(&fetch);
            async move {
                let cursor = cursor?;
                let page: Vec<ClipStoreResult<T>> =
                    match runtime.spawn_blocking(move || fetch(&db, cursor)).await {
                        Ok(Ok((rows, _))) if rows.is_empty() => return None,
                        Ok(Ok((rows, next))) => {
                            return Some((rows.into_iter().map(Ok).collect(), next))
                        }
                        Ok(Err(e)) => vec![Err(e.into())],
                        Err(e) => vec![Err(e.into())],
                    };
                // A failed page ends the stream after yielding the error
                Some((page, None))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    fn distinct_values_stream(&self, types: &'static [&'static str]) -> BoxStream<'static, ClipStoreResult<String>> {
        self.paged_stream(None::<String>, move |db, after: Option<String>| {
            let page = db.fetch_distinct_content_page(types, after.as_deref(), STREAM_PAGE_SIZE)?;
            let next = if page.len() == STREAM_PAGE_SIZE {
                page.last().cloned().map(Some)
            } else {
                None
            };
            Ok((page, next))
        })
    }

    /// Compact under the store-wide compaction lock
    async fn compact_serialized(&self) -> ClipStoreResult<CompactionReport> {
        let _serial = self.compaction_lock.lock().await;
        self.blocking(|db| db.compact_storage()).await
    }

    /// Compaction as a maintenance step: failures are logged, not returned
    async fn compact_after_cleanup(&self) -> Option<CompactionReport> {
        match self.compact_serialized().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "compaction after cleanup failed");
                None
            }
        }
    }

    /// Apply the configured [`crate::RetentionPolicy`], record the cleanup time,
    /// and compact once if anything was removed.
    pub async fn run_maintenance(&self) -> ClipStoreResult<MaintenanceReport> {
        let policy = self.config.retention.clone();
        let batch_size = self.config.orphan_batch_size;
        if policy.remove_orphans {
            init_rayon();
        }

        let mut report = self
            .blocking(move |db| {
                let mut report = MaintenanceReport::default();
                if policy.max_age_days > 0 {
                    if let Some(cutoff) = age_cutoff(policy.max_age_days) {
                        report.removed_by_age = degrade("age", db.evict_older_than(cutoff));
                    }
                }
                if policy.max_total > 0 {
                    report.removed_by_count = degrade("count", db.evict_excess(policy.max_total));
                }
                if let Some(max_bytes) = size_ceiling_bytes(policy.max_item_mb) {
                    report.removed_oversized = degrade("oversized", db.evict_oversized(max_bytes));
                }
                if policy.remove_orphans {
                    report.removed_orphans = db.sweep_orphans(batch_size);
                }
                if let Err(e) = db.record_cleanup_time() {
                    warn!(error = %e, "failed to record cleanup time");
                }
                Ok(report)
            })
            .await?;

        if report.total_removed() > 0 {
            report.compaction = self.compact_after_cleanup().await;
        }
        info!(
            removed_by_age = report.removed_by_age,
            removed_by_count = report.removed_by_count,
            removed_oversized = report.removed_oversized,
            removed_orphans = report.removed_orphans,
            "maintenance finished"
        );
        Ok(report)
    }
}

#[async_trait::async_trait]
impl ClipStoreApi for ClipStore {
    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    async fn initialize(&self) -> ClipStoreResult<()> {
        let _init = self.init_lock.lock().await;
        let current = self.state.read().clone();
        match current {
            InitState::Ready => return Ok(()),
            InitState::Failed(message) => return Err(ClipStoreError::MigrationFailed(message)),
            InitState::Pending => {}
        }

        let db = Arc::clone(&self.db);
        let result = self
            .runtime_handle()
            .spawn_blocking(move || db.initialize_schema())
            .await?;

        match result {
            Ok(report) => {
                if report.upgraded() {
                    info!(
                        from = report.previous_version,
                        to = report.current_version,
                        "schema upgraded"
                    );
                }
                *self.state.write() = InitState::Ready;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "schema initialization failed; store disabled");
                *self.state.write() = InitState::Failed(message.clone());
                Err(ClipStoreError::MigrationFailed(message))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn search(
        &self,
        limit: u32,
        offset: u32,
        term: String,
        filter: SearchFilter,
        cancel: CancellationToken,
    ) -> ClipStoreResult<Vec<SearchHit>> {
        self.ensure_ready()?;

        // Create cancellation token and guard
        let token = cancel.child_token();
        let _guard = DropGuard::new(token.clone());

        let runtime = self.runtime_handle();
        let runtime_for_closure = runtime.clone();
        let db = Arc::clone(&self.db);
        let token_clone = token.clone();
        let query = SearchQuery {
            limit,
            offset,
            term,
            filter,
        };

        let handle = runtime
            .spawn_blocking(move || db.search(&query, &token_clone, &runtime_for_closure));

        let hits = handle.await??;
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        Ok(hits)
    }

    async fn get(&self, id: i64) -> ClipStoreResult<Option<Clip>> {
        self.blocking(move |db| db.fetch_clip(id)).await
    }

    async fn get_preview(&self, id: i64) -> ClipStoreResult<Option<ClipPreview>> {
        self.blocking(move |db| db.fetch_preview(id)).await
    }

    fn stream_file_based_clips(&self) -> BoxStream<'static, ClipStoreResult<Clip>> {
        self.paged_stream(0i64, |db, after_id| {
            let page = db.fetch_file_based_page(after_id, STREAM_PAGE_SIZE)?;
            let next = if page.len() == STREAM_PAGE_SIZE {
                page.last().map(|clip| clip.id)
            } else {
                None
            };
            Ok((page, next))
        })
    }

    fn stream_image_paths(&self) -> BoxStream<'static, ClipStoreResult<String>> {
        self.distinct_values_stream(clip_types::IMAGE_TYPES)
    }

    fn stream_link_urls(&self) -> BoxStream<'static, ClipStoreResult<String>> {
        self.distinct_values_stream(clip_types::LINK_TYPES)
    }

    async fn get_stats(&self) -> ClipStoreResult<Stats> {
        self.blocking(|db| db.get_stats()).await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn add(
        &self,
        content: String,
        clip_type: String,
        source_app: Option<String>,
        was_trimmed: bool,
    ) -> ClipStoreResult<i64> {
        if clip_type.trim().is_empty() {
            return Err(ClipStoreError::InvalidInput("clip type must not be empty".into()));
        }
        let insertion = self
            .blocking(move |db| {
                db.insert_or_touch(&content, &clip_type, source_app.as_deref(), was_trimmed)
            })
            .await?;
        if let Insertion::Deduplicated(id) = insertion {
            debug!(clip_id = id, "duplicate content; refreshed existing clip");
        }
        Ok(insertion.id())
    }

    async fn update_content(&self, id: i64, content: String) -> ClipStoreResult<()> {
        self.blocking(move |db| db.update_content(id, &content)).await
    }

    async fn set_pinned(&self, id: i64, pinned: bool) -> ClipStoreResult<()> {
        self.blocking(move |db| db.set_pinned(id, pinned)).await
    }

    async fn touch(&self, id: i64) -> ClipStoreResult<()> {
        self.blocking(move |db| db.update_timestamp(id, Utc::now())).await
    }

    async fn bulk_update_types(&self, updates: HashMap<i64, String>) -> ClipStoreResult<()> {
        self.blocking(move |db| db.update_clip_types(&updates)).await
    }

    async fn record_paste(&self) -> ClipStoreResult<()> {
        self.blocking(|db| db.record_paste()).await
    }

    async fn record_cleanup_time(&self) -> ClipStoreResult<()> {
        self.blocking(|db| db.record_cleanup_time()).await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Delete Operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn delete(&self, id: i64) -> ClipStoreResult<()> {
        let deleted = self.blocking(move |db| db.delete_clip(id)).await?;
        if !deleted {
            debug!(clip_id = id, "delete matched no clip");
        }
        Ok(())
    }

    async fn clear_unpinned(&self) -> ClipStoreResult<u64> {
        let removed = self.blocking(|db| db.clear(false)).await?;
        Ok(removed as u64)
    }

    async fn clear_all(&self) -> ClipStoreResult<u64> {
        let removed = self.blocking(|db| db.clear(true)).await?;
        Ok(removed as u64)
    }

    async fn run_retention(
        &self,
        max_age_days: u32,
        max_total: u32,
        force_compact: bool,
    ) -> ClipStoreResult<u64> {
        let removed = self
            .blocking(move |db| {
                let mut removed = 0;
                if max_age_days > 0 {
                    if let Some(cutoff) = age_cutoff(max_age_days) {
                        removed += degrade("age", db.evict_older_than(cutoff));
                    }
                }
                if max_total > 0 {
                    removed += degrade("count", db.evict_excess(max_total));
                }
                if let Err(e) = db.record_cleanup_time() {
                    warn!(error = %e, "failed to record cleanup time");
                }
                Ok(removed)
            })
            .await?;

        if removed > 0 || force_compact {
            self.compact_after_cleanup().await;
        }
        debug!(removed, max_age_days, max_total, "retention finished");
        Ok(removed)
    }

    async fn remove_orphans(&self) -> ClipStoreResult<u64> {
        init_rayon();
        let batch_size = self.config.orphan_batch_size;
        let removed = self.blocking(move |db| Ok(db.sweep_orphans(batch_size))).await?;
        if removed > 0 {
            self.compact_after_cleanup().await;
        }
        Ok(removed)
    }

    async fn remove_oversized(&self, max_mb: f64) -> ClipStoreResult<u64> {
        let Some(max_bytes) = size_ceiling_bytes(max_mb) else {
            self.ensure_ready()?;
            return Ok(0);
        };
        let removed = self
            .blocking(move |db| Ok(degrade("oversized", db.evict_oversized(max_bytes))))
            .await?;
        if removed > 0 {
            self.compact_after_cleanup().await;
        }
        Ok(removed)
    }

    async fn compact(&self) -> ClipStoreResult<CompactionReport> {
        self.compact_serialized().await
    }
}
