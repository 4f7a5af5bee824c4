//! Store configuration loaded from environment variables or a JSON document.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::maintenance::ORPHAN_BATCH_SIZE;

/// Retention thresholds. Zero (or `false`) disables a policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Evict unpinned clips not touched for this many days
    pub max_age_days: u32,
    /// Keep at most this many unpinned clips
    pub max_total: u32,
    /// Evict unpinned clips larger than this many megabytes
    pub max_item_mb: f64,
    /// Sweep file and folder clips whose target is gone
    pub remove_orphans: bool,
}

impl RetentionPolicy {
    pub fn is_disabled(&self) -> bool {
        self.max_age_days == 0
            && self.max_total == 0
            && crate::maintenance::size_ceiling_bytes(self.max_item_mb).is_none()
            && !self.remove_orphans
    }
}

/// Runtime configuration for a [`crate::ClipStore`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub orphan_batch_size: usize,
    pub retention: RetentionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: 8,
            busy_timeout_ms: 5000,
            orphan_batch_size: ORPHAN_BATCH_SIZE,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: String) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = resolve_home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn resolve_home_dir() -> Option<PathBuf> {
    if let Ok(home) = env::var("HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }

    // Windows USERPROFILE
    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.trim().is_empty() {
            return Some(PathBuf::from(profile));
        }
    }

    std::env::current_dir().ok()
}

fn default_db_path() -> PathBuf {
    let home = resolve_home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".local")
        .join("share")
        .join("clipstore")
        .join("clips.sqlite")
}

/// Parse a boolean-like environment flag value.
///
/// Truthy: `1`, `true`, `yes`, `on`. Falsy: `0`, `false`, `no`, `off`, empty string.
/// Matching is case-insensitive and ignores surrounding whitespace.
pub fn parse_env_flag(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl StoreConfig {
    /// Load configuration from `CLIPSTORE_*` environment variables.
    /// Missing or unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> T {
            lookup(name)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            db_path: lookup("CLIPSTORE_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(expand_tilde)
                .unwrap_or(defaults.db_path),
            pool_size: parsed(&lookup, "CLIPSTORE_POOL_SIZE", defaults.pool_size).max(1),
            busy_timeout_ms: parsed(&lookup, "CLIPSTORE_BUSY_TIMEOUT_MS", defaults.busy_timeout_ms),
            orphan_batch_size: parsed(
                &lookup,
                "CLIPSTORE_ORPHAN_BATCH_SIZE",
                defaults.orphan_batch_size,
            )
            .max(1),
            retention: RetentionPolicy {
                max_age_days: parsed(&lookup, "CLIPSTORE_MAX_AGE_DAYS", 0),
                max_total: parsed(&lookup, "CLIPSTORE_MAX_TOTAL", 0),
                max_item_mb: parsed(&lookup, "CLIPSTORE_MAX_ITEM_MB", 0.0),
                remove_orphans: lookup("CLIPSTORE_REMOVE_ORPHANS")
                    .and_then(|value| parse_env_flag(&value))
                    .unwrap_or(false),
            },
        }
    }

    /// Parse a JSON config document. Absent fields keep their defaults and
    /// a leading `~/` in `db_path` is expanded.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        config.db_path = expand_tilde(config.db_path.to_string_lossy().into_owned());
        config.pool_size = config.pool_size.max(1);
        config.orphan_batch_size = config.orphan_batch_size.max(1);
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Same defaults with a different database path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Self::default()
        }
    }
}
