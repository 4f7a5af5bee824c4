//! Fill a clip store with synthetic history for benchmarks and manual testing.
//!
//! Usage:
//!     cargo run --release --bin generate-synthetic-db -- --count 5000 --db-path synthetic.sqlite
//!
//! Clips get a spread of types, sizes and source apps, and their timestamps are
//! backdated over `--days` so retention runs have something to evict.
//! With `--config`, the file's retention policy runs over the generated history.
//! The resulting stats are printed as JSON.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use clipstore::models::format_timestamp;
use clipstore::{clip_types, ClipStore, ClipStoreApi, StoreConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::params;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of clips to generate
    #[arg(short, long, default_value_t = 2000)]
    count: usize,

    /// Path of the SQLite database to create
    #[arg(short, long, default_value = "SyntheticClips.sqlite")]
    db_path: PathBuf,

    /// Spread timestamps over this many past days
    #[arg(long, default_value_t = 90)]
    days: u32,

    /// Fraction of clips to pin
    #[arg(long, default_value_t = 0.02)]
    pinned_ratio: f64,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Delete an existing database at the target path first
    #[arg(long)]
    overwrite: bool,

    /// JSON store config; its retention policy runs once the clips are backdated.
    /// `--db-path` still decides where the database lives.
    #[arg(long)]
    config: Option<PathBuf>,
}

const SOURCE_APPS: &[&str] = &["Safari", "Terminal", "Xcode", "Slack", "Notes", "Mail", "Finder"];

const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "lorem", "ipsum", "dolor",
    "sit", "amet", "deploy", "release", "config", "server", "latency", "index", "query",
    "window", "clipboard", "history", "search", "buffer", "async", "token", "cache", "merge",
];

const CODE_SNIPPETS: &[&str] = &[
    "fn main() {\n    println!(\"hello world\");\n}",
    "SELECT id, content FROM clips WHERE is_pinned = 1 ORDER BY timestamp DESC;",
    "const total = items.reduce((acc, x) => acc + x.size, 0);",
    "def handler(event, context):\n    return {\"statusCode\": 200}",
    "git rebase --onto main feature~3 feature",
];

fn sentence(rng: &mut StdRng, words: usize) -> String {
    (0..words)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

/// One synthetic clip: (content, type). The index keeps content unique.
fn synthetic_clip(rng: &mut StdRng, i: usize) -> (String, &'static str) {
    match rng.gen_range(0..100) {
        0..=44 => {
            let words = rng.gen_range(3..40);
            (format!("{} #{}", sentence(rng, words), i), clip_types::TEXT)
        }
        45..=59 => {
            let snippet = CODE_SNIPPETS[rng.gen_range(0..CODE_SNIPPETS.len())];
            (format!("{}\n// {}", snippet, i), clip_types::CODE)
        }
        60..=74 => (
            format!("https://example.com/{}/{}", WORDS[rng.gen_range(0..WORDS.len())], i),
            clip_types::LINK,
        ),
        75..=79 => (
            format!("#{:02x}{:02x}{:02x} {}", rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>(), i),
            clip_types::COLOR,
        ),
        80..=89 => (format!("/tmp/clipstore-synthetic/file-{}.txt", i), clip_types::FILE),
        90..=94 => (format!("/tmp/clipstore-synthetic/img-{}.png", i), clip_types::IMAGE),
        _ => {
            // Large paragraph, well past the preview budget
            let words = rng.gen_range(1500..4000);
            (format!("{} #{}", sentence(rng, words), i), clip_types::TEXT)
        }
    }
}

/// Spread timestamps uniformly over the past `days` and pin a fraction of clips
fn backdate(db_path: &Path, ids: &[i64], days: u32, pinned_ratio: f64, rng: &mut StdRng) -> Result<()> {
    let mut conn = rusqlite::Connection::open(db_path)?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare("UPDATE clips SET timestamp = ?1, is_pinned = ?2 WHERE id = ?3")?;
        let now = Utc::now();
        let span_secs = i64::from(days) * 24 * 60 * 60;
        for id in ids {
            let age = if span_secs > 0 { rng.gen_range(0..span_secs) } else { 0 };
            let timestamp = now - chrono::Duration::seconds(age);
            let pinned = rng.gen_bool(pinned_ratio.clamp(0.0, 1.0));
            stmt.execute(params![format_timestamp(timestamp), pinned, id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.db_path.exists() {
        if !args.overwrite {
            anyhow::bail!(
                "{} already exists (pass --overwrite to replace it)",
                args.db_path.display()
            );
        }
        std::fs::remove_file(&args.db_path).context("Failed to remove existing database")?;
    }

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let loaded = StoreConfig::from_json(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            StoreConfig {
                db_path: args.db_path.clone(),
                ..loaded
            }
        }
        None => StoreConfig::with_path(&args.db_path),
    };
    let store = ClipStore::open(&config).context("Failed to open database")?;
    store.initialize().await.context("Failed to initialize schema")?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(count = args.count, path = %args.db_path.display(), "generating clips");
    let mut ids = Vec::with_capacity(args.count);
    for i in 0..args.count {
        let (content, clip_type) = synthetic_clip(&mut rng, i);
        let source_app = SOURCE_APPS[rng.gen_range(0..SOURCE_APPS.len())].to_string();
        let id = store
            .add(content, clip_type.to_string(), Some(source_app), false)
            .await?;
        ids.push(id);

        if (i + 1) % 500 == 0 {
            info!(generated = i + 1, "progress");
        }
    }

    backdate(&args.db_path, &ids, args.days, args.pinned_ratio, &mut rng)
        .context("Failed to backdate clips")?;

    if !config.retention.is_disabled() {
        let report = store.run_maintenance().await?;
        info!(removed = report.total_removed(), "retention applied");
    }

    let stats = store.get_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
