//! Search Query Builder (SQLite FTS5 + literal-phrase tiering)
//!
//! A search term is split on whitespace. Each token becomes a quoted FTS5 prefix
//! term and all tokens are ANDed. Results fall into three tiers:
//!
//! - rank 0: the whole space-joined phrase appears literally in the content
//! - rank 1: the FTS index matched but the phrase is not a literal substring
//! - rank 2: the index missed, but every token is a substring of the content
//!
//! Ordering is pinned first, then rank, then recency. An empty term browses by recency only.

use rusqlite::types::Value;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::{Database, DatabaseResult, PREVIEW_COLUMNS};
use crate::interface::{SearchFilter, SearchHit};
use crate::models::{clip_types, type_list_predicate};

/// Characters of context kept on each side of a synthesized match
pub(crate) const SNIPPET_CONTEXT_CHARS: usize = 40;

/// Tokens per excerpt produced by the FTS5 `snippet()` function
const FTS_SNIPPET_TOKENS: u32 = 16;

pub(crate) const MARK_OPEN: &str = "<mark>";
pub(crate) const MARK_CLOSE: &str = "</mark>";
pub(crate) const ELLIPSIS: &str = "…";

/// One page request
#[derive(Debug, Clone)]
pub(crate) struct SearchQuery {
    pub(crate) limit: u32,
    pub(crate) offset: u32,
    pub(crate) term: String,
    pub(crate) filter: SearchFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchMode {
    Browse,
    Search,
}

/// SQL text plus its positional parameters, in order of appearance
#[derive(Debug)]
pub(crate) struct SearchPlan {
    pub(crate) mode: SearchMode,
    pub(crate) tokens: Vec<String>,
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TERM HANDLING
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn tokenize(term: &str) -> Vec<String> {
    term.split_whitespace().map(str::to_string).collect()
}

/// Quote a token as an FTS5 prefix term. Tokens without any letter or digit
/// produce no index terms under `unicode61` and are left to the substring fallback.
fn fts_term(token: &str) -> Option<String> {
    if !token.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(format!("\"{}\"*", token.replace('"', "\"\"")))
}

/// Implicit-AND FTS5 expression, or `None` when no token can hit the index
pub(crate) fn fts_match_expression(tokens: &[String]) -> Option<String> {
    let terms: Vec<String> = tokens.iter().filter_map(|t| fts_term(t)).collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Escape `%`, `_` and the escape char itself for `LIKE ... ESCAPE '\'`
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn contains_pattern(value: &str) -> String {
    format!("%{}%", escape_like(value))
}

/// ANDed substring tests, one bound pattern per token. Empty when there are no tokens.
fn all_contain<'a>(tokens: impl Iterator<Item = &'a String>, params: &mut Vec<Value>) -> String {
    tokens
        .map(|token| {
            params.push(Value::Text(contains_pattern(token)));
            "c.content LIKE ? ESCAPE '\\'"
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Filter predicate over `clips c`, appending any bound parameter
fn filter_predicate(filter: &SearchFilter, params: &mut Vec<Value>) -> Option<String> {
    match filter {
        SearchFilter::All => None,
        SearchFilter::Pinned => Some("c.is_pinned = 1".to_string()),
        SearchFilter::Link => Some(format!("c.{}", type_list_predicate(clip_types::LINK_TYPES))),
        SearchFilter::Type(clip_type) => {
            params.push(Value::Text(clip_type.clone()));
            Some("c.clip_type = ?".to_string())
        }
    }
}

fn qualified_preview_columns() -> String {
    PREVIEW_COLUMNS
        .split(", ")
        .map(|column| format!("c.{}", column))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// PLAN
// ─────────────────────────────────────────────────────────────────────────────

/// Build the SQL for one page. Every plan yields the preview columns followed by
/// `rank`, `excerpt` (index snippet) and `body` (content, only when a snippet must be synthesized).
pub(crate) fn build_plan(query: &SearchQuery) -> SearchPlan {
    let tokens = tokenize(&query.term);
    let columns = qualified_preview_columns();
    let mut params = Vec::new();

    if tokens.is_empty() {
        let mut sql = format!(
            "SELECT {}, NULL AS rank, NULL AS excerpt, NULL AS body FROM clips c",
            columns
        );
        if let Some(predicate) = filter_predicate(&query.filter, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql.push_str(" ORDER BY c.timestamp DESC, c.id DESC LIMIT ? OFFSET ?");
        params.push(Value::Integer(i64::from(query.limit)));
        params.push(Value::Integer(i64::from(query.offset)));
        return SearchPlan {
            mode: SearchMode::Browse,
            tokens,
            sql,
            params,
        };
    }

    let fts_expression = fts_match_expression(&tokens);
    let phrase = tokens.join(" ");
    let mut sql = String::new();

    if let Some(expression) = &fts_expression {
        sql.push_str(&format!(
            "WITH hits AS MATERIALIZED (SELECT rowid AS id, snippet(clips_fts, 0, '{}', '{}', '{}', {}) AS excerpt \
             FROM clips_fts WHERE clips_fts MATCH ?) ",
            MARK_OPEN, MARK_CLOSE, ELLIPSIS, FTS_SNIPPET_TOKENS
        ));
        params.push(Value::Text(expression.clone()));
    }

    let (index_rank, excerpt, body, join) = if fts_expression.is_some() {
        (
            " WHEN hits.id IS NOT NULL THEN 1",
            "hits.excerpt",
            "CASE WHEN hits.excerpt IS NULL THEN c.content END",
            " LEFT JOIN hits ON hits.id = c.id",
        )
    } else {
        ("", "NULL", "c.content", "")
    };

    sql.push_str(&format!(
        "SELECT {}, CASE WHEN c.content LIKE ? ESCAPE '\\' THEN 0{} ELSE 2 END AS rank, \
         {} AS excerpt, {} AS body FROM clips c{}",
        columns, index_rank, excerpt, body, join
    ));
    params.push(Value::Text(contains_pattern(&phrase)));

    if fts_expression.is_some() {
        // Tokens the index cannot see still constrain index hits
        let unindexed = all_contain(tokens.iter().filter(|t| fts_term(t).is_none()), &mut params);
        let fallback = all_contain(tokens.iter(), &mut params);
        if unindexed.is_empty() {
            sql.push_str(&format!(" WHERE (hits.id IS NOT NULL OR ({}))", fallback));
        } else {
            sql.push_str(&format!(
                " WHERE ((hits.id IS NOT NULL AND {}) OR ({}))",
                unindexed, fallback
            ));
        }
    } else {
        let fallback = all_contain(tokens.iter(), &mut params);
        sql.push_str(&format!(" WHERE ({})", fallback));
    }
    if let Some(predicate) = filter_predicate(&query.filter, &mut params) {
        sql.push_str(" AND ");
        sql.push_str(&predicate);
    }
    sql.push_str(" ORDER BY c.is_pinned DESC, rank ASC, c.timestamp DESC, c.id DESC LIMIT ? OFFSET ?");
    params.push(Value::Integer(i64::from(query.limit)));
    params.push(Value::Integer(i64::from(query.offset)));

    SearchPlan {
        mode: SearchMode::Search,
        tokens,
        sql,
        params,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SNIPPETS
// ─────────────────────────────────────────────────────────────────────────────

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Byte range of the first case-insensitive occurrence of `needle`, on char boundaries
pub(crate) fn find_ignore_case(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    for (start, _) in haystack.char_indices() {
        let mut rest = haystack[start..].char_indices();
        let mut end = start;
        let mut matched = true;
        for n in needle.chars() {
            match rest.next() {
                Some((offset, h)) if chars_eq_ignore_case(h, n) => {
                    end = start + offset + h.len_utf8();
                }
                _ => {
                    matched = false;
                    break;
                }
            }
        }
        if matched {
            return Some((start, end));
        }
    }
    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Excerpt around the first token found in `content`, with the hit wrapped in markers.
/// Tokens are tried in query order.
pub(crate) fn synthesize_snippet(content: &str, tokens: &[String]) -> Option<String> {
    let (start, end) = tokens
        .iter()
        .find_map(|token| find_ignore_case(content, token))?;

    let window_start = content[..start]
        .char_indices()
        .rev()
        .nth(SNIPPET_CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window_end = content[end..]
        .char_indices()
        .nth(SNIPPET_CONTEXT_CHARS)
        .map(|(i, _)| end + i)
        .unwrap_or(content.len());

    let mut snippet = String::new();
    if window_start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    let before = collapse_whitespace(&content[window_start..start]);
    snippet.push_str(&before);
    if !before.is_empty() && content[..start].ends_with(char::is_whitespace) {
        snippet.push(' ');
    }
    snippet.push_str(MARK_OPEN);
    snippet.push_str(&content[start..end]);
    snippet.push_str(MARK_CLOSE);
    let after = collapse_whitespace(&content[end..window_end]);
    if !after.is_empty() && content[end..].starts_with(char::is_whitespace) {
        snippet.push(' ');
    }
    snippet.push_str(&after);
    if window_end < content.len() {
        snippet.push_str(ELLIPSIS);
    }
    Some(snippet)
}

// ─────────────────────────────────────────────────────────────────────────────
// EXECUTION
// ─────────────────────────────────────────────────────────────────────────────

fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

fn read_hit(row: &rusqlite::Row, plan: &SearchPlan) -> rusqlite::Result<SearchHit> {
    let clip = Database::row_to_preview(row)?;
    if plan.mode == SearchMode::Browse {
        return Ok(SearchHit {
            clip,
            rank: None,
            snippet: None,
        });
    }
    let rank: i64 = row.get(8)?;
    let excerpt: Option<String> = row.get(9)?;
    let snippet = match excerpt {
        Some(excerpt) => excerpt,
        None => {
            let body: Option<String> = row.get(10)?;
            body.as_deref()
                .and_then(|content| synthesize_snippet(content, &plan.tokens))
                .unwrap_or_else(|| clip.preview.clone())
        }
    };
    Ok(SearchHit {
        clip,
        rank: Some(rank.clamp(0, 2) as u8),
        snippet: Some(snippet),
    })
}

/// Run a plan on one connection. `None` means the query observed cancellation.
fn run_plan(
    conn: &Connection,
    plan: &SearchPlan,
    token: &CancellationToken,
) -> rusqlite::Result<Option<Vec<SearchHit>>> {
    let mut stmt = conn.prepare(&plan.sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(plan.params.iter()))?;
    let mut hits = Vec::new();
    loop {
        if token.is_cancelled() {
            return Ok(None);
        }
        match rows.next()? {
            Some(row) => hits.push(read_hit(row, plan)?),
            None => break,
        }
    }
    Ok(Some(hits))
}

impl Database {
    /// Execute one browse/search page with SQLite-level interrupt support.
    /// A cancelled search returns an empty page, never a partial one.
    pub(crate) fn search(
        &self,
        query: &SearchQuery,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> DatabaseResult<Vec<SearchHit>> {
        use tokio_util::task::AbortOnDropHandle;

        if token.is_cancelled() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let plan = build_plan(query);
        debug!(
            mode = ?plan.mode,
            tokens = plan.tokens.len(),
            filter = ?query.filter,
            "search plan built"
        );

        self.with_conn(|conn| {
            let interrupt_handle = conn.get_interrupt_handle();
            let token_clone = token.clone();
            let watcher = runtime.spawn(async move {
                token_clone.cancelled().await;
                interrupt_handle.interrupt();
            });
            let _abort_guard = AbortOnDropHandle::new(watcher);

            match run_plan(conn, &plan, token) {
                Ok(Some(hits)) if !token.is_cancelled() => Ok(hits),
                Ok(_) => {
                    debug!("search cancelled");
                    Ok(Vec::new())
                }
                Err(e) if is_interrupted(&e) => {
                    debug!("search interrupted");
                    Ok(Vec::new())
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::clip_types;

    fn query(term: &str, filter: SearchFilter) -> SearchQuery {
        SearchQuery {
            limit: 50,
            offset: 0,
            term: term.to_string(),
            filter,
        }
    }

    fn open() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize_schema().unwrap();
        db
    }

    fn add(db: &Database, content: &str, clip_type: &str) -> i64 {
        let id = db.insert_or_touch(content, clip_type, None, false).unwrap().id();
        // Keep timestamps strictly increasing
        std::thread::sleep(std::time::Duration::from_millis(2));
        id
    }

    fn run(db: &Database, q: &SearchQuery) -> Vec<SearchHit> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        db.search(q, &CancellationToken::new(), rt.handle()).unwrap()
    }

    fn ids(hits: &[SearchHit]) -> Vec<i64> {
        hits.iter().map(|h| h.clip.id).collect()
    }

    #[test]
    fn test_tokenize_splits_on_any_whitespace() {
        assert_eq!(tokenize("  hello \t world\n"), vec!["hello", "world"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_fts_expression_quotes_and_prefixes() {
        let tokens = tokenize(r#"say "hi" ::"#);
        assert_eq!(
            fts_match_expression(&tokens).as_deref(),
            Some(r#""say"* """hi"""*"#)
        );
        assert_eq!(fts_match_expression(&tokenize(":: --")), None);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_browse_plan_has_no_ranking() {
        let plan = build_plan(&query("   ", SearchFilter::All));
        assert_eq!(plan.mode, SearchMode::Browse);
        assert!(!plan.sql.contains("clips_fts"));
        assert!(plan.sql.contains("ORDER BY c.timestamp DESC"));
        assert!(!plan.sql.contains("is_pinned DESC"));
        assert_eq!(plan.params.len(), 2);
    }

    #[test]
    fn test_search_plan_binds_type_filter() {
        let plan = build_plan(&query("foo", SearchFilter::Type("code".into())));
        assert_eq!(plan.mode, SearchMode::Search);
        assert!(plan.sql.contains("MATCH ?"));
        assert!(plan.sql.contains("c.clip_type = ?"));
        // match, phrase, one fallback token, type, limit, offset
        assert_eq!(plan.params.len(), 6);
        assert_eq!(plan.params[3], Value::Text("code".into()));
        assert_eq!(plan.sql.matches('?').count(), plan.params.len());
    }

    #[test]
    fn test_punctuation_only_plan_skips_index() {
        let plan = build_plan(&query("://", SearchFilter::All));
        assert!(!plan.sql.contains("clips_fts"));
        assert_eq!(plan.sql.matches('?').count(), plan.params.len());
    }

    #[test]
    fn test_mixed_plan_constrains_index_hits_by_unindexed_tokens() {
        let plan = build_plan(&query("hello ://", SearchFilter::All));
        assert!(plan.sql.contains("clips_fts MATCH ?"));
        assert!(plan.sql.contains("hits.id IS NOT NULL AND c.content LIKE ?"));
        assert_eq!(plan.sql.matches('?').count(), plan.params.len());

        let plain = build_plan(&query("hello world", SearchFilter::All));
        assert!(plain.sql.contains("WHERE (hits.id IS NOT NULL OR ("));
    }

    #[test]
    fn test_find_ignore_case() {
        assert_eq!(find_ignore_case("Hello World", "world"), Some((6, 11)));
        assert_eq!(find_ignore_case("ÄBC äbc", "äb"), Some((0, 3)));
        assert_eq!(find_ignore_case("abc", "abcd"), None);
        assert_eq!(find_ignore_case("abc", ""), None);
    }

    #[test]
    fn test_synthesized_snippet_short_content() {
        let snippet = synthesize_snippet("say Hello there", &["hello".to_string()]).unwrap();
        assert_eq!(snippet, "say <mark>Hello</mark> there");
    }

    #[test]
    fn test_synthesized_snippet_windows_long_content() {
        let content = format!("{} TARGET {}", "a".repeat(100), "z".repeat(100));
        let snippet = synthesize_snippet(&content, &["target".to_string()]).unwrap();
        assert!(snippet.starts_with(ELLIPSIS));
        assert!(snippet.ends_with(ELLIPSIS));
        assert!(snippet.contains("<mark>TARGET</mark>"));
        let visible = snippet.replace(MARK_OPEN, "").replace(MARK_CLOSE, "");
        assert!(visible.chars().count() <= SNIPPET_CONTEXT_CHARS * 2 + "TARGET".len() + 4);
    }

    #[test]
    fn test_synthesized_snippet_multibyte_window() {
        let content = format!("{}needle{}", "é".repeat(60), "ü".repeat(60));
        let snippet = synthesize_snippet(&content, &["NEEDLE".to_string()]).unwrap();
        assert!(snippet.contains("<mark>needle</mark>"));
        assert!(snippet.contains(&"é".repeat(SNIPPET_CONTEXT_CHARS)));
        assert!(!snippet.contains(&"é".repeat(SNIPPET_CONTEXT_CHARS + 1)));
    }

    #[test]
    fn test_synthesized_snippet_falls_through_tokens() {
        let snippet = synthesize_snippet("only beta here", &["alpha".into(), "beta".into()]).unwrap();
        assert_eq!(snippet, "only <mark>beta</mark> here");
        assert!(synthesize_snippet("nothing", &["alpha".into()]).is_none());
    }

    #[test]
    fn test_literal_phrase_outranks_token_match() {
        let db = open();
        let a = add(&db, "hello world", clip_types::TEXT);
        let b = add(&db, "worldwide hello", clip_types::TEXT);

        let hits = run(&db, &query("hello world", SearchFilter::All));
        assert_eq!(ids(&hits), vec![a, b]);
        assert_eq!(hits[0].rank, Some(0));
        assert_eq!(hits[1].rank, Some(1));
        assert!(hits[0].snippet.as_deref().unwrap().contains(MARK_OPEN));
    }

    #[test]
    fn test_pinned_hit_comes_first() {
        let db = open();
        let pinned = add(&db, "deploy notes for friday", clip_types::TEXT);
        let exact = add(&db, "deploy notes", clip_types::TEXT);
        db.set_pinned(pinned, true).unwrap();

        let hits = run(&db, &query("deploy", SearchFilter::All));
        assert_eq!(ids(&hits), vec![pinned, exact]);
    }

    #[test]
    fn test_substring_fallback_is_rank_two() {
        let db = open();
        let id = add(&db, "foobar bazqux", clip_types::TEXT);

        let hits = run(&db, &query("BAR qux", SearchFilter::All));
        assert_eq!(ids(&hits), vec![id]);
        assert_eq!(hits[0].rank, Some(2));
        assert_eq!(hits[0].snippet.as_deref(), Some("foo<mark>bar</mark> bazqux"));
    }

    #[test]
    fn test_punctuation_term_matches_by_substring() {
        let db = open();
        let id = add(&db, "https://example.com", clip_types::LINK);
        add(&db, "no scheme here", clip_types::TEXT);

        let hits = run(&db, &query("://", SearchFilter::All));
        assert_eq!(ids(&hits), vec![id]);
        assert_eq!(hits[0].rank, Some(0));
        assert_eq!(hits[0].snippet.as_deref(), Some("https<mark>://</mark>example.com"));
    }

    #[test]
    fn test_index_hit_must_contain_punctuation_token() {
        let db = open();
        add(&db, "hello world", clip_types::TEXT);
        let with_scheme = add(&db, "hello https://x", clip_types::LINK);

        let hits = run(&db, &query("hello ://", SearchFilter::All));
        assert_eq!(ids(&hits), vec![with_scheme]);
        assert_eq!(hits[0].rank, Some(1));
    }

    #[test]
    fn test_browse_is_pure_recency() {
        let db = open();
        let old_pinned = add(&db, "old", clip_types::TEXT);
        let newer = add(&db, "newer", clip_types::TEXT);
        db.set_pinned(old_pinned, true).unwrap();

        let hits = run(&db, &query("", SearchFilter::All));
        assert_eq!(ids(&hits), vec![newer, old_pinned]);
        assert!(hits.iter().all(|h| h.rank.is_none() && h.snippet.is_none()));
    }

    #[test]
    fn test_filters() {
        let db = open();
        let link = add(&db, "https://rust-lang.org", clip_types::LINK);
        let file_link = add(&db, "/tmp/rust.webloc", clip_types::FILE_LINK);
        let code = add(&db, "fn rust() {}", clip_types::CODE);
        db.set_pinned(code, true).unwrap();

        let links = run(&db, &query("rust", SearchFilter::Link));
        assert_eq!(ids(&links), vec![file_link, link]);

        let pinned = run(&db, &query("", SearchFilter::Pinned));
        assert_eq!(ids(&pinned), vec![code]);

        let typed = run(&db, &query("rust", SearchFilter::Type(clip_types::CODE.into())));
        assert_eq!(ids(&typed), vec![code]);
    }

    #[test]
    fn test_pagination_applies_after_ordering() {
        let db = open();
        let all: Vec<i64> = (0..5).map(|i| add(&db, &format!("item {}", i), clip_types::TEXT)).collect();

        let mut q = query("", SearchFilter::All);
        q.limit = 2;
        q.offset = 1;
        let page = run(&db, &q);
        assert_eq!(ids(&page), vec![all[3], all[2]]);

        q.offset = 10;
        assert!(run(&db, &q).is_empty());
    }

    #[test]
    fn test_cancelled_search_returns_nothing() {
        let db = open();
        add(&db, "something", clip_types::TEXT);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let hits = db
            .search(&query("some", SearchFilter::All), &token, rt.handle())
            .unwrap();
        assert!(hits.is_empty());
    }
}
