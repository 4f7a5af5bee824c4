//! Core data helpers for clip records
//!
//! Clip types are opaque tags produced by the classifier; the store only needs to
//! know which tags refer to files on disk, image paths and links.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

/// Byte budget for the stored preview column.
pub const PREVIEW_MAX_BYTES: usize = 5120;

/// Storage format for `clips.timestamp`. Fixed width so text order equals time order.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// ─────────────────────────────────────────────────────────────────────────────
// CLIP TYPE TAGS
// ─────────────────────────────────────────────────────────────────────────────

pub mod clip_types {
    pub const TEXT: &str = "text";
    pub const RICH_TEXT: &str = "rich_text";
    pub const CODE: &str = "code";
    pub const COLOR: &str = "color";
    pub const LINK: &str = "link";
    pub const IMAGE: &str = "image";
    pub const FILE: &str = "file";
    pub const FOLDER: &str = "folder";
    pub const FILE_IMAGE: &str = "file_image";
    pub const FILE_LINK: &str = "file_link";

    /// Tags whose content is an image location
    pub const IMAGE_TYPES: &[&str] = &[IMAGE, FILE_IMAGE];

    /// Tags whose content is a URL or a link file
    pub const LINK_TYPES: &[&str] = &[LINK, FILE_LINK];
}

/// Whether a clip of this type references a file or folder on disk
pub fn is_file_based(clip_type: &str) -> bool {
    clip_type == clip_types::FOLDER || clip_type.starts_with(clip_types::FILE)
}

/// SQL predicate equivalent of [`is_file_based`]
pub(crate) const FILE_BASED_PREDICATE: &str =
    "(clip_type = 'folder' OR clip_type GLOB 'file*')";

/// Build a `clip_type IN (...)` predicate from a constant tag list
pub(crate) fn type_list_predicate(types: &[&str]) -> String {
    let quoted: Vec<String> = types.iter().map(|t| format!("'{}'", t)).collect();
    format!("clip_type IN ({})", quoted.join(","))
}

// ─────────────────────────────────────────────────────────────────────────────
// CONTENT DERIVED COLUMNS
// ─────────────────────────────────────────────────────────────────────────────

/// Lowercase hex SHA-256 of the content bytes; the dedup key.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Longest prefix of `content` that fits in [`PREVIEW_MAX_BYTES`] without splitting a character.
pub fn truncate_preview(content: &str) -> &str {
    if content.len() <= PREVIEW_MAX_BYTES {
        return content;
    }
    let mut end = PREVIEW_MAX_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Columns computed from content at write time
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DerivedColumns {
    pub(crate) content_hash: String,
    pub(crate) preview: String,
    pub(crate) size_bytes: i64,
}

impl DerivedColumns {
    pub(crate) fn from_content(content: &str) -> Self {
        Self {
            content_hash: content_hash(content),
            preview: truncate_preview(content).to_string(),
            size_bytes: content.len() as i64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TIMESTAMPS
// ─────────────────────────────────────────────────────────────────────────────

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the legacy second-resolution and RFC 3339 forms too.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Row-mapping variant: unreadable timestamps sort as the epoch rather than failing the read
pub(crate) fn parse_db_timestamp(value: &str) -> DateTime<Utc> {
    parse_timestamp(value).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = content_hash("hello");
        let b = content_hash("hello");
        let c = content_hash("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(
            a,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_preview_exactly_at_budget_is_verbatim() {
        let content = "a".repeat(PREVIEW_MAX_BYTES);
        assert_eq!(truncate_preview(&content), content);
    }

    #[test]
    fn test_preview_one_byte_over_budget_is_shorter() {
        let content = "a".repeat(PREVIEW_MAX_BYTES + 1);
        let preview = truncate_preview(&content);
        assert_eq!(preview.len(), PREVIEW_MAX_BYTES);
        assert!(preview.len() < content.len());
    }

    #[test]
    fn test_preview_never_splits_multibyte_chars() {
        // Shift a 4-byte char across the boundary at every offset
        for pad in 0..4 {
            let mut content = "a".repeat(PREVIEW_MAX_BYTES - 3 + pad);
            while content.len() < PREVIEW_MAX_BYTES + 1 {
                content.push('\u{1F600}');
            }
            let preview = truncate_preview(&content);
            assert!(preview.len() <= PREVIEW_MAX_BYTES);
            assert!(preview.len() < content.len());
            assert!(content.starts_with(preview));
            assert!(std::str::from_utf8(preview.as_bytes()).is_ok());
        }
    }

    #[test]
    fn test_preview_two_byte_straddle() {
        // 5119 ASCII bytes followed by a 2-byte char: 5121 bytes total
        let content = format!("{}é", "a".repeat(PREVIEW_MAX_BYTES - 1));
        assert_eq!(content.len(), PREVIEW_MAX_BYTES + 1);
        assert_eq!(truncate_preview(&content).len(), PREVIEW_MAX_BYTES - 1);
    }

    #[test]
    fn test_derived_columns() {
        let derived = DerivedColumns::from_content("héllo");
        assert_eq!(derived.size_bytes, 6);
        assert_eq!(derived.preview, "héllo");
        assert_eq!(derived.content_hash, content_hash("héllo"));
    }

    #[test]
    fn test_file_based_tags() {
        assert!(is_file_based(clip_types::FILE));
        assert!(is_file_based(clip_types::FOLDER));
        assert!(is_file_based(clip_types::FILE_IMAGE));
        assert!(is_file_based(clip_types::FILE_LINK));
        assert!(!is_file_based(clip_types::TEXT));
        assert!(!is_file_based(clip_types::IMAGE));
        assert!(!is_file_based(clip_types::LINK));
    }

    #[test]
    fn test_file_based_predicate_agrees_with_tags() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let sql = format!("SELECT {} FROM (SELECT ?1 AS clip_type)", FILE_BASED_PREDICATE);
        for tag in [
            clip_types::FILE,
            clip_types::FOLDER,
            clip_types::FILE_LINK,
            clip_types::TEXT,
            "File",
            "FILE_LINK",
            "Folder",
            "profile",
        ] {
            let matched: bool = conn.query_row(&sql, [tag], |row| row.get(0)).unwrap();
            assert_eq!(matched, is_file_based(tag), "tag {:?}", tag);
        }
    }

    #[test]
    fn test_type_list_predicate() {
        assert_eq!(
            type_list_predicate(clip_types::LINK_TYPES),
            "clip_type IN ('link','file_link')"
        );
    }

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = earlier + chrono::Duration::microseconds(1);
        let a = format_timestamp(earlier);
        let b = format_timestamp(later);
        assert_eq!(a, "2024-01-02 03:04:05.000000");
        assert!(a < b);
        assert_eq!(parse_timestamp(&a), Some(earlier));
        assert_eq!(parse_timestamp(&b), Some(later));
    }

    #[test]
    fn test_parse_legacy_timestamps() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2023-06-01 12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-06-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("garbage"), None);
        assert_eq!(parse_db_timestamp("garbage"), DateTime::<Utc>::UNIX_EPOCH);
    }
}
