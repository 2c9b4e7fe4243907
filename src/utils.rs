//! Utility functions for timestamp parsing, string manipulation, and file system operations.
//!
//! This module provides helper functions used throughout the application:
//! - Lenient parsing of feed and CSV timestamps into UTC
//! - Trigger-time parsing for the command line
//! - String truncation and topic sanitization for logging and file names
//! - JSON error detection for handling LLM response truncation
//! - Atomic file replacement and output directory validation

use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Naive layouts tried after the offset-aware ones. Values matched here are taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a published timestamp as it appears in RSS feeds or batch files.
///
/// Accepts RFC 2822 (`Mon, 02 Jun 2025 14:00:00 GMT`, the RSS `pubDate`
/// form), RFC 3339 with either `T` or a space as separator, naive
/// date-times and bare dates. Returns `None` when nothing matches; callers
/// decide whether that drops the row.
///
/// # Arguments
///
/// * `raw` - The timestamp text; surrounding whitespace is ignored
///
/// # Returns
///
/// The instant in UTC, or `None` if no accepted layout matches.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let t_separated = s.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&t_separated) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }
    None
}

/// Parse a `--trigger-time` argument such as `2025-05-28T12:00`.
///
/// Offsets are honoured; naive values are interpreted as UTC. Minutes are
/// kept, so windows are planned from the exact instant given.
///
/// # Arguments
///
/// * `raw` - RFC 3339, or `YYYY-MM-DDTHH:MM[:SS]`, or `YYYY-MM-DD HH:MM`
///
/// # Returns
///
/// The trigger instant in UTC, or [`PipelineError::InvalidTimestamp`].
pub fn parse_trigger_time(raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(PipelineError::InvalidTimestamp(raw.to_string()))
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes (backing off to a char
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of bytes to keep
///
/// # Returns
///
/// The original string if it fits in `max`, otherwise a truncated version
/// with `"…(+N bytes)"` appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
///
/// # Arguments
///
/// * `e` - The serde_json error to classify
///
/// # Returns
///
/// `true` if the error is an EOF error, meaning the answer was cut short.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-]").expect("static regex"));

/// Turn a topic name into a file-name-safe token.
///
/// Spaces become underscores and every character that is neither a
/// (Unicode) word character nor `-` is replaced by `_`. Accented letters
/// survive.
///
/// # Arguments
///
/// * `topic` - The topic name as configured
///
/// # Returns
///
/// A token usable in headline file names.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_topic("Inflación y Precios"), "Inflación_y_Precios");
/// ```
pub fn sanitize_topic(topic: &str) -> String {
    let spaced = topic.trim().replace(' ', "_");
    NON_WORD.replace_all(&spaced, "_").into_owned()
}

/// Replace `path` with `bytes` without exposing a half-written file.
///
/// The content goes to a sibling `*.tmp` file first and is renamed over the
/// target, so readers observe either the old or the new version.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            stdfs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    stdfs::write(&tmp_path, bytes).map_err(|e| PipelineError::io(&tmp_path, e))?;
    stdfs::rename(&tmp_path, path).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

/// Regular files directly inside `dir` whose name passes `keep`, sorted by path.
///
/// A missing directory yields no files.
///
/// # Arguments
///
/// * `dir` - Directory to scan, not recursively
/// * `keep` - Predicate on the file name
///
/// # Returns
///
/// Matching paths in lexical order, or an I/O error naming `dir`.
pub fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in stdfs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if path.is_file() && keep(name) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Arguments
///
/// * `path` - The data directory
///
/// # Errors
///
/// Returns an error if the directory cannot be created or written to.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Data directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_published_rfc2822() {
        let dt = parse_published("Mon, 02 Jun 2025 14:05:00 GMT").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 6, 2, 14, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_published_converts_offset_to_utc() {
        let dt = parse_published("Mon, 02 Jun 2025 11:00:00 -0300").unwrap();
        assert_eq!(dt.hour(), 14);
    }

    #[test]
    fn test_parse_published_rfc3339_and_space_separated() {
        let a = parse_published("2025-06-02T14:00:00Z").unwrap();
        let b = parse_published("2025-06-02 14:00:00+00:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_published_naive_is_utc() {
        let dt = parse_published("2025-06-02 14:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap());
        let day = parse_published("2025-06-02").unwrap();
        assert_eq!((day.day(), day.hour()), (2, 0));
    }

    #[test]
    fn test_parse_published_rejects_garbage() {
        assert!(parse_published("").is_none());
        assert!(parse_published("   ").is_none());
        assert!(parse_published("ayer por la tarde").is_none());
    }

    #[test]
    fn test_parse_trigger_time() {
        let t = parse_trigger_time("2025-05-28T12:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 5, 28, 12, 0, 0).unwrap());
        let t = parse_trigger_time("2025-05-28T09:00:00-03:00").unwrap();
        assert_eq!(t.hour(), 12);
        assert!(parse_trigger_time("tomorrow").is_err());
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let result = truncate_for_log("ñññ", 3);
        assert!(result.starts_with('ñ'));
    }

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("Inflación y Precios"), "Inflación_y_Precios");
        assert_eq!(
            sanitize_topic("Personajes Políticos y Económicos"),
            "Personajes_Políticos_y_Económicos"
        );
        assert_eq!(sanitize_topic("Deuda/Financiamiento"), "Deuda_Financiamiento");
        assert_eq!(sanitize_topic("  Sector-Externo "), "Sector-Externo");
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str(json_eof);
        assert!(looks_truncated(&result.unwrap_err()));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(stdfs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("nested").join("out.csv.tmp").exists());
    }
}
