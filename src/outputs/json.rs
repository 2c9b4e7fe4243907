//! JSON Lines persistence.
//!
//! Digest, LLM, exploded and scraped records are all stored one JSON
//! object per line. Whole-file rewrites go through
//! [`write_atomic`](crate::utils::write_atomic); the scrape log is the only
//! file that is appended to in place.

use crate::error::{PipelineError, Result};
use crate::utils::write_atomic;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

fn encode<T: Serialize>(path: &Path, records: &[T]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for (i, record) in records.iter().enumerate() {
        serde_json::to_writer(&mut body, record).map_err(|e| PipelineError::json(path, i + 1, e))?;
        body.push(b'\n');
    }
    Ok(body)
}

/// Read every record of a JSONL file; a missing file holds no records.
///
/// Blank lines are ignored. A line that does not parse is an error naming
/// the file and the 1-based line number.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = stdfs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line).map_err(|e| PipelineError::json(path, i + 1, e))?);
    }
    debug!(path = %path.display(), records = records.len(), "Read JSONL");
    Ok(records)
}

/// Like [`read_jsonl`], but lines that fail to parse are logged and skipped.
pub fn read_jsonl_lenient<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = stdfs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, error = %e, "JSONL parsing failed; skipping line");
                None
            }
        })
        .collect())
}

/// Replace `path` with `records`, one per line.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), records = records.len()))]
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_atomic(path, &encode(path, records)?)
}

/// Append `records` to `path`, creating it if needed.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), records = records.len()))]
pub async fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> std::result::Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = encode(path, records)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&body).await?;
    file.flush().await?;
    Ok(())
}
