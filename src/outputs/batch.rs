//! CSV persistence for article batches and slices.
//!
//! Batch files are the hand-off format between the fetch stage, the digest
//! stage and the master index. Writes go through
//! [`write_atomic`](crate::utils::write_atomic); reads validate the header
//! once and hand back typed rows.

use crate::error::{PipelineError, Result};
use crate::identity;
use crate::models::{non_blank, Article, BatchRow};
use crate::utils::{parse_published, write_atomic};
use std::path::Path;
use tracing::{debug, instrument};

/// Columns every batch consumed by the digest and merge stages must expose.
pub const REQUIRED_COLUMNS: [&str; 3] = ["Title", "Source", "Published"];

/// Serialize `articles` to `path` (header included), replacing any previous file.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), rows = articles.len()))]
pub fn write_articles(path: &Path, articles: &[Article]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for article in articles {
        writer
            .serialize(article)
            .map_err(|e| PipelineError::csv(path, e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::csv(path, e.into_error().into()))?;
    write_atomic(path, &bytes)
}

/// Fail with [`PipelineError::MissingColumns`] unless every `required` column is present.
pub fn check_columns(path: &Path, headers: &csv::StringRecord, required: &[&str]) -> Result<()> {
    let found: Vec<String> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !found.iter().any(|f| f == *col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingColumns {
            file: path.to_path_buf(),
            missing,
            found,
        })
    }
}

/// Load every row of a batch file after checking its header.
pub fn read_batch(path: &Path, required: &[&str]) -> Result<Vec<BatchRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::csv(path, e))?
        .clone();
    check_columns(path, &headers, required)?;

    reader
        .deserialize::<BatchRow>()
        .map(|row| row.map_err(|e| PipelineError::csv(path, e)))
        .collect()
}

/// Load a batch or slice file as articles.
///
/// Rows without a title or source, or with an unparseable timestamp, are
/// skipped and counted in the second tuple element. A missing identity is
/// derived from title and source; a missing rank falls back to file order.
pub fn read_articles(path: &Path) -> Result<(Vec<Article>, usize)> {
    let rows = read_batch(path, &REQUIRED_COLUMNS)?;
    let mut skipped = 0usize;
    let mut articles = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let (Some(title), Some(source)) = (non_blank(&row.title), non_blank(&row.source)) else {
            skipped += 1;
            continue;
        };
        let Some(published) = non_blank(&row.published).and_then(parse_published) else {
            skipped += 1;
            continue;
        };
        let identity = non_blank(&row.uid)
            .map(str::to_string)
            .unwrap_or_else(|| identity::hash(title, source));
        let run_sequence_id = non_blank(&row.article_id)
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(idx as u32 + 1);

        articles.push(Article {
            run_sequence_id,
            digest_id: non_blank(&row.digest_id).map(str::to_string),
            identity,
            topic: non_blank(&row.topic).unwrap_or_default().to_string(),
            title: title.to_string(),
            link: non_blank(&row.link).unwrap_or_default().to_string(),
            published,
            source: source.to_string(),
            source_url: non_blank(&row.source_url).unwrap_or("N/A").to_string(),
        });
    }

    debug!(path = %path.display(), rows = articles.len(), skipped, "Loaded article batch");
    Ok((articles, skipped))
}
