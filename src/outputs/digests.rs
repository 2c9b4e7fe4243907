//! Headline digests: the documents handed to the LLM.
//!
//! Every slice of a run is split per topic into groups of bounded size.
//! Each group is rendered as a small Markdown document listing its
//! headlines, and all documents of one digest id are then collected into a
//! single JSONL file, one [`DigestRecord`] per document.

use crate::config::DataLayout;
use crate::digest_id::DigestId;
use crate::error::{PipelineError, Result};
use crate::models::{Article, DigestRecord};
use crate::outputs::json::write_jsonl;
use crate::outputs::batch::read_articles;
use crate::utils::{list_files, sanitize_topic, write_atomic};
use crate::windows::WindowKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, instrument, warn};

/// Documents shorter than this carry no headlines and are not sent on.
const MIN_CONTENT_CHARS: usize = 20;

static HEADLINE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^headlines_(\w+_window)_(\d{8}T\d{2})_(.+)_(\d{2})\.md$").expect("static regex")
});
static SLICE_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+_window)_(\d{8}T\d{4})$").expect("static regex"));

/// Which digest ids a digest run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestSelection {
    One(DigestId),
    /// Every digest id found in slice file names.
    All,
}

impl FromStr for DigestSelection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(DigestSelection::All)
        } else {
            s.parse().map(DigestSelection::One)
        }
    }
}

/// The headlines of one topic, or one part of a large topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicGroup {
    pub topic: String,
    /// Two-digit, 1-based: `01`, `02`, ...
    pub group_id: String,
    pub articles: Vec<Article>,
}

/// Split `articles` into per-topic groups of near-equal size.
///
/// A topic of `n` rows is cut into `k = max(1, ceil(n / max_rows))`
/// contiguous chunks, the first `n mod k` of them one row longer. When the
/// resulting chunk size falls below `min_rows` the topic stays a single
/// group. Topics come out in name order; rows keep their input order.
pub fn split_topic_groups(articles: &[Article], min_rows: usize, max_rows: usize) -> Vec<TopicGroup> {
    let mut by_topic: BTreeMap<&str, Vec<&Article>> = BTreeMap::new();
    for article in articles {
        by_topic.entry(article.topic.as_str()).or_default().push(article);
    }

    let max_rows = max_rows.max(1);
    let mut groups = Vec::new();
    for (topic, rows) in by_topic {
        let n = rows.len();
        let k = n.div_ceil(max_rows).max(1);
        let size = n.div_ceil(k);

        if size < min_rows {
            groups.push(TopicGroup {
                topic: topic.to_string(),
                group_id: "01".to_string(),
                articles: rows.into_iter().cloned().collect(),
            });
            continue;
        }

        let (base, longer) = (n / k, n % k);
        let mut rest = rows.as_slice();
        for i in 0..k {
            let len = base + usize::from(i < longer);
            let (chunk, tail) = rest.split_at(len);
            rest = tail;
            groups.push(TopicGroup {
                topic: topic.to_string(),
                group_id: format!("{:02}", i + 1),
                articles: chunk.iter().map(|a| (*a).clone()).collect(),
            });
        }
    }
    groups
}

/// Markdown listing of one group's headlines.
pub fn render_group(group: &TopicGroup) -> String {
    let mut out = format!("# {} (Grupo {})\n\n", group.topic, group.group_id);
    for a in &group.articles {
        let _ = write!(out, "ID: {} - Title: {}", a.run_sequence_id, a.title);
        let _ = write!(out, " _(Publicado: {})_", a.published.format("%Y-%m-%d %Hhs"));
        if !a.source.is_empty() {
            let _ = write!(out, " — _Fuente: {}_", a.source);
        }
        if !a.identity.is_empty() {
            let _ = write!(out, " — `uid:{}`", a.identity);
        }
        out.push('\n');
    }
    out
}

pub fn headline_file_name(window: &str, digest_id: &DigestId, topic: &str, group_id: &str) -> String {
    format!("headlines_{window}_{digest_id}_{}_{group_id}.md", sanitize_topic(topic))
}

/// Metadata recovered from a headline file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlineFile {
    pub window_type: String,
    pub digest_id: String,
    /// Sanitized topic as it appears in the file name.
    pub topic_raw: String,
    pub topic: String,
    pub group_number: String,
}

impl HeadlineFile {
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = HEADLINE_FILE.captures(file_name)?;
        let topic_raw = caps[3].trim_matches('_').to_string();
        Some(HeadlineFile {
            window_type: caps[1].to_string(),
            digest_id: caps[2].to_string(),
            topic: topic_raw.replace('_', " "),
            topic_raw,
            group_number: caps[4].to_string(),
        })
    }

    /// `{digest_id}::{window}::{topic}::{group}`
    pub fn digest_group_id(&self) -> String {
        format!(
            "{}::{}::{}::{}",
            self.digest_id, self.window_type, self.topic_raw, self.group_number
        )
    }
}

/// What a digest run produced for one digest id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    /// The JSONL already existed and `force` was not set.
    Skipped,
    /// No slice produced any headline document.
    NoSlices,
    Written {
        path: PathBuf,
        documents: usize,
        records: usize,
    },
}

/// Digest ids of every slice file on disk.
pub fn digest_ids_in(slice_dir: &Path) -> Result<BTreeSet<DigestId>> {
    let files = list_files(slice_dir, |name| name.ends_with(".csv"))?;
    Ok(files
        .iter()
        .filter_map(|p| p.file_stem()?.to_str().map(str::to_string))
        .filter_map(|stem| {
            let caps = SLICE_STEM.captures(&stem)?;
            caps[2].parse::<DigestId>().ok()
        })
        .collect())
}

/// Render the headline documents of every slice of `digest_id`.
fn render_slices(layout: &DataLayout, digest_id: &DigestId, min_rows: usize, max_rows: usize) -> Result<usize> {
    let id = digest_id.to_string();
    let slices = list_files(&layout.slice_dir(), |name| name.ends_with(".csv") && name.contains(&id))?;
    info!(count = slices.len(), "Located slice files");

    let mut documents = 0usize;
    for slice in slices {
        let stem = slice.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let Some(kind) = SLICE_STEM
            .captures(stem)
            .and_then(|caps| WindowKind::from_label(&caps[1]))
        else {
            warn!(path = %slice.display(), "Unexpected slice file name; skipping");
            continue;
        };
        let window = kind.label();

        let (mut articles, skipped) = match read_articles(&slice) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(path = %slice.display(), error = %e, "Rejected slice file");
                continue;
            }
        };
        articles.sort_by_key(|a| a.published);

        let groups = split_topic_groups(&articles, min_rows, max_rows);
        for group in &groups {
            let name = headline_file_name(window, digest_id, &group.topic, &group.group_id);
            write_atomic(&layout.digest_md_dir().join(&name), render_group(group).as_bytes())?;
        }
        debug!(path = %slice.display(), rows = articles.len(), skipped, groups = groups.len(), "Rendered slice");
        documents += groups.len();
    }
    Ok(documents)
}

/// Collect every headline document of `digest_id` into JSONL records.
pub fn collect_records(md_dir: &Path, digest_id: &DigestId) -> Result<Vec<DigestRecord>> {
    let id = digest_id.to_string();
    let mut matching = Vec::new();
    for path in list_files(md_dir, |name| name.starts_with("headlines_") && name.ends_with(".md"))? {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        match HeadlineFile::parse(name) {
            Some(meta) if meta.digest_id == id => matching.push((path.clone(), meta)),
            Some(_) => {}
            None => warn!(file = name, "Skipped malformed headline file name"),
        }
    }

    let mut records = Vec::with_capacity(matching.len());
    for (i, (path, meta)) in matching.into_iter().enumerate() {
        let text = fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
        let content = text.trim();
        if content.chars().count() < MIN_CONTENT_CHARS {
            warn!(path = %path.display(), "Skipped empty or too-short headline file");
            continue;
        }
        records.push(DigestRecord {
            digest_group_id: meta.digest_group_id(),
            digest_id: meta.digest_id.clone(),
            window_type: meta.window_type,
            topic: meta.topic,
            group_number: meta.group_number,
            headlines_file: path.display().to_string(),
            id_digest: format!("{id}_{i:03}"),
            content: content.to_string(),
        });
    }
    Ok(records)
}

/// Build the headline documents and the digest JSONL for one digest id.
#[instrument(level = "info", skip_all, fields(%digest_id, force))]
pub fn build_digest(
    layout: &DataLayout,
    digest_id: &DigestId,
    force: bool,
    min_rows: usize,
    max_rows: usize,
) -> Result<DigestOutcome> {
    let jsonl_path = layout.digest_jsonl_path(digest_id);
    if jsonl_path.exists() && !force {
        info!(path = %jsonl_path.display(), "Digest JSONL already exists; skipping");
        return Ok(DigestOutcome::Skipped);
    }

    let documents = render_slices(layout, digest_id, min_rows, max_rows)?;
    if documents == 0 {
        warn!("No headline documents for this digest id");
        return Ok(DigestOutcome::NoSlices);
    }

    let records = collect_records(&layout.digest_md_dir(), digest_id)?;
    write_jsonl(&jsonl_path, &records)?;
    info!(path = %jsonl_path.display(), documents, records = records.len(), "Saved digest JSONL");

    Ok(DigestOutcome::Written {
        path: jsonl_path,
        documents,
        records: records.len(),
    })
}

/// Run [`build_digest`] for one digest id or for all of them.
pub fn build_digests(
    layout: &DataLayout,
    selection: DigestSelection,
    force: bool,
    min_rows: usize,
    max_rows: usize,
) -> Result<Vec<(DigestId, DigestOutcome)>> {
    let ids: Vec<DigestId> = match selection {
        DigestSelection::One(id) => vec![id],
        DigestSelection::All => digest_ids_in(&layout.slice_dir())?.into_iter().collect(),
    };
    info!(count = ids.len(), "Building digests");
    ids.into_iter()
        .map(|id| build_digest(layout, &id, force, min_rows, max_rows).map(|outcome| (id, outcome)))
        .collect()
}
