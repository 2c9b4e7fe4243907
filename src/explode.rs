//! Explode LLM outputs into per-article and per-idea records.
//!
//! Each `pfout_*.jsonl` line carries the agenda clusters and seed ideas the
//! model produced for one headline digest. They are flattened into
//! [`ArticleMention`] and [`SeedIdea`] rows that keep the provenance of the
//! line they came from. Output files are cumulative: new rows are appended
//! to what earlier runs exploded and repeats are dropped, earliest kept.
//!
//! Mentions are then enriched: the slice a digest was built from maps the
//! per-run `article_id` to an identity, the master index supplies the
//! article's metadata, and the scrape log its page text.

use crate::config::DataLayout;
use crate::digest_id::DigestId;
use crate::error::{PipelineError, Result};
use crate::master_index::MasterIndex;
use crate::models::{
    ArticleMention, EnrichedIdea, LineMetadata, MasterIndexRow, PfOutRecord, ScrapedRecord, SeedIdea,
};
use crate::outputs::batch::read_articles;
use crate::outputs::json::{read_jsonl, read_jsonl_lenient, write_jsonl};
use crate::utils::list_files;
use itertools::Itertools;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Counts reported by one [`explode`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplodeReport {
    pub files: usize,
    pub new_mentions: usize,
    pub new_ideas: usize,
    pub total_mentions: usize,
    pub total_ideas: usize,
    /// Mentions resolved to a master index identity.
    pub resolved: usize,
}

/// Provenance for one LLM output line, from its `digest_group_id`.
pub fn line_metadata(file: &Path, line_number: Option<u64>, digest_group_id: &str) -> Result<LineMetadata> {
    let parts: Vec<&str> = digest_group_id.splitn(4, "::").collect();
    let [digest_ts, window_type, topic, group_number] = parts[..] else {
        return Err(PipelineError::Malformed {
            file: file.to_path_buf(),
            reason: format!("digest_group_id {digest_group_id:?} does not have four '::' parts"),
        });
    };
    Ok(LineMetadata {
        line_number,
        id_digest: format!("{window_type}_{digest_ts}0000"),
        digest_group_id: digest_group_id.to_string(),
        window_type: window_type.to_string(),
        topic: topic.to_string(),
        group_number: group_number.to_string(),
    })
}

/// `id_digest` with the seconds dropped: the slice file stem the digest was built from.
///
/// `2day_window_20250601T120000` becomes `2day_window_20250601T1200`.
pub fn digest_file(id_digest: &str) -> &str {
    match id_digest.rfind('T') {
        Some(t) if id_digest.len() >= t + 5 => &id_digest[..t + 5],
        _ => id_digest,
    }
}

/// Join key shared by mentions and seed ideas: `{digest_file}::{article_id}`.
pub fn mention_key(id_digest: &str, article_id: &str) -> String {
    format!("{}::{}", digest_file(id_digest), article_id.trim())
}

/// Flatten one LLM output file.
pub fn explode_file(path: &Path) -> Result<(Vec<ArticleMention>, Vec<SeedIdea>)> {
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let records: Vec<PfOutRecord> = read_jsonl(path)?;

    let mut mentions = Vec::new();
    let mut ideas = Vec::new();
    for record in records {
        let meta = line_metadata(path, record.line_number, &record.digest_group_id)?;

        for cluster in &record.analysis.clustered_agenda_table.clustered_agenda_table {
            for (article_id, title) in cluster.article_ids.iter().zip(&cluster.deduplicated_titles) {
                mentions.push(ArticleMention {
                    meta: meta.clone(),
                    cluster_topic: cluster.topic.clone(),
                    article_id: article_id.clone(),
                    title: title.clone(),
                    source_file: source_file.clone(),
                    index_id: None,
                    source: None,
                    indexed_title: None,
                    published: None,
                    link: None,
                    scraped_data: None,
                });
            }
        }

        for idea in &record.analysis.seed_ideas.seed_ideas {
            let mut fields = idea.clone();
            // provenance columns belong to the line, not to the model's answer
            for key in LineMetadata::FIELDS.iter().chain(&["source_file"]) {
                fields.remove(*key);
            }
            ideas.push(SeedIdea {
                meta: meta.clone(),
                source_file: source_file.clone(),
                fields,
            });
        }
    }
    debug!(path = %path.display(), mentions = mentions.len(), ideas = ideas.len(), "Exploded file");
    Ok((mentions, ideas))
}

/// Append `new` to `existing`, keeping the first row per key.
fn merge_unique<T, K: Eq + Hash>(existing: Vec<T>, new: Vec<T>, key: impl Fn(&T) -> K) -> (Vec<T>, usize) {
    let before = existing.len();
    let combined: Vec<T> = existing.into_iter().chain(new).unique_by(key).collect();
    let added = combined.len().saturating_sub(before);
    (combined, added)
}

fn mention_dedup_key(m: &ArticleMention) -> (String, String, String) {
    (m.article_id.clone(), m.title.clone(), m.source_file.clone())
}

fn idea_dedup_key(i: &SeedIdea) -> (String, String, String) {
    (i.field_key("idea_id"), i.field_key("idea_title"), i.source_file.clone())
}

/// Slice file for `stem` (`{window}_{YYYYMMDDTHHMM}`).
///
/// A fetch triggered off the hour names its slices with the trigger minute,
/// so when the `…HH00` file is missing any slice of the same window and hour
/// is taken, earliest minute first.
fn locate_slice(slice_dir: &Path, stem: &str) -> Option<PathBuf> {
    let exact = slice_dir.join(format!("{stem}.csv"));
    if exact.exists() {
        return Some(exact);
    }
    let hour_prefix = stem.get(..stem.len().checked_sub(2)?)?;
    let candidates = list_files(slice_dir, |name| {
        name.strip_suffix(".csv")
            .and_then(|s| s.strip_prefix(hour_prefix))
            .is_some_and(|minute| minute.len() == 2 && minute.bytes().all(|b| b.is_ascii_digit()))
    })
    .ok()?;
    candidates.into_iter().next()
}

/// Lookups used to enrich mentions.
struct Enricher<'a> {
    slice_dir: PathBuf,
    /// slice stem -> (article_id -> identity); `None` when the slice is unreadable.
    slices: HashMap<String, Option<HashMap<String, String>>>,
    index: HashMap<&'a str, &'a MasterIndexRow>,
    scraped: HashMap<String, String>,
}

impl Enricher<'_> {
    fn identity_for(&mut self, id_digest: &str, article_id: &str) -> Option<String> {
        let stem = digest_file(id_digest).to_string();
        let slice_dir = &self.slice_dir;
        let ids = self.slices.entry(stem.clone()).or_insert_with(|| {
            let Some(path) = locate_slice(slice_dir, &stem) else {
                debug!(%stem, "Slice for digest not found");
                return None;
            };
            match read_articles(&path) {
                Ok((articles, _)) => Some(
                    articles
                        .into_iter()
                        .map(|a| (a.run_sequence_id.to_string(), a.identity))
                        .collect(),
                ),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Slice unreadable; mentions stay unresolved");
                    None
                }
            }
        });
        ids.as_ref()?.get(article_id.trim()).cloned()
    }

    fn enrich(&mut self, mention: &mut ArticleMention) -> bool {
        if let Some(identity) = self.identity_for(&mention.meta.id_digest, &mention.article_id) {
            mention.index_id = Some(identity);
        }
        let Some(identity) = mention.index_id.clone() else {
            return false;
        };
        if let Some(row) = self.index.get(identity.as_str()) {
            mention.source = Some(row.source.clone());
            mention.indexed_title = Some(row.title.clone());
            mention.published = row.published;
            mention.link = row.link.clone();
        }
        if let Some(text) = self.scraped.get(&identity) {
            mention.scraped_data = Some(text.clone());
        }
        true
    }
}

/// Explode every LLM output of `digest_id` (all of them when `None`) and
/// refresh the cumulative article and idea files.
#[instrument(level = "info", skip_all, fields(digest_id = ?digest_id.map(ToString::to_string)))]
pub fn explode(layout: &DataLayout, digest_id: Option<&DigestId>) -> Result<ExplodeReport> {
    let prefix = match digest_id {
        Some(id) => format!("pfout_{id}_"),
        None => "pfout_".to_string(),
    };
    let files = list_files(&layout.pf_out_dir(), |name| name.starts_with(&prefix) && name.ends_with(".jsonl"))?;
    info!(count = files.len(), "Found LLM output files to process");

    let mut new_mentions = Vec::new();
    let mut new_ideas = Vec::new();
    for file in &files {
        let (mentions, ideas) = explode_file(file)?;
        new_mentions.extend(mentions);
        new_ideas.extend(ideas);
    }

    let articles_path = layout.articles_exploded_path();
    let ideas_path = layout.ideas_exploded_path();
    let (mut mentions, added_mentions) =
        merge_unique(read_jsonl(&articles_path)?, new_mentions, mention_dedup_key);
    let (ideas, added_ideas) = merge_unique(read_jsonl(&ideas_path)?, new_ideas, idea_dedup_key);

    let index = MasterIndex::load(&layout.master_index_path())?;
    let scraped: Vec<ScrapedRecord> = read_jsonl_lenient(&layout.scraped_path())?;
    let mut enricher = Enricher {
        slice_dir: layout.slice_dir(),
        slices: HashMap::new(),
        index: index.by_identity(),
        scraped: scraped
            .into_iter()
            .map(|r| (r.index_id, r.scraped_data))
            .collect(),
    };
    let mut resolved = 0usize;
    for mention in mentions.iter_mut() {
        if enricher.enrich(mention) {
            resolved += 1;
        }
    }

    write_jsonl(&articles_path, &mentions)?;
    write_jsonl(&layout.articles_to_scrape_path(), &mentions)?;
    write_jsonl(&ideas_path, &ideas)?;

    let report = ExplodeReport {
        files: files.len(),
        new_mentions: added_mentions,
        new_ideas: added_ideas,
        total_mentions: mentions.len(),
        total_ideas: ideas.len(),
        resolved,
    };
    info!(
        files = report.files,
        new_mentions = report.new_mentions,
        new_ideas = report.new_ideas,
        total_mentions = report.total_mentions,
        total_ideas = report.total_ideas,
        resolved = report.resolved,
        "Exploded LLM outputs"
    );
    Ok(report)
}

/// Join every seed idea to the mentions it cites.
///
/// Ideas are exploded once per `source_ids` entry; each row carries the
/// title, cluster topic and identity of the mention with the same
/// `{digest_file}::{article_id}` key, or `None` when there is no match.
#[instrument(level = "info", skip_all)]
pub fn compile_ideas(layout: &DataLayout) -> Result<usize> {
    let mentions: Vec<ArticleMention> = read_jsonl(&layout.articles_exploded_path())?;
    let ideas: Vec<SeedIdea> = read_jsonl(&layout.ideas_exploded_path())?;

    let mut by_key: HashMap<String, &ArticleMention> = HashMap::with_capacity(mentions.len());
    for m in &mentions {
        by_key
            .entry(mention_key(&m.meta.id_digest, &m.article_id))
            .or_insert(m);
    }

    let mut enriched = Vec::new();
    for idea in &ideas {
        for source_id in idea.source_ids() {
            let key = mention_key(&idea.meta.id_digest, &source_id);
            let hit = by_key.get(&key);
            enriched.push(EnrichedIdea {
                idea: idea.clone(),
                source_id,
                title: hit.map(|m| m.title.clone()),
                cluster_topic: hit.map(|m| m.cluster_topic.clone()),
                index_id: hit.and_then(|m| m.index_id.clone()),
                key,
            });
        }
    }

    write_jsonl(&layout.enriched_ideas_path(), &enriched)?;
    let joined = enriched.iter().filter(|e| e.title.is_some()).count();
    info!(rows = enriched.len(), joined, "Compiled seed ideas");
    Ok(enriched.len())
}
