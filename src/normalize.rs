//! Article normalization for one fetch batch.
//!
//! Turns raw feed entries into [`Article`]s: titles are cleaned, an identity
//! is derived, repeats inside the batch are dropped, rows whose timestamp
//! cannot be parsed are filtered out, and the survivors are ranked by
//! publication time. Dropped rows are counted, never surfaced as errors.

use crate::identity;
use crate::models::{Article, RawFeedEntry};
use crate::utils::parse_published;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Placeholder for source fields the feed did not provide.
pub const MISSING: &str = "N/A";

/// Output of [`normalize`]: the articles plus diagnostics about what was dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Sorted by `published` ascending, `run_sequence_id` = 1-based rank.
    pub articles: Vec<Article>,
    pub duplicates_dropped: usize,
    pub unparseable_dropped: usize,
}

/// Strip a trailing `" - <source name>"` suffix from a feed title.
///
/// Only the last separator is considered, so titles containing dashes keep
/// everything before the final one.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_title("Sube el dólar - Infobae"), "Sube el dólar");
/// assert_eq!(clean_title("Sin fuente"), "Sin fuente");
/// ```
pub fn clean_title(title: &str) -> String {
    match title.rsplit_once(" - ") {
        Some((head, _)) => head.trim().to_string(),
        None => title.trim().to_string(),
    }
}

/// Normalize one batch of raw entries. `digest_id` is stamped on every row.
#[instrument(level = "info", skip_all, fields(entries = raw_entries.len()))]
pub fn normalize(raw_entries: Vec<RawFeedEntry>, digest_id: Option<&str>) -> NormalizedBatch {
    let mut seen: HashSet<String> = HashSet::with_capacity(raw_entries.len());
    let mut duplicates_dropped = 0usize;
    let mut unparseable_dropped = 0usize;
    let mut kept = Vec::with_capacity(raw_entries.len());

    for entry in raw_entries {
        let title = clean_title(&entry.title);
        let (source, source_url) = match entry.source {
            Some(src) => (src.title, src.href),
            None => (MISSING.to_string(), MISSING.to_string()),
        };
        let uid = identity::hash(&title, &source);

        // identity dedup runs before timestamp validation; first sighting wins
        if !seen.insert(uid.clone()) {
            duplicates_dropped += 1;
            continue;
        }

        let Some(published) = entry.published.as_deref().and_then(parse_published) else {
            debug!(%uid, raw = ?entry.published, "Dropping entry with unparseable timestamp");
            unparseable_dropped += 1;
            continue;
        };

        kept.push(Article {
            run_sequence_id: 0,
            digest_id: digest_id.map(str::to_string),
            identity: uid,
            topic: entry.topic,
            title,
            link: entry.link,
            published,
            source,
            source_url,
        });
    }

    // stable: equal timestamps keep feed order
    kept.sort_by_key(|a| a.published);
    for (rank, article) in kept.iter_mut().enumerate() {
        article.run_sequence_id = rank as u32 + 1;
    }

    info!(
        kept = kept.len(),
        duplicates_dropped, unparseable_dropped, "Normalized fetch batch"
    );

    NormalizedBatch {
        articles: kept,
        duplicates_dropped,
        unparseable_dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntrySource;
    use chrono::{TimeZone, Utc};

    fn entry(topic: &str, title: &str, published: Option<&str>, source: Option<&str>) -> RawFeedEntry {
        RawFeedEntry {
            topic: topic.to_string(),
            title: title.to_string(),
            link: format!("https://news.example/{}", title.len()),
            published: published.map(str::to_string),
            source: source.map(|s| EntrySource {
                title: s.to_string(),
                href: format!("https://{}.example", s.to_lowercase()),
            }),
        }
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("Sube el dólar - Infobae"), "Sube el dólar");
        assert_eq!(
            clean_title("Milei - Caputo: reunión clave - La Nación"),
            "Milei - Caputo: reunión clave"
        );
        assert_eq!(clean_title("  Sin fuente  "), "Sin fuente");
    }

    #[test]
    fn test_normalize_sorts_and_ranks() {
        let batch = normalize(
            vec![
                entry("Finanzas", "B - Clarín", Some("Mon, 02 Jun 2025 15:00:00 GMT"), Some("Clarín")),
                entry("Finanzas", "A - Infobae", Some("Mon, 02 Jun 2025 09:00:00 GMT"), Some("Infobae")),
                entry("Finanzas", "C - Ámbito", Some("Mon, 02 Jun 2025 12:00:00 GMT"), Some("Ámbito")),
            ],
            Some("20250602T16"),
        );
        let titles: Vec<&str> = batch.articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C", "B"]);
        let ranks: Vec<u32> = batch.articles.iter().map(|a| a.run_sequence_id).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(
            batch.articles[0].published,
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
        );
        assert!(batch.articles.iter().all(|a| a.digest_id.as_deref() == Some("20250602T16")));
    }

    #[test]
    fn test_normalize_dedups_first_occurrence_wins() {
        let batch = normalize(
            vec![
                entry("Finanzas", "Suben los bonos - Infobae", Some("2025-06-02T10:00:00Z"), Some("Infobae")),
                entry("Deuda y Financiamiento", "Suben los bonos - Infobae", Some("2025-06-02T11:00:00Z"), Some("Infobae")),
                entry("Finanzas", "Suben los bonos - Clarín", Some("2025-06-02T11:00:00Z"), Some("Clarín")),
            ],
            None,
        );
        assert_eq!(batch.articles.len(), 2);
        assert_eq!(batch.duplicates_dropped, 1);
        let infobae = batch.articles.iter().find(|a| a.source == "Infobae").unwrap();
        assert_eq!(infobae.topic, "Finanzas");

        let ids: HashSet<&str> = batch.articles.iter().map(|a| a.identity.as_str()).collect();
        assert_eq!(ids.len(), batch.articles.len());
    }

    #[test]
    fn test_normalize_drops_unparseable_timestamps() {
        let batch = normalize(
            vec![
                entry("Finanzas", "Sin fecha", None, Some("Infobae")),
                entry("Finanzas", "Fecha rota", Some("mañana"), Some("Infobae")),
                entry("Finanzas", "Con fecha", Some("2025-06-02T10:00:00Z"), Some("Infobae")),
            ],
            None,
        );
        assert_eq!(batch.articles.len(), 1);
        assert_eq!(batch.unparseable_dropped, 2);
        assert_eq!(batch.articles[0].run_sequence_id, 1);
    }

    #[test]
    fn test_normalize_defaults_missing_source() {
        let batch = normalize(
            vec![entry("Finanzas", "Huérfana", Some("2025-06-02T10:00:00Z"), None)],
            None,
        );
        let a = &batch.articles[0];
        assert_eq!(a.source, MISSING);
        assert_eq!(a.source_url, MISSING);
        assert_eq!(a.identity, identity::hash("Huérfana", MISSING));
    }

    #[test]
    fn test_normalize_empty_batch() {
        let batch = normalize(Vec::new(), None);
        assert!(batch.articles.is_empty());
        assert_eq!(batch.duplicates_dropped + batch.unparseable_dropped, 0);
    }
}
