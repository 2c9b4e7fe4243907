//! Slice writer: persists the articles falling inside each planned window.
//!
//! One CSV per non-empty window, named `{label}_{YYYYMMDDTHHMM}.csv` after
//! the trigger, so the digest stage can find every slice of a run by
//! prefix. Windows overlap; an article may appear in several slices.

use crate::error::Result;
use crate::models::Article;
use crate::outputs::batch::write_articles;
use crate::windows::Window;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Describes one persisted slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceHandle {
    pub label: &'static str,
    /// `{label}_{YYYYMMDDTHHMM}`
    pub prefix: String,
    pub path: PathBuf,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub num_articles: usize,
}

/// File stem shared by every artifact derived from one window of one trigger.
pub fn slice_prefix(window: &Window, trigger: DateTime<Utc>) -> String {
    format!("{}_{}", window.label(), trigger.format("%Y%m%dT%H%M"))
}

/// Articles published inside `window`, bounds included, in input order.
pub fn select_window<'a>(articles: &'a [Article], window: &Window) -> Vec<&'a Article> {
    articles
        .iter()
        .filter(|a| window.contains(a.published))
        .collect()
}

/// Write one CSV per window with at least one matching article.
#[instrument(level = "info", skip_all, fields(slice_dir = %slice_dir.display(), %trigger, windows = windows.len()))]
pub fn write_slices(
    articles: &[Article],
    windows: &[Window],
    trigger: DateTime<Utc>,
    slice_dir: &Path,
) -> Result<Vec<SliceHandle>> {
    let mut handles = Vec::new();

    for window in windows {
        let selected: Vec<Article> = select_window(articles, window)
            .into_iter()
            .cloned()
            .collect();
        if selected.is_empty() {
            debug!(label = window.label(), "Window is empty; no slice written");
            continue;
        }

        let prefix = slice_prefix(window, trigger);
        let path = slice_dir.join(format!("{prefix}.csv"));
        write_articles(&path, &selected)?;
        info!(label = window.label(), path = %path.display(), count = selected.len(), "Wrote slice");

        handles.push(SliceHandle {
            label: window.label(),
            prefix,
            path,
            start: window.start,
            end: window.end,
            num_articles: selected.len(),
        });
    }

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use crate::outputs::batch::read_articles;
    use crate::windows::plan_windows;
    use chrono::{Duration, TimeZone};

    fn article(id: u32, published: DateTime<Utc>) -> Article {
        let title = format!("Titular {id}");
        Article {
            run_sequence_id: id,
            digest_id: None,
            identity: identity::hash(&title, "Ámbito"),
            topic: "Tipo de Cambio y Reservas".to_string(),
            title,
            link: format!("https://ambito.example/{id}"),
            published,
            source: "Ámbito".to_string(),
            source_url: "https://www.ambito.com".to_string(),
        }
    }

    #[test]
    fn test_boundary_articles_are_included() {
        let trigger = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let windows = plan_windows(trigger);
        let four = &windows[0];
        let articles = vec![
            article(1, four.start),
            article(2, four.end),
            article(3, four.start - Duration::seconds(1)),
            article(4, four.end + Duration::seconds(1)),
        ];
        let ids: Vec<u32> = select_window(&articles, four)
            .iter()
            .map(|a| a.run_sequence_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_write_slices_skips_empty_windows_and_names_files() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let windows = plan_windows(trigger); // 4h: [-8h,-2h], 8h: [-16h,-4h]
        let articles = vec![
            article(1, trigger - Duration::hours(12)), // only in 8h
            article(2, trigger - Duration::hours(5)),  // in both
        ];

        let handles = write_slices(&articles, &windows, trigger, dir.path()).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].prefix, "4h_window_20250601T0000");
        assert_eq!(handles[0].num_articles, 1);
        assert_eq!(handles[1].prefix, "8h_window_20250601T0000");
        assert_eq!(handles[1].num_articles, 2);

        let (eight, _) = read_articles(&dir.path().join("8h_window_20250601T0000.csv")).unwrap();
        assert_eq!(eight.len(), 2);
    }

    #[test]
    fn test_no_output_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let articles = vec![article(1, trigger - Duration::hours(100))];
        let handles = write_slices(&articles, &plan_windows(trigger), trigger, dir.path()).unwrap();
        assert!(handles.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
