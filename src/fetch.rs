//! Fetch stage: feeds in, normalized batch and window slices out.
//!
//! Windows are planned from the exact trigger instant and slices carry its
//! `YYYYMMDDTHHMM` stamp. The batch file and the `digest_id` column use the
//! hour the trigger falls in.

use crate::config::PipelineConfig;
use crate::digest_id::DigestId;
use crate::feeds::{fetch_all, FeedReader};
use crate::normalize::normalize;
use crate::outputs::batch::write_articles;
use crate::outputs::slices::{write_slices, SliceHandle};
use crate::windows::plan_windows;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub fetched: usize,
    pub kept: usize,
    pub duplicates_dropped: usize,
    pub unparseable_dropped: usize,
    /// `None` when the feeds produced no usable article.
    pub batch_path: Option<PathBuf>,
    pub slices: Vec<SliceHandle>,
}

/// Run one fetch cycle triggered at `trigger`.
#[instrument(level = "info", skip_all, fields(%trigger))]
pub async fn run_fetch<R: FeedReader>(
    config: &PipelineConfig,
    reader: &R,
    trigger: DateTime<Utc>,
) -> Result<FetchReport, Box<dyn Error>> {
    let layout = config.layout();
    let digest_id = &DigestId::from_timestamp(trigger);

    let entries = fetch_all(reader, &config.feeds, config.max_articles).await;
    let fetched = entries.len();
    let batch = normalize(entries, Some(&digest_id.to_string()));

    let mut report = FetchReport {
        fetched,
        kept: batch.articles.len(),
        duplicates_dropped: batch.duplicates_dropped,
        unparseable_dropped: batch.unparseable_dropped,
        batch_path: None,
        slices: Vec::new(),
    };
    if batch.articles.is_empty() {
        warn!(fetched, "No usable articles in this batch; nothing written");
        return Ok(report);
    }

    let batch_path = layout.hourly_dump_path(digest_id);
    write_articles(&batch_path, &batch.articles)?;
    info!(path = %batch_path.display(), count = batch.articles.len(), "Wrote normalized batch");
    report.batch_path = Some(batch_path);

    let windows = plan_windows(trigger);
    report.slices = write_slices(&batch.articles, &windows, trigger, &layout.slice_dir())?;
    info!(
        windows = windows.len(),
        slices = report.slices.len(),
        "Fetch cycle finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::error::Result;
    use crate::models::{EntrySource, RawFeedEntry};
    use crate::outputs::batch::read_articles;
    use crate::utils::parse_trigger_time;

    struct CannedFeed;

    fn entry(title: &str, published: &str) -> RawFeedEntry {
        RawFeedEntry {
            topic: "Finanzas".to_string(),
            title: format!("{title} - Ámbito"),
            link: format!("https://news.example/{}", title.len()),
            published: Some(published.to_string()),
            source: Some(EntrySource {
                title: "Ámbito".to_string(),
                href: "https://www.ambito.com".to_string(),
            }),
        }
    }

    impl FeedReader for CannedFeed {
        async fn fetch(&self, topic: &str, _url: &str, _limit: usize) -> Result<Vec<RawFeedEntry>> {
            if topic != "Finanzas" {
                return Ok(Vec::new());
            }
            Ok(vec![
                entry("Riesgo país en baja", "Sun, 01 Jun 2025 06:00:00 GMT"),
                entry("Licitación del Tesoro", "Sat, 31 May 2025 06:00:00 GMT"),
                entry("Riesgo país en baja", "Sun, 01 Jun 2025 07:00:00 GMT"),
                entry("Sin fecha", "mañana"),
            ])
        }
    }

    fn config(root: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: root.to_path_buf(),
            feeds: vec![FeedConfig {
                topic: "Finanzas".to_string(),
                url: "http://feed".to_string(),
            }],
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_fetch_writes_batch_and_slices() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let id: DigestId = "20250601T12".parse().unwrap();

        let report = run_fetch(&config, &CannedFeed, id.trigger_time()).await.unwrap();
        assert_eq!(report.fetched, 4);
        assert_eq!((report.kept, report.duplicates_dropped, report.unparseable_dropped), (2, 1, 1));

        let batch_path = report.batch_path.unwrap();
        assert!(batch_path.ends_with("rss_slices/rss_hourly_dumps/rss_dumps_20250601T1200.csv"));
        let (articles, _) = read_articles(&batch_path).unwrap();
        assert_eq!(articles[0].title, "Licitación del Tesoro");
        assert_eq!(articles[0].digest_id.as_deref(), Some("20250601T12"));

        let prefixes: Vec<&str> = report.slices.iter().map(|s| s.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["4h_window_20250601T1200", "2day_window_20250601T1200"]);
        assert!(config.layout().slice_dir().join("2day_window_20250601T1200.csv").exists());
    }

    #[tokio::test]
    async fn test_run_fetch_with_empty_feeds_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.feeds[0].topic = "Sector Externo".to_string();
        let id: DigestId = "20250601T12".parse().unwrap();

        let report = run_fetch(&config, &CannedFeed, id.trigger_time()).await.unwrap();
        assert_eq!(report.kept, 0);
        assert!(report.batch_path.is_none());
        assert!(!config.layout().rss_root().exists());
    }

    #[tokio::test]
    async fn test_run_fetch_plans_windows_from_exact_trigger_minute() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        // 4h window of a 12:34 trigger is [04:34, 10:34]; 10:20 is inside it
        let trigger = parse_trigger_time("2025-06-01T12:34").unwrap();

        let report = run_fetch(&config, &CannedLateMorning, trigger).await.unwrap();
        let batch_path = report.batch_path.unwrap();
        assert!(batch_path.ends_with("rss_dumps_20250601T1200.csv"));

        let four_hour = report
            .slices
            .iter()
            .find(|s| s.label == "4h_window")
            .expect("4h slice written");
        assert_eq!(four_hour.prefix, "4h_window_20250601T1234");
        assert_eq!(four_hour.end, trigger - chrono::Duration::hours(2));
        assert_eq!(four_hour.num_articles, 1);

        let (articles, _) = read_articles(&four_hour.path).unwrap();
        assert_eq!(articles[0].title, "Reservas del BCRA");
        assert_eq!(articles[0].digest_id.as_deref(), Some("20250601T12"));
    }

    struct CannedLateMorning;

    impl FeedReader for CannedLateMorning {
        async fn fetch(&self, _topic: &str, _url: &str, _limit: usize) -> Result<Vec<RawFeedEntry>> {
            Ok(vec![entry("Reservas del BCRA", "Sun, 01 Jun 2025 10:20:00 GMT")])
        }
    }
}
