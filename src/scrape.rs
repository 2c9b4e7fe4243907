//! Full-text capture for articles the LLM cited.
//!
//! Candidates come from `article_quotes/articles_to_scrape.jsonl`: mentions
//! resolved to an identity, with a link, not yet present in the scrape
//! log. The most recent are fetched first, up to a per-run limit. Each page
//! is reduced to the visible text of its `<body>` and appended to
//! `scraped_links.jsonl` as soon as it is captured.

use crate::config::DataLayout;
use crate::models::{ArticleMention, ScrapedRecord};
use crate::outputs::json::{append_jsonl, read_jsonl_lenient};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use scraper::{Html, Node, Selector};
use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Elements whose text never reaches the reader.
const HIDDEN: [&str; 4] = ["script", "style", "noscript", "template"];

/// Anything that can download a page.
pub trait PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Box<dyn Error>> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpPageFetcher { client })
    }
}

impl PageFetcher for HttpPageFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

/// Visible text of a page's `<body>`, one text run per line.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(body_selector) = Selector::parse("body") else {
        return String::new();
    };
    let Some(body) = document.select(&body_selector).next() else {
        return String::new();
    };

    let mut lines = Vec::new();
    for node in body.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| HIDDEN.iter().any(|h| *h == el.name()))
        });
        if hidden {
            continue;
        }
        let words = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !words.is_empty() {
            lines.push(words);
        }
    }
    lines.join("\n")
}

fn is_web_link(link: &str) -> bool {
    Url::parse(link.trim()).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Mentions worth fetching: resolved, linked, not yet captured, newest first.
pub fn select_candidates(
    mentions: Vec<ArticleMention>,
    scraped: &HashSet<String>,
    limit: usize,
) -> Vec<ArticleMention> {
    let mut candidates: Vec<ArticleMention> = mentions
        .into_iter()
        .filter(|m| {
            let (Some(id), Some(link)) = (&m.index_id, &m.link) else {
                return false;
            };
            is_web_link(link) && !scraped.contains(id)
        })
        .unique_by(|m| m.index_id.clone())
        .collect();
    // stable; undated mentions go last
    candidates.sort_by(|a, b| b.published.cmp(&a.published));
    candidates.truncate(limit);
    candidates
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub candidates: usize,
    pub scraped: usize,
    pub failed: usize,
}

/// Fetch up to `limit` pending articles and append their text to the scrape log.
#[instrument(level = "info", skip(layout, fetcher))]
pub async fn run_scrape<F: PageFetcher>(
    layout: &DataLayout,
    fetcher: &F,
    limit: usize,
) -> Result<ScrapeReport, Box<dyn Error>> {
    let input = layout.articles_to_scrape_path();
    if !input.exists() {
        warn!(path = %input.display(), "No article dataset to scrape");
        return Ok(ScrapeReport::default());
    }
    let mentions: Vec<ArticleMention> = read_jsonl_lenient(&input)?;
    let log_path = layout.scraped_path();
    let done: HashSet<String> = read_jsonl_lenient::<ScrapedRecord>(&log_path)?
        .into_iter()
        .map(|r| r.index_id)
        .collect();

    let candidates = select_candidates(mentions, &done, limit);
    info!(count = candidates.len(), already = done.len(), "Articles to scrape");

    let records: Vec<ScrapedRecord> = stream::iter(&candidates)
        .then(|m| async move {
            let link = m.link.as_deref().unwrap_or_default();
            match fetcher.fetch(link).await {
                Ok(html) => {
                    let text = extract_text(&html);
                    debug!(%link, bytes = text.len(), "Scraped article");
                    Some(ScrapedRecord {
                        index_id: m.index_id.clone().unwrap_or_default(),
                        link: link.to_string(),
                        title: m.indexed_title.clone().or_else(|| Some(m.title.clone())),
                        source: m.source.clone(),
                        published: m.published,
                        scraped_at: Utc::now(),
                        scraped_data: text,
                    })
                }
                Err(e) => {
                    error!(error = %e, %link, "Scrape failed");
                    None
                }
            }
        })
        .filter_map(|r| async move { r })
        .collect()
        .await;

    for record in &records {
        append_jsonl(&log_path, std::slice::from_ref(record)).await?;
    }

    let report = ScrapeReport {
        candidates: candidates.len(),
        scraped: records.len(),
        failed: candidates.len() - records.len(),
    };
    info!(scraped = report.scraped, failed = report.failed, "Scraping finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineMetadata;
    use crate::outputs::json::{read_jsonl, write_jsonl};
    use chrono::{DateTime, TimeZone};

    fn mention(id: Option<&str>, hour: Option<u32>) -> ArticleMention {
        ArticleMention {
            meta: LineMetadata {
                line_number: Some(0),
                id_digest: "2day_window_20250601T120000".to_string(),
                digest_group_id: "20250601T12::2day_window::Finanzas::01".to_string(),
                window_type: "2day_window".to_string(),
                topic: "Finanzas".to_string(),
                group_number: "01".to_string(),
            },
            cluster_topic: "Bonos".to_string(),
            article_id: "1".to_string(),
            title: format!("titulo {id:?}"),
            source_file: "pfout_20250601T12_120000.jsonl".to_string(),
            index_id: id.map(str::to_string),
            source: Some("Infobae".to_string()),
            indexed_title: None,
            published: hour.map(|h| Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0).unwrap()),
            link: id.map(|i| format!("https://infobae.example/{i}")),
            scraped_data: None,
        }
    }

    struct StaticPages;

    impl PageFetcher for StaticPages {
        async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
            if url.ends_with("/down") {
                return Err("connection refused".into());
            }
            Ok(format!("<html><body><h1>{url}</h1><script>var x;</script></body></html>"))
        }
    }

    #[test]
    fn test_extract_text_skips_hidden_elements() {
        let html = r#"<html><head><title>t</title></head><body>
            <h1>El  dólar   sube</h1>
            <script>track()</script><style>p{}</style>
            <p>Primer <b>párrafo</b></p>
        </body></html>"#;
        assert_eq!(extract_text(html), "El dólar sube\nPrimer\npárrafo");
    }

    #[test]
    fn test_select_candidates_filters_and_orders() {
        let scraped: HashSet<String> = ["done".to_string()].into();
        let picked = select_candidates(
            vec![
                mention(Some("old"), Some(3)),
                mention(None, Some(9)),
                mention(Some("done"), Some(10)),
                mention(Some("new"), Some(8)),
                mention(Some("new"), Some(8)),
                mention(Some("undated"), None),
                ArticleMention {
                    link: Some("javascript:void(0)".to_string()),
                    ..mention(Some("script"), Some(11))
                },
            ],
            &scraped,
            10,
        );
        let ids: Vec<&str> = picked.iter().filter_map(|m| m.index_id.as_deref()).collect();
        assert_eq!(ids, vec!["new", "old", "undated"]);

        let capped = select_candidates(vec![mention(Some("a"), Some(1)), mention(Some("b"), Some(2))], &scraped, 1);
        assert_eq!(capped[0].index_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_run_scrape_appends_and_skips_known() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        write_jsonl(
            &layout.articles_to_scrape_path(),
            &[mention(Some("a"), Some(5)), mention(Some("down"), Some(6))],
        )
        .unwrap();

        let first = run_scrape(&layout, &StaticPages, 50).await.unwrap();
        assert_eq!((first.candidates, first.scraped, first.failed), (2, 1, 1));

        let log: Vec<ScrapedRecord> = read_jsonl(&layout.scraped_path()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].index_id, "a");
        assert_eq!(log[0].scraped_data, "https://infobae.example/a");
        assert_eq!(
            log[0].published,
            Some(DateTime::parse_from_rfc3339("2025-06-01T05:00:00Z").unwrap().with_timezone(&Utc))
        );

        let second = run_scrape(&layout, &StaticPages, 50).await.unwrap();
        assert_eq!(second.candidates, 1);
        assert_eq!(read_jsonl::<ScrapedRecord>(&layout.scraped_path()).unwrap().len(), 1);
    }
}
