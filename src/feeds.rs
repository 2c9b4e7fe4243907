//! Topic feed reading.
//!
//! Feeds are RSS 2.0 documents (Google News search results). Each `<item>`
//! becomes a [`RawFeedEntry`] tagged with the topic of the feed it came
//! from; the `<source url="…">Name</source>` element carries the outlet.

use crate::config::FeedConfig;
use crate::error::{PipelineError, Result};
use crate::models::{EntrySource, RawFeedEntry};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Feeds fetched at the same time.
const PARALLEL_FEEDS: usize = 4;

/// Anything that can turn a feed URL into raw entries.
pub trait FeedReader {
    async fn fetch(&self, topic: &str, url: &str, limit: usize) -> Result<Vec<RawFeedEntry>>;
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,
    #[serde(default)]
    source: Option<ItemSource>,
}

#[derive(Debug, Deserialize)]
struct ItemSource {
    #[serde(rename = "@url", default)]
    url: String,
    #[serde(rename = "$text", default)]
    name: String,
}

/// Parse an RSS document into at most `limit` entries, in feed order.
pub fn parse_rss(topic: &str, xml: &str, limit: usize) -> Result<Vec<RawFeedEntry>> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|source| PipelineError::Feed {
        topic: topic.to_string(),
        source,
    })?;

    Ok(rss
        .channel
        .items
        .into_iter()
        .take(limit)
        .map(|item| RawFeedEntry {
            topic: topic.to_string(),
            title: item.title,
            link: item.link,
            published: item.pub_date,
            source: item.source.map(|s| EntrySource {
                title: s.name.trim().to_string(),
                href: s.url,
            }),
        })
        .collect())
}

/// [`FeedReader`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedReader {
    client: reqwest::Client,
}

impl HttpFeedReader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| PipelineError::Http {
                url: String::new(),
                source,
            })?;
        Ok(HttpFeedReader { client })
    }
}

impl FeedReader for HttpFeedReader {
    #[instrument(level = "info", skip(self), fields(%topic))]
    async fn fetch(&self, topic: &str, url: &str, limit: usize) -> Result<Vec<RawFeedEntry>> {
        let http = |source| PipelineError::Http {
            url: url.to_string(),
            source,
        };
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?
            .text()
            .await
            .map_err(http)?;
        debug!(bytes = body.len(), "Downloaded feed");
        parse_rss(topic, &body, limit)
    }
}

/// Read every feed concurrently. A feed that fails is logged and contributes nothing.
#[instrument(level = "info", skip_all, fields(feeds = feeds.len(), limit))]
pub async fn fetch_all<R: FeedReader>(reader: &R, feeds: &[FeedConfig], limit: usize) -> Vec<RawFeedEntry> {
    let per_feed: Vec<Vec<RawFeedEntry>> = stream::iter(feeds)
        .map(|feed| async move {
            match reader.fetch(&feed.topic, &feed.url, limit).await {
                Ok(entries) => {
                    info!(topic = %feed.topic, count = entries.len(), "Fetched feed");
                    entries
                }
                Err(e) => {
                    error!(topic = %feed.topic, error = %e, "Feed fetch failed; skipping");
                    Vec::new()
                }
            }
        })
        .buffered(PARALLEL_FEEDS)
        .collect()
        .await;

    // buffered keeps configuration order, so the batch is reproducible
    per_feed.into_iter().flatten().collect()
}
