//! Data models shared across the pipeline stages.
//!
//! This module defines the records that flow between stages:
//! - [`RawFeedEntry`]: one unprocessed entry from a topic feed
//! - [`Article`]: a normalized, identity-stamped article (batch and slice CSV rows)
//! - [`BatchRow`]: a loosely-typed CSV row as found on disk, validated once on load
//! - [`MasterIndexRow`]: the durable, deduplicated record of an article
//! - [`DigestRecord`], [`DigestAnalysis`], [`PfOutRecord`]: the LLM boundary
//! - [`ArticleMention`], [`SeedIdea`], [`EnrichedIdea`], [`ScrapedRecord`]: exploded outputs
//!
//! CSV column names follow the established on-disk format (`Title`,
//! `Published`, `Source URL`, ...), hence the `serde(rename)` attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The `<source>` element of a feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySource {
    pub title: String,
    pub href: String,
}

/// An entry as returned by the feed-reading collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeedEntry {
    /// The topic (feed) under which the entry was retrieved.
    pub topic: String,
    pub title: String,
    pub link: String,
    pub published: Option<String>,
    pub source: Option<EntrySource>,
}

/// A normalized article.
///
/// `run_sequence_id` is the 1-based rank of the article in its batch after
/// sorting by `published`; it is unique only inside that batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(rename = "article_id")]
    pub run_sequence_id: u32,
    #[serde(default)]
    pub digest_id: Option<String>,
    #[serde(rename = "uid")]
    pub identity: String,
    #[serde(rename = "Topic")]
    pub topic: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Published")]
    pub published: DateTime<Utc>,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Source URL")]
    pub source_url: String,
}

/// A CSV row before validation. Every column is optional here; the stage
/// that loads the file decides which ones are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRow {
    #[serde(default)]
    pub article_id: Option<String>,
    #[serde(default)]
    pub digest_id: Option<String>,
    #[serde(default, alias = "identity")]
    pub uid: Option<String>,
    #[serde(rename = "Topic", default)]
    pub topic: Option<String>,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
    #[serde(rename = "Published", default)]
    pub published: Option<String>,
    #[serde(rename = "Source", default)]
    pub source: Option<String>,
    #[serde(rename = "Source URL", default)]
    pub source_url: Option<String>,
}

/// Trim a CSV cell and treat blank values as absent.
pub fn non_blank(cell: &Option<String>) -> Option<&str> {
    cell.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// One row of the master index.
///
/// `index_id` is the canonical identity. `published` is `None` when the
/// stored value could not be parsed; such rows order as the oldest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterIndexRow {
    pub index_id: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(rename = "Topic", default)]
    pub topic: Option<String>,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(
        rename = "Published",
        default,
        deserialize_with = "lenient_published"
    )]
    pub published: Option<DateTime<Utc>>,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
}

/// Deserialize a timestamp cell, mapping unparseable values to `None`.
pub fn lenient_published<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(crate::utils::parse_published))
}

/// One headline digest handed to the LLM stage (one line of `{digest_id}.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestRecord {
    pub digest_group_id: String,
    pub digest_id: String,
    pub window_type: String,
    pub topic: String,
    pub group_number: String,
    pub headlines_file: String,
    pub id_digest: String,
    pub content: String,
}

/// Structured answer expected from the LLM for one digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigestAnalysis {
    #[serde(default)]
    pub clustered_agenda_table: AgendaTable,
    #[serde(default)]
    pub seed_ideas: SeedIdeaList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgendaTable {
    #[serde(default)]
    pub clustered_agenda_table: Vec<AgendaCluster>,
}

/// A group of headlines the LLM judged to cover the same story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaCluster {
    pub topic: String,
    #[serde(deserialize_with = "ids_as_strings")]
    pub article_ids: Vec<String>,
    #[serde(default)]
    pub deduplicated_titles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedIdeaList {
    #[serde(default)]
    pub seed_ideas: Vec<Map<String, Value>>,
}

/// Article ids come back from the model as numbers or strings.
fn ids_as_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Value> = Vec::deserialize(deserializer)?;
    Ok(values.iter().map(value_as_key).collect())
}

/// Render a JSON scalar the way it is used in join keys (`7`, not `"7"`).
pub fn value_as_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One line of an LLM output file (`pfout_{digest_id}_{HHMMSS}.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PfOutRecord {
    #[serde(default)]
    pub line_number: Option<u64>,
    pub digest_group_id: String,
    #[serde(flatten)]
    pub analysis: DigestAnalysis,
}

/// Provenance shared by every record exploded from one LLM output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMetadata {
    #[serde(default)]
    pub line_number: Option<u64>,
    pub id_digest: String,
    pub digest_group_id: String,
    pub window_type: String,
    pub topic: String,
    pub group_number: String,
}

impl LineMetadata {
    pub const FIELDS: [&'static str; 6] = [
        "line_number",
        "id_digest",
        "digest_group_id",
        "window_type",
        "topic",
        "group_number",
    ];
}

/// An article referenced by an LLM agenda cluster, optionally enriched
/// with master index metadata and scraped text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMention {
    #[serde(flatten)]
    pub meta: LineMetadata,
    pub cluster_topic: String,
    pub article_id: String,
    pub title: String,
    pub source_file: String,
    #[serde(default)]
    pub index_id: Option<String>,
    #[serde(rename = "Source", default)]
    pub source: Option<String>,
    #[serde(rename = "Title", default)]
    pub indexed_title: Option<String>,
    #[serde(rename = "Published", default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
    #[serde(default)]
    pub scraped_data: Option<String>,
}

/// A seed idea proposed by the LLM. The idea body is kept as free-form JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedIdea {
    #[serde(flatten)]
    pub meta: LineMetadata,
    pub source_file: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SeedIdea {
    pub fn field_key(&self, name: &str) -> String {
        self.fields.get(name).map(value_as_key).unwrap_or_default()
    }

    /// Article ids the idea was derived from.
    pub fn source_ids(&self) -> Vec<String> {
        match self.fields.get("source_ids") {
            Some(Value::Array(ids)) => ids.iter().map(value_as_key).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![value_as_key(single)],
        }
    }
}

/// A seed idea joined to one of the articles it cites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedIdea {
    #[serde(flatten)]
    pub idea: SeedIdea,
    pub source_id: String,
    pub key: String,
    pub title: Option<String>,
    pub cluster_topic: Option<String>,
    pub index_id: Option<String>,
}

/// Page text captured for one article (one line of `scraped_links.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub index_id: String,
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub scraped_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pfout_record_deserialization() {
        let line = r#"{
            "line_number": 3,
            "digest_group_id": "20250601T12::2day_window::Finanzas::01",
            "clustered_agenda_table": {"clustered_agenda_table": [
                {"topic": "Bonos", "article_ids": [1, "2"], "deduplicated_titles": ["A", "B"]}
            ]},
            "seed_ideas": {"seed_ideas": [{"idea_id": 1, "idea_title": "Deuda", "source_ids": [1]}]}
        }"#;
        let rec: PfOutRecord = serde_json::from_str(line).unwrap();
        assert_eq!(rec.line_number, Some(3));
        let cluster = &rec.analysis.clustered_agenda_table.clustered_agenda_table[0];
        assert_eq!(cluster.article_ids, vec!["1", "2"]);
        assert_eq!(rec.analysis.seed_ideas.seed_ideas.len(), 1);
    }

    #[test]
    fn test_analysis_tolerates_missing_sections() {
        let a: DigestAnalysis = serde_json::from_str("{}").unwrap();
        assert!(a.clustered_agenda_table.clustered_agenda_table.is_empty());
        assert!(a.seed_ideas.seed_ideas.is_empty());
    }

    #[test]
    fn test_seed_idea_flattening() {
        let idea = SeedIdea {
            meta: LineMetadata {
                line_number: Some(0),
                id_digest: "2day_window_20250601T120000".to_string(),
                digest_group_id: "20250601T12::2day_window::Finanzas::01".to_string(),
                window_type: "2day_window".to_string(),
                topic: "Finanzas".to_string(),
                group_number: "01".to_string(),
            },
            source_file: "pfout_20250601T12_120000.jsonl".to_string(),
            fields: serde_json::from_str(r#"{"idea_id": 4, "idea_title": "X", "source_ids": [2, "5"]}"#)
                .unwrap(),
        };
        let json = serde_json::to_string(&idea).unwrap();
        let back: SeedIdea = serde_json::from_str(&json).unwrap();
        assert_eq!(back.meta, idea.meta);
        assert_eq!(back.field_key("idea_id"), "4");
        assert_eq!(back.source_ids(), vec!["2", "5"]);
        assert!(!back.fields.contains_key("window_type"));
    }

    #[test]
    fn test_master_row_lenient_published() {
        let data = "index_id,uid,Topic,Title,Published,Source,Link\n\
                    abc,,Finanzas,T,not a date,Infobae,http://x\n";
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let row: MasterIndexRow = rdr.deserialize().next().unwrap().unwrap();
        assert_eq!(row.published, None);
        assert_eq!(row.uid, None);
        assert_eq!(row.topic.as_deref(), Some("Finanzas"));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(&Some("  ".to_string())), None);
        assert_eq!(non_blank(&Some(" a ".to_string())), Some("a"));
        assert_eq!(non_blank(&None), None);
    }
}
