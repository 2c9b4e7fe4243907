//! Pipeline configuration and on-disk layout.
//!
//! Configuration is read from an optional YAML file; anything the file
//! leaves out falls back to the defaults below (the Argentine economy
//! topic feeds, `./data` as the data directory). [`DataLayout`] derives
//! every path a stage reads or writes from the data directory, so no stage
//! hard-codes a location.

use crate::digest_id::DigestId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// One topic feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub topic: String,
    pub url: String,
}

impl FeedConfig {
    fn new(topic: &str, url: &str) -> Self {
        FeedConfig {
            topic: topic.to_string(),
            url: url.to_string(),
        }
    }
}

/// Settings for the LLM summarization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Name of the chat template loaded from the LLM client's config directory.
    pub template: String,
    /// Explicit path to the LLM client's `config.yaml`; defaults to its config directory.
    pub config_path: Option<PathBuf>,
    /// Digests summarized concurrently.
    pub parallel_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            template: "digest_parser".to_string(),
            config_path: None,
            parallel_requests: 12,
        }
    }
}

/// Settings for the optional full-text scrape stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub enabled: bool,
    /// Maximum pages fetched per run.
    pub limit: usize,
    pub timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            enabled: false,
            limit: 50,
            timeout_secs: 15,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    /// Entries kept from each feed per fetch.
    pub max_articles: usize,
    pub feeds: Vec<FeedConfig>,
    pub min_group_rows: usize,
    pub max_group_rows: usize,
    pub llm: LlmConfig,
    pub scrape: ScrapeConfig,
    pub interval_minutes: u64,
    pub backfill_hours: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("./data"),
            max_articles: 100,
            feeds: default_feeds(),
            min_group_rows: 5,
            max_group_rows: 25,
            llm: LlmConfig::default(),
            scrape: ScrapeConfig::default(),
            interval_minutes: 1,
            backfill_hours: 0,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or return the defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(PipelineConfig::default());
        };
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&text)?;
        info!(feeds = config.feeds.len(), data_dir = %config.data_dir.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// The Google News searches polled by default, one per topic.
pub fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig::new(
            "Inflación y Precios",
            "https://news.google.com/rss/search?q=(%22inflación%22+OR+%22IPC%22+OR+%22canasta+básica%22+OR+INDEC+OR+consultoras)+Argentina&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Tipo de Cambio y Reservas",
            "https://news.google.com/rss/search?q=dólar+OR+blue+OR+oficial+OR+reservas+OR+BCRA+OR+intervención+OR+futuros+OR+planchado&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Deuda y Financiamiento",
            "https://news.google.com/rss/search?q=bono+OR+licitación+OR+vencimientos+OR+Bonte+OR+tasa+OR+rollover&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Actividad y Empleo",
            "https://news.google.com/rss/search?q=subsidios+OR+paritarias+OR+gremios+OR+conciliación+OR+emple+OR+trabaj+OR+informal+OR+desemple+OR+EPH+OR+salarios&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Sector Externo",
            "https://news.google.com/rss/search?q=(comerc+exterior+OR+balanz+argentin+OR+export+OR+import+OR+arancel)+site:infobae.com+OR+site:lanacion.com.ar+OR+site:clarin.com+OR+site:ambito.com.ar+OR+site:telam.com.ar+OR+site:iprofesional.com&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Finanzas",
            "https://news.google.com/rss/search?q=(gasto+public+OR+ajuste+fiscal+OR+deficit+OR+superavit+OR+BCRA+OR+presupuesto+OR+bono+OR+banco+OR+riesgo+pais+OR+tasa+interes+OR+financier)&site:ambito.com.ar+OR+site:infobae.com+OR+site:lanacion.com.ar+OR+site:cronista.com+OR+site:baenegocios.com+OR+site:bna.com.ar&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
        FeedConfig::new(
            "Personajes Políticos y Económicos",
            "https://news.google.com/rss/search?q=(Milei+OR+Caputo+OR+Bausili+OR+Rubinstein+OR+Prat-Gay+OR+Cavallo+OR+Cristina+OR+Massa+OR+Melconian+OR+Macri+OR+Kicillof)+site:.ar&hl=es-419&gl=AR&ceid=AR:es-419",
        ),
    ]
}

/// Every file and directory the pipeline touches, rooted at the data directory.
///
/// ```text
/// data/
/// ├── rss_slices/
/// │   ├── rss_hourly_dumps/rss_dumps_20250601T1200.csv
/// │   └── rss_dumps/2day_window_20250601T1200.csv
/// ├── master_index.csv
/// ├── processed_files.txt
/// ├── output_digests/headlines_2day_window_20250601T12_Finanzas_01.md
/// ├── digest_jsonls/20250601T12.jsonl
/// ├── pf_out/pfout_20250601T12_120512.jsonl
/// ├── article_quotes/{articles_exploded,articles_to_scrape}.jsonl
/// ├── idea_cluster/{seed_ideas_exploded,enriched_seed_ideas}.jsonl
/// ├── scraped_links.jsonl
/// └── status_logs/status_20250601T12.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root scanned by the master index merge.
    pub fn rss_root(&self) -> PathBuf {
        self.root.join("rss_slices")
    }

    pub fn hourly_dump_dir(&self) -> PathBuf {
        self.rss_root().join("rss_hourly_dumps")
    }

    pub fn hourly_dump_path(&self, digest_id: &DigestId) -> PathBuf {
        self.hourly_dump_dir()
            .join(format!("rss_dumps_{}.csv", digest_id.minute_stamp()))
    }

    pub fn slice_dir(&self) -> PathBuf {
        self.rss_root().join("rss_dumps")
    }

    pub fn master_index_path(&self) -> PathBuf {
        self.root.join("master_index.csv")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("processed_files.txt")
    }

    pub fn digest_md_dir(&self) -> PathBuf {
        self.root.join("output_digests")
    }

    pub fn digest_jsonl_dir(&self) -> PathBuf {
        self.root.join("digest_jsonls")
    }

    pub fn digest_jsonl_path(&self, digest_id: &DigestId) -> PathBuf {
        self.digest_jsonl_dir().join(format!("{digest_id}.jsonl"))
    }

    pub fn pf_out_dir(&self) -> PathBuf {
        self.root.join("pf_out")
    }

    pub fn articles_exploded_path(&self) -> PathBuf {
        self.root.join("article_quotes").join("articles_exploded.jsonl")
    }

    pub fn articles_to_scrape_path(&self) -> PathBuf {
        self.root.join("article_quotes").join("articles_to_scrape.jsonl")
    }

    pub fn ideas_exploded_path(&self) -> PathBuf {
        self.root.join("idea_cluster").join("seed_ideas_exploded.jsonl")
    }

    pub fn enriched_ideas_path(&self) -> PathBuf {
        self.root.join("idea_cluster").join("enriched_seed_ideas.jsonl")
    }

    pub fn scraped_path(&self) -> PathBuf {
        self.root.join("scraped_links.jsonl")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status_logs")
    }

    pub fn status_path(&self, digest_id: &DigestId) -> PathBuf {
        self.status_dir().join(format!("status_{digest_id}.json"))
    }
}
