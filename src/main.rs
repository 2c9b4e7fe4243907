//! # Media Monitor
//!
//! Polls topic RSS feeds about the Argentine economy, slices each batch into
//! scheduled time windows, keeps a deduplicated master index of every
//! article seen and prepares headline digests for LLM summarization.
//!
//! ## Usage
//!
//! ```sh
//! media_monitor run
//! media_monitor --config media_monitor.yaml daemon --backfill 6
//! ```
//!
//! ## Architecture
//!
//! Each hour is one digest id; the stages run in order:
//! 1. **Fetch**: read the feeds, normalize, write the batch and the due window slices
//! 2. **Index**: fold new CSV files into the master index
//! 3. **Digest**: render headline documents per window and topic
//! 4. **Summarize**: send every digest to the LLM (parallel)
//! 5. **Explode**: flatten LLM outputs into article and idea records
//! 6. **Scrape** (optional): capture the full text of cited articles

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cli;
mod config;
mod digest_id;
mod error;
mod explode;
mod feeds;
mod fetch;
mod identity;
mod master_index;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod scrape;
mod summarize;
mod utils;
mod windows;

use api::AwfulClient;
use cli::{Cli, Command};
use config::PipelineConfig;
use digest_id::DigestId;
use feeds::HttpFeedReader;
use master_index::MergeOutcome;
use outputs::digests::{build_digests, DigestSelection};
use pipeline::{daemon, run_pipeline, LiveStages, Stage};
use scrape::HttpPageFetcher;
use utils::{ensure_writable_dir, parse_trigger_time};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("media_monitor starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.data_dir, ?args.command, "Parsed CLI arguments");

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    ensure_writable_dir(&config.data_dir).await?;
    let layout = config.layout();

    match args.command {
        Command::Fetch { trigger_time } => {
            let trigger = match trigger_time {
                Some(raw) => parse_trigger_time(&raw)?,
                None => Utc::now(),
            };
            let reader = HttpFeedReader::new(Duration::from_secs(30))?;
            let report = fetch::run_fetch(&config, &reader, trigger).await?;
            info!(
                kept = report.kept,
                duplicates_dropped = report.duplicates_dropped,
                unparseable_dropped = report.unparseable_dropped,
                slices = report.slices.len(),
                "Fetch complete"
            );
        }
        Command::Index => match master_index::update_master_index(&layout)? {
            MergeOutcome::Merged(stats) => info!(?stats, "Master index updated"),
            outcome => debug!(?outcome, "Master index unchanged"),
        },
        Command::Digest { digest_id, force } => {
            let selection = digest_id.unwrap_or_else(|| DigestSelection::One(DigestId::now()));
            for (id, outcome) in build_digests(
                &layout,
                selection,
                force,
                config.min_group_rows,
                config.max_group_rows,
            )? {
                info!(digest_id = %id, ?outcome, "Digest finished");
            }
        }
        Command::Summarize { digest_id } => {
            let client = AwfulClient::load(&config.llm).await?.with_backoff();
            let report = summarize::run_summarize(
                &layout,
                &digest_id,
                &client,
                config.llm.parallel_requests,
                Utc::now(),
            )
            .await?;
            info!(?report, "Summarization complete");
        }
        Command::Explode { digest_id } => {
            let report = explode::explode(&layout, digest_id.as_ref())?;
            let ideas = explode::compile_ideas(&layout)?;
            info!(?report, enriched_ideas = ideas, "Explode complete");
        }
        Command::Scrape { limit } => {
            let fetcher = HttpPageFetcher::new(Duration::from_secs(config.scrape.timeout_secs))?;
            let limit = limit.unwrap_or(config.scrape.limit);
            let report = scrape::run_scrape(&layout, &fetcher, limit).await?;
            info!(?report, "Scrape complete");
        }
        Command::Run { digest_id } => {
            let id = digest_id.unwrap_or_else(DigestId::now);
            let stages = Stage::enabled(&config);
            let status = run_pipeline(&layout, &LiveStages::new(&config), &stages, &id).await?;
            if let Some(stage) = status.failed_stage() {
                return Err(format!("digest {id}: stage {stage} failed").into());
            }
        }
        Command::Daemon {
            backfill,
            interval_minutes,
        } => {
            let backfill = backfill.unwrap_or(config.backfill_hours);
            let minutes = interval_minutes.unwrap_or(config.interval_minutes).max(1);
            let stages = Stage::enabled(&config);
            daemon(
                &layout,
                &LiveStages::new(&config),
                &stages,
                backfill,
                Duration::from_secs(minutes * 60),
            )
            .await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}
