//! Stage sequencing, per-run status and the polling daemon.
//!
//! A run walks the stages in order for one digest id. Each outcome is
//! recorded in `status_logs/status_{digest_id}.json`; a stage already marked
//! `ok` is skipped when the run is repeated, and the first failure stops
//! the run. The daemon drives runs one at a time.

use crate::api::AwfulClient;
use crate::config::{DataLayout, PipelineConfig};
use crate::digest_id::DigestId;
use crate::error::{PipelineError, Result};
use crate::explode::{compile_ideas, explode};
use crate::feeds::HttpFeedReader;
use crate::fetch::run_fetch;
use crate::master_index::update_master_index;
use crate::outputs::digests::build_digest;
use crate::scrape::{run_scrape, HttpPageFetcher};
use crate::summarize::run_summarize;
use crate::utils::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

const FEED_TIMEOUT: Duration = Duration::from_secs(30);

const OK: &str = "ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Index,
    Digest,
    Summarize,
    Explode,
    Scrape,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Fetch,
        Stage::Index,
        Stage::Digest,
        Stage::Summarize,
        Stage::Explode,
        Stage::Scrape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Index => "index",
            Stage::Digest => "digest",
            Stage::Summarize => "summarize",
            Stage::Explode => "explode",
            Stage::Scrape => "scrape",
        }
    }

    /// The stages a run executes under `config`; scraping is opt-in.
    pub fn enabled(config: &PipelineConfig) -> Vec<Stage> {
        Self::ALL
            .into_iter()
            .filter(|s| *s != Stage::Scrape || config.scrape.enabled)
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of every stage attempted for one digest id.
///
/// ```json
/// {"digest_id": "20250601T12", "status": {"fetch": "ok", "index": "fail (...)"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub digest_id: String,
    #[serde(default)]
    pub status: BTreeMap<String, String>,
}

impl StageStatus {
    pub fn new(digest_id: &DigestId) -> Self {
        StageStatus {
            digest_id: digest_id.to_string(),
            status: BTreeMap::new(),
        }
    }

    /// Read the status file at `path`, or start empty when there is none.
    pub fn load(path: &Path, digest_id: &DigestId) -> Result<Self> {
        if !path.exists() {
            return Ok(StageStatus::new(digest_id));
        }
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| PipelineError::json(path, 1, e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = serde_json::to_string_pretty(self).map_err(|e| PipelineError::json(path, 1, e))?;
        text.push('\n');
        write_atomic(path, text.as_bytes())
    }

    pub fn is_done(&self, stage: Stage) -> bool {
        self.status.get(stage.name()).is_some_and(|s| s == OK)
    }

    pub fn is_complete(&self, stages: &[Stage]) -> bool {
        stages.iter().all(|s| self.is_done(*s))
    }

    pub fn mark_ok(&mut self, stage: Stage) {
        self.status.insert(stage.name().to_string(), OK.to_string());
    }

    pub fn mark_failed(&mut self, stage: Stage, reason: &str) {
        self.status
            .insert(stage.name().to_string(), format!("fail ({reason})"));
    }

    /// The stage that stopped the last run, if any.
    pub fn failed_stage(&self) -> Option<&str> {
        self.status
            .iter()
            .find(|(_, v)| v.starts_with("fail"))
            .map(|(k, _)| k.as_str())
    }
}

/// Executes a single stage for a digest id.
pub trait StageRunner {
    async fn run_stage(&self, stage: Stage, digest_id: &DigestId) -> std::result::Result<(), Box<dyn Error>>;
}

/// Runs the stages against the network, the LLM and the data directory.
#[derive(Debug)]
pub struct LiveStages<'a> {
    config: &'a PipelineConfig,
}

impl<'a> LiveStages<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        LiveStages { config }
    }
}

impl StageRunner for LiveStages<'_> {
    async fn run_stage(&self, stage: Stage, digest_id: &DigestId) -> std::result::Result<(), Box<dyn Error>> {
        let config = self.config;
        let layout = config.layout();
        match stage {
            Stage::Fetch => {
                let reader = HttpFeedReader::new(FEED_TIMEOUT)?;
                run_fetch(config, &reader, digest_id.trigger_time()).await?;
            }
            Stage::Index => {
                update_master_index(&layout)?;
            }
            Stage::Digest => {
                build_digest(&layout, digest_id, false, config.min_group_rows, config.max_group_rows)?;
            }
            Stage::Summarize => {
                let client = AwfulClient::load(&config.llm).await?.with_backoff();
                run_summarize(&layout, digest_id, &client, config.llm.parallel_requests, Utc::now()).await?;
            }
            Stage::Explode => {
                explode(&layout, Some(digest_id))?;
                compile_ideas(&layout)?;
            }
            Stage::Scrape => {
                let fetcher = HttpPageFetcher::new(Duration::from_secs(config.scrape.timeout_secs))?;
                run_scrape(&layout, &fetcher, config.scrape.limit).await?;
            }
        }
        Ok(())
    }
}

/// Run `stages` for `digest_id`, resuming after the last completed stage.
///
/// Stage failures are recorded, not returned; the error path is reserved
/// for a status file that cannot be read or written.
#[instrument(level = "info", skip_all, fields(%digest_id))]
pub async fn run_pipeline<S: StageRunner>(
    layout: &DataLayout,
    runner: &S,
    stages: &[Stage],
    digest_id: &DigestId,
) -> Result<StageStatus> {
    let path = layout.status_path(digest_id);
    let mut status = StageStatus::load(&path, digest_id)?;
    info!(day = %digest_id.day(), hour = digest_id.hour(), stages = stages.len(), "Starting run");

    for &stage in stages {
        if status.is_done(stage) {
            info!(%stage, "Stage already completed; skipping");
            continue;
        }
        info!(%stage, "Running stage");
        let t0 = Instant::now();
        match runner.run_stage(stage, digest_id).await {
            Ok(()) => {
                status.mark_ok(stage);
                status.save(&path)?;
                info!(%stage, elapsed_ms = t0.elapsed().as_millis() as u64, "Stage completed");
            }
            Err(e) => {
                status.mark_failed(stage, &e.to_string());
                status.save(&path)?;
                error!(%stage, error = %e, "Stage failed; stopping run");
                break;
            }
        }
    }
    Ok(status)
}

/// The `hours` ids before `now`, newest first, that were never attempted.
pub fn backfill_targets(layout: &DataLayout, now: DateTime<Utc>, hours: u32) -> Vec<DigestId> {
    DigestId::preceding(now, hours)
        .into_iter()
        .filter(|id| !layout.status_path(id).exists())
        .collect()
}

/// What the daemon should run next: the current hour while it is unfinished
/// and untried in this process, otherwise the newest unseen backfill target.
pub fn next_target(
    layout: &DataLayout,
    stages: &[Stage],
    seen: &HashSet<DigestId>,
    now: DateTime<Utc>,
    backfill_hours: u32,
) -> Result<Option<DigestId>> {
    let current = DigestId::from_timestamp(now);
    if !seen.contains(&current) {
        let status = StageStatus::load(&layout.status_path(&current), &current)?;
        if !status.is_complete(stages) {
            return Ok(Some(current));
        }
    }
    Ok(backfill_targets(layout, now, backfill_hours)
        .into_iter()
        .find(|id| !seen.contains(id)))
}

/// Poll every `interval` until interrupted, one run at a time.
#[instrument(level = "info", skip(layout, runner, stages))]
pub async fn daemon<S: StageRunner>(
    layout: &DataLayout,
    runner: &S,
    stages: &[Stage],
    backfill_hours: u32,
    interval: Duration,
) -> std::result::Result<(), Box<dyn Error>> {
    let mut seen: HashSet<DigestId> = HashSet::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Daemon started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; daemon stopping");
                return Ok(());
            }
        }

        let target = match next_target(layout, stages, &seen, Utc::now(), backfill_hours) {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Could not choose next digest id");
                continue;
            }
        };
        seen.insert(target);
        match run_pipeline(layout, runner, stages, &target).await {
            Ok(status) => match status.failed_stage() {
                Some(stage) => warn!(digest_id = %target, stage, "Run stopped early"),
                None => info!(digest_id = %target, "Run finished"),
            },
            Err(e) => error!(digest_id = %target, error = %e, "Status file error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Stage>>,
        fail_at: Option<Stage>,
    }

    impl StageRunner for Recorder {
        async fn run_stage(&self, stage: Stage, _digest_id: &DigestId) -> std::result::Result<(), Box<dyn Error>> {
            self.calls.lock().unwrap().push(stage);
            if self.fail_at == Some(stage) {
                return Err("exit status 2".into());
            }
            Ok(())
        }
    }

    fn layout() -> (tempfile::TempDir, DataLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        (dir, layout)
    }

    #[test]
    fn test_scrape_only_when_enabled() {
        let mut config = PipelineConfig::default();
        assert!(!Stage::enabled(&config).contains(&Stage::Scrape));
        config.scrape.enabled = true;
        assert_eq!(Stage::enabled(&config), Stage::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_rerun_resumes() {
        let (_dir, layout) = layout();
        let id: DigestId = "20250601T12".parse().unwrap();
        let stages = &Stage::ALL[..5];

        let failing = Recorder {
            fail_at: Some(Stage::Digest),
            ..Recorder::default()
        };
        let status = run_pipeline(&layout, &failing, stages, &id).await.unwrap();
        assert_eq!(*failing.calls.lock().unwrap(), vec![Stage::Fetch, Stage::Index, Stage::Digest]);
        assert_eq!(status.status["digest"], "fail (exit status 2)");
        assert_eq!(status.failed_stage(), Some("digest"));

        let on_disk = StageStatus::load(&layout.status_path(&id), &id).unwrap();
        assert_eq!(on_disk, status);

        let healthy = Recorder::default();
        let status = run_pipeline(&layout, &healthy, stages, &id).await.unwrap();
        assert_eq!(
            *healthy.calls.lock().unwrap(),
            vec![Stage::Digest, Stage::Summarize, Stage::Explode]
        );
        assert!(status.is_complete(stages));
        assert_eq!(status.failed_stage(), None);
    }

    #[test]
    fn test_backfill_targets_skip_attempted_hours() {
        let (_dir, layout) = layout();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let attempted: DigestId = "20250601T10".parse().unwrap();
        StageStatus::new(&attempted)
            .save(&layout.status_path(&attempted))
            .unwrap();

        let ids: Vec<String> = backfill_targets(&layout, now, 3)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["20250601T11", "20250601T09"]);
    }

    #[test]
    fn test_next_target_prefers_current_hour_then_backfill() {
        let (_dir, layout) = layout();
        let stages = &Stage::ALL[..2];
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let current = DigestId::from_timestamp(now);
        let mut seen = HashSet::new();

        assert_eq!(next_target(&layout, stages, &seen, now, 2).unwrap(), Some(current));

        seen.insert(current);
        let previous: DigestId = "20250601T11".parse().unwrap();
        assert_eq!(next_target(&layout, stages, &seen, now, 2).unwrap(), Some(previous));

        seen.insert(previous);
        seen.insert("20250601T10".parse().unwrap());
        assert_eq!(next_target(&layout, stages, &seen, now, 2).unwrap(), None);
    }

    #[test]
    fn test_completed_current_hour_is_not_rerun() {
        let (_dir, layout) = layout();
        let stages = &Stage::ALL[..2];
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let current = DigestId::from_timestamp(now);
        let mut status = StageStatus::new(&current);
        status.mark_ok(Stage::Fetch);
        status.mark_ok(Stage::Index);
        status.save(&layout.status_path(&current)).unwrap();

        assert_eq!(next_target(&layout, stages, &HashSet::new(), now, 0).unwrap(), None);
    }
}
