//! LLM summarization of headline digests.
//!
//! Every record of `digest_jsonls/{digest_id}.jsonl` is sent to the model,
//! several at a time. The answer must be a [`DigestAnalysis`] document; an
//! answer cut short (EOF while parsing) is asked for once more, and any
//! other failure skips the record. Results land in
//! `pf_out/pfout_{digest_id}_{HHMMSS}.jsonl`.

use crate::api::AskAsync;
use crate::config::DataLayout;
use crate::digest_id::DigestId;
use crate::models::{DigestAnalysis, DigestRecord, PfOutRecord};
use crate::outputs::json::{read_jsonl, write_jsonl};
use crate::utils::{looks_truncated, truncate_for_log};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarizeReport {
    pub records: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `None` when nothing was written.
    pub output: Option<PathBuf>,
}

/// Strip a Markdown code fence the model may wrap its JSON in.
fn strip_fence(response: &str) -> &str {
    let s = response.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_analysis(response: &str) -> Result<DigestAnalysis, serde_json::Error> {
    serde_json::from_str(strip_fence(response))
}

/// Ask the model about one digest, re-asking once when the answer was truncated.
async fn analyze<A>(asker: &A, index: usize, record: &DigestRecord) -> Option<DigestAnalysis>
where
    A: AskAsync<Response = String>,
{
    debug!(index, digest_group_id = %record.digest_group_id, "Analyzing digest");
    let response = match asker.ask(&record.content).await {
        Ok(r) => r,
        Err(e) => {
            error!(index, digest_group_id = %record.digest_group_id, error = %e, "API call failed; skipping digest");
            return None;
        }
    };

    let mut parsed = parse_analysis(&response);
    let mut last_response = response;
    if let Err(ref e) = parsed {
        if looks_truncated(e) {
            warn!(index, error = %e, "EOF while parsing; re-asking once");
            match asker.ask(&record.content).await {
                Ok(r2) => {
                    parsed = parse_analysis(&r2);
                    last_response = r2;
                }
                Err(e2) => warn!(index, error = %e2, "Re-ask failed; will skip digest"),
            }
        }
    }

    match parsed {
        Ok(analysis) => {
            info!(index, "Successfully analyzed digest");
            Some(analysis)
        }
        Err(e) => {
            warn!(
                index,
                error = %e,
                response_preview = %truncate_for_log(&last_response, 300),
                "Model returned non-conforming JSON; skipping digest"
            );
            None
        }
    }
}

/// Summarize every digest record of `digest_id`.
///
/// A missing digest file is not an error: there is simply nothing to do.
#[instrument(level = "info", skip_all, fields(%digest_id, parallel))]
pub async fn run_summarize<A>(
    layout: &DataLayout,
    digest_id: &DigestId,
    asker: &A,
    parallel: usize,
    now: DateTime<Utc>,
) -> Result<SummarizeReport, Box<dyn Error>>
where
    A: AskAsync<Response = String>,
{
    let input = layout.digest_jsonl_path(digest_id);
    if !input.exists() {
        info!(path = %input.display(), "No digest JSONL for this id; nothing to summarize");
        return Ok(SummarizeReport::default());
    }
    let records: Vec<DigestRecord> = read_jsonl(&input)?;
    info!(records = records.len(), parallel, "Starting parallel digest processing");

    let mut results: Vec<PfOutRecord> = stream::iter(records.iter().enumerate())
        .map(|(i, record)| async move {
            analyze(asker, i, record).await.map(|analysis| PfOutRecord {
                line_number: Some(i as u64),
                digest_group_id: record.digest_group_id.clone(),
                analysis,
            })
        })
        .buffer_unordered(parallel.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;
    results.sort_by_key(|r| r.line_number);

    let mut report = SummarizeReport {
        records: records.len(),
        succeeded: results.len(),
        failed: records.len() - results.len(),
        output: None,
    };
    if !results.is_empty() {
        let path = layout
            .pf_out_dir()
            .join(format!("pfout_{digest_id}_{}.jsonl", now.format("%H%M%S")));
        write_jsonl(&path, &results)?;
        info!(path = %path.display(), "Wrote LLM outputs");
        report.output = Some(path);
    }

    info!(
        total = report.records,
        successful = report.succeeded,
        failed = report.failed,
        "Completed digest summarization"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const ANSWER: &str = r#"{"clustered_agenda_table": {"clustered_agenda_table": [{"topic": "Bonos", "article_ids": [1], "deduplicated_titles": ["Suben"]}]}, "seed_ideas": {"seed_ideas": []}}"#;

    /// Answers by prompt; a prompt listed in `truncate_once` first gets half an answer.
    #[derive(Debug, Default)]
    struct ScriptedModel {
        calls: Mutex<HashMap<String, usize>>,
        truncate_once: Vec<&'static str>,
        fail: Vec<&'static str>,
        garbage: Vec<&'static str>,
    }

    impl AskAsync for ScriptedModel {
        type Response = String;

        async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(text.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if self.fail.iter().any(|t| *t == text) {
                return Err("server error".into());
            }
            if self.garbage.iter().any(|t| *t == text) {
                return Ok("lo siento, no puedo".to_string());
            }
            if self.truncate_once.iter().any(|t| *t == text) && n == 1 {
                return Ok(ANSWER[..40].to_string());
            }
            Ok(format!("```json\n{ANSWER}\n```"))
        }
    }

    fn record(i: usize, content: &str) -> DigestRecord {
        DigestRecord {
            digest_group_id: format!("20250601T12::2day_window::Finanzas::{:02}", i + 1),
            digest_id: "20250601T12".to_string(),
            window_type: "2day_window".to_string(),
            topic: "Finanzas".to_string(),
            group_number: format!("{:02}", i + 1),
            headlines_file: format!("headlines_{i}.md"),
            id_digest: format!("20250601T12_{i:03}"),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_fence("  {}  "), "{}");
    }

    #[tokio::test]
    async fn test_run_summarize_writes_successful_records() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let id: DigestId = "20250601T12".parse().unwrap();
        let records = vec![
            record(0, "uno"),
            record(1, "cortado"),
            record(2, "roto"),
            record(3, "basura"),
        ];
        write_jsonl(&layout.digest_jsonl_path(&id), &records).unwrap();

        let model = ScriptedModel {
            truncate_once: vec!["cortado"],
            fail: vec!["roto"],
            garbage: vec!["basura"],
            ..ScriptedModel::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 5, 1).unwrap();
        let report = run_summarize(&layout, &id, &model, 2, now).await.unwrap();

        assert_eq!((report.records, report.succeeded, report.failed), (4, 2, 2));
        let path = report.output.unwrap();
        assert!(path.ends_with("pf_out/pfout_20250601T12_120501.jsonl"));
        assert_eq!(model.calls.lock().unwrap()["cortado"], 2);

        let out: Vec<PfOutRecord> = read_jsonl(&path).unwrap();
        assert_eq!(out[0].line_number, Some(0));
        assert_eq!(out[1].line_number, Some(1));
        assert_eq!(out[1].digest_group_id, "20250601T12::2day_window::Finanzas::02");
        assert_eq!(out[0].analysis.clustered_agenda_table.clustered_agenda_table[0].topic, "Bonos");
    }

    #[tokio::test]
    async fn test_missing_digest_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let id: DigestId = "20250601T12".parse().unwrap();
        let report = run_summarize(&layout, &id, &ScriptedModel::default(), 4, Utc::now())
            .await
            .unwrap();
        assert_eq!(report, SummarizeReport::default());
        assert!(!layout.pf_out_dir().exists());
    }
}
