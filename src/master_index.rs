//! The master index: every article ever seen, one row per identity.
//!
//! Each cycle folds the batch files that are not yet in the processed-file
//! ledger into the index. The merge is an explicit per-identity reduction
//! in which the most recently published sighting wins. The index file is
//! replaced atomically and the ledger is written only afterwards: the
//! ledger never lists a file whose rows are missing from the index.
//!
//! # State
//!
//! [`MergeContext`] holds the loaded index and ledger. Nothing else reads
//! or writes the ledger.

use crate::config::DataLayout;
use crate::error::{PipelineError, Result};
use crate::identity;
use crate::models::{non_blank, MasterIndexRow};
use crate::outputs::batch::{check_columns, read_batch, REQUIRED_COLUMNS};
use crate::utils::{parse_published, write_atomic};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Columns the persisted index must carry to be loaded.
const INDEX_COLUMNS: [&str; 3] = ["index_id", "Title", "Source"];

/// The set of batch files already folded into the index, by path relative
/// to the scan root. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeSet<String>,
}

impl Ledger {
    /// Read a newline-delimited ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Ledger::default());
        }
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Ledger { entries })
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.entries.contains(rel)
    }

    pub fn insert(&mut self, rel: impl Into<String>) -> bool {
        self.entries.insert(rel.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// The deduplicated article index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterIndex {
    rows: Vec<MasterIndexRow>,
}

impl MasterIndex {
    /// Load the persisted index; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(MasterIndex::default());
        }
        let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| PipelineError::csv(path, e))?
            .clone();
        if headers.is_empty() {
            return Ok(MasterIndex::default());
        }
        check_columns(path, &headers, &INDEX_COLUMNS)?;
        let rows = reader
            .deserialize::<MasterIndexRow>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::csv(path, e))?;
        Ok(MasterIndex { rows })
    }

    pub fn rows(&self) -> &[MasterIndexRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row lookup by identity.
    pub fn by_identity(&self) -> HashMap<&str, &MasterIndexRow> {
        self.rows.iter().map(|r| (r.index_id.as_str(), r)).collect()
    }

    fn to_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row).map_err(|e| PipelineError::csv(path, e))?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::csv(path, e.into_error().into()))
    }
}

/// A batch file not yet recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the scan root; the ledger key.
    pub rel: String,
}

/// What a merge cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No pending files and a non-empty index.
    UpToDate,
    /// No pending files and nothing indexed yet.
    NothingToIndex,
    Merged(MergeStats),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub files: usize,
    pub rows_loaded: usize,
    /// Rows skipped for lacking a title or source.
    pub rows_dropped: usize,
    /// Sightings folded into an identity already present in the cycle.
    pub duplicates_collapsed: usize,
    pub total_rows: usize,
}

/// State staged by [`MergeContext::merge`] and persisted by [`MergeContext::commit`].
#[derive(Debug)]
struct Staged {
    /// `None` when the cycle added no rows and the index file stays as is.
    index: Option<MasterIndex>,
    ledger: Ledger,
}

/// Explicit load / merge / commit boundary around the index and its ledger.
#[derive(Debug)]
pub struct MergeContext {
    index_path: PathBuf,
    ledger_path: PathBuf,
    pub index: MasterIndex,
    pub ledger: Ledger,
    staged: Option<Staged>,
}

impl MergeContext {
    pub fn load(index_path: &Path, ledger_path: &Path) -> Result<Self> {
        let ledger = Ledger::load(ledger_path)?;
        if ledger.is_empty() {
            debug!(path = %ledger_path.display(), "No processed files recorded yet");
        }
        Ok(MergeContext {
            index_path: index_path.to_path_buf(),
            ledger_path: ledger_path.to_path_buf(),
            index: MasterIndex::load(index_path)?,
            ledger,
            staged: None,
        })
    }

    /// Every `*.csv` under `scan_root` that the ledger does not list, in path order.
    pub fn pending_files(&self, scan_root: &Path) -> Result<Vec<PendingFile>> {
        if !scan_root.exists() {
            return Ok(Vec::new());
        }
        let mut pending = Vec::new();
        for entry in WalkDir::new(scan_root) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(scan_root).to_path_buf();
                PipelineError::io(path, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "csv") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(scan_root) else {
                continue;
            };
            let rel = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !self.ledger.contains(&rel) {
                pending.push(PendingFile {
                    path: path.to_path_buf(),
                    rel,
                });
            }
        }
        pending.sort_by(|a, b| a.rel.cmp(&b.rel));
        Ok(pending)
    }

    /// Fold `pending` into an in-memory copy of the index and ledger.
    ///
    /// Every file is loaded and validated here; nothing touches disk until
    /// [`commit`](Self::commit). A contract or integrity failure therefore
    /// leaves both files untouched.
    #[instrument(level = "info", skip_all, fields(pending = pending.len(), indexed = self.index.len()))]
    pub fn merge(&mut self, pending: &[PendingFile]) -> Result<MergeOutcome> {
        self.staged = None;
        if pending.is_empty() {
            return Ok(if self.index.is_empty() {
                MergeOutcome::NothingToIndex
            } else {
                MergeOutcome::UpToDate
            });
        }

        let mut stats = MergeStats {
            files: pending.len(),
            ..MergeStats::default()
        };
        let mut ledger = self.ledger.clone();
        let mut new_rows = Vec::new();
        for file in pending {
            debug!(file = %file.rel, "Processing new file");
            let (rows, dropped) = load_batch_rows(&file.path)?;
            stats.rows_loaded += rows.len();
            stats.rows_dropped += dropped;
            new_rows.extend(rows);
            // processed once inspected, even when it contributed nothing
            ledger.insert(file.rel.clone());
        }

        if new_rows.is_empty() {
            info!(files = stats.files, "New files held no indexable rows; recording them only");
            stats.total_rows = self.index.len();
            self.staged = Some(Staged { index: None, ledger });
            return Ok(MergeOutcome::Merged(stats));
        }

        let candidates = new_rows.into_iter().chain(self.index.rows.iter().cloned());
        let (rows, collapsed) = reduce_latest(candidates);
        verify_unique(&rows)?;
        stats.duplicates_collapsed = collapsed;
        stats.total_rows = rows.len();

        info!(
            files = stats.files,
            rows_loaded = stats.rows_loaded,
            rows_dropped = stats.rows_dropped,
            duplicates_collapsed = stats.duplicates_collapsed,
            total = stats.total_rows,
            "Merged new batches"
        );
        self.staged = Some(Staged {
            index: Some(MasterIndex { rows }),
            ledger,
        });
        Ok(MergeOutcome::Merged(stats))
    }

    /// Persist what the last [`merge`](Self::merge) staged: index first, then ledger.
    ///
    /// Returns `false` when nothing was staged.
    pub fn commit(&mut self) -> Result<bool> {
        let Some(staged) = self.staged.take() else {
            return Ok(false);
        };
        if let Some(index) = staged.index {
            write_atomic(&self.index_path, &index.to_bytes(&self.index_path)?)?;
            info!(path = %self.index_path.display(), rows = index.len(), "Master index saved");
            self.index = index;
        }
        write_atomic(&self.ledger_path, &staged.ledger.to_bytes())?;
        debug!(path = %self.ledger_path.display(), entries = staged.ledger.len(), "Ledger saved");
        self.ledger = staged.ledger;
        Ok(true)
    }
}

/// Load one batch file as index rows.
///
/// Rows without a title or source cannot be identified and are dropped
/// (counted in the second element). An upstream `uid` is reused as the
/// identity. Unparseable timestamps are kept as `None`.
fn load_batch_rows(path: &Path) -> Result<(Vec<MasterIndexRow>, usize)> {
    let batch = read_batch(path, &REQUIRED_COLUMNS)?;
    let mut dropped = 0usize;
    let mut rows = Vec::with_capacity(batch.len());

    for row in &batch {
        let (Some(title), Some(source)) = (non_blank(&row.title), non_blank(&row.source)) else {
            dropped += 1;
            continue;
        };
        let uid = non_blank(&row.uid).map(str::to_string);
        let index_id = uid
            .clone()
            .unwrap_or_else(|| identity::hash(title, source));
        rows.push(MasterIndexRow {
            index_id,
            uid,
            topic: non_blank(&row.topic).map(str::to_string),
            title: title.to_string(),
            published: non_blank(&row.published).and_then(parse_published),
            source: source.to_string(),
            link: non_blank(&row.link).map(str::to_string),
        });
    }

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "Dropped rows missing Title or Source");
    }
    Ok((rows, dropped))
}

/// Keep the most recently published row per identity.
///
/// Candidates are visited in order; a later candidate replaces the stored
/// row only when strictly newer, so on equal timestamps the earlier
/// candidate wins. Rows without a timestamp rank below every dated row.
/// Output is sorted by `published` descending, then identity.
fn reduce_latest(candidates: impl IntoIterator<Item = MasterIndexRow>) -> (Vec<MasterIndexRow>, usize) {
    let mut best: HashMap<String, MasterIndexRow> = HashMap::new();
    let mut collapsed = 0usize;

    for row in candidates {
        match best.entry(row.index_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                collapsed += 1;
                if row.published > slot.get().published {
                    slot.insert(row);
                }
            }
        }
    }

    let mut rows: Vec<MasterIndexRow> = best.into_values().collect();
    rows.sort_by(|a, b| {
        b.published
            .cmp(&a.published)
            .then_with(|| a.index_id.cmp(&b.index_id))
    });
    (rows, collapsed)
}

/// Fail if any identity occurs more than once.
fn verify_unique(rows: &[MasterIndexRow]) -> Result<()> {
    let mut counts: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for row in rows {
        *counts.entry(row.index_id.as_str()).or_insert(0) += 1;
    }
    match counts.into_iter().find(|(_, n)| *n > 1) {
        Some((identity, count)) => Err(PipelineError::DuplicateIdentity {
            identity: identity.to_string(),
            count,
        }),
        None => Ok(()),
    }
}

/// Run one merge cycle over everything below the layout's RSS root.
#[instrument(level = "info", skip_all, fields(root = %layout.root().display()))]
pub fn update_master_index(layout: &DataLayout) -> Result<MergeOutcome> {
    let mut ctx = MergeContext::load(&layout.master_index_path(), &layout.ledger_path())?;
    let pending = ctx.pending_files(&layout.rss_root())?;
    let outcome = ctx.merge(&pending)?;
    ctx.commit()?;
    match &outcome {
        MergeOutcome::UpToDate => info!("No new CSV files to process. Master index is up-to-date."),
        MergeOutcome::NothingToIndex => info!("No batch files found; master index not created"),
        MergeOutcome::Merged(_) => {}
    }
    Ok(outcome)
}
