//! Error types shared by the core pipeline components.
//!
//! Every variant that originates in a file carries the offending path so a
//! failed cycle can be traced back to the batch that caused it. Stage
//! orchestration in `main` and [`crate::pipeline`] boxes these into
//! `Box<dyn Error>`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by normalization, slicing, merging and the digest stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error in {path} (line {line}): {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// An input batch does not expose the columns a stage needs.
    #[error("{file} is missing required column(s) {missing:?}; columns found: {found:?}")]
    MissingColumns {
        file: PathBuf,
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// The master index would contain the same identity twice.
    #[error("integrity violation: identity {identity} appears {count} times after merge")]
    DuplicateIdentity { identity: String, count: usize },

    #[error("invalid digest id {0:?} (expected YYYYMMDDTHH or YYYYMMDDTHHMM)")]
    InvalidDigestId(String),

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("malformed record in {file}: {reason}")]
    Malformed { file: PathBuf, reason: String },

    #[error("HTTP error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed {topic} could not be parsed: {source}")]
    Feed {
        topic: String,
        #[source]
        source: quick_xml::DeError,
    },

    /// The language model could not be configured or did not answer.
    #[error("LLM error: {0}")]
    Llm(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, line: usize, source: serde_json::Error) -> Self {
        PipelineError::Json {
            path: path.into(),
            line,
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
