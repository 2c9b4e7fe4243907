//! Hour-granularity digest identifiers.
//!
//! A digest id (`YYYYMMDDTHH`) names one pipeline run. Every artifact a run
//! produces (slices, headline files, LLM outputs, stage status) carries it
//! so later stages can find their inputs by prefix.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// An hour-aligned UTC instant identifying one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DigestId {
    hour: DateTime<Utc>,
}

impl DigestId {
    /// Truncate `ts` to the top of its hour.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        let hour = ts
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts);
        DigestId { hour }
    }

    pub fn now() -> Self {
        Self::from_timestamp(Utc::now())
    }

    /// The trigger instant this digest is planned from.
    pub fn trigger_time(&self) -> DateTime<Utc> {
        self.hour
    }

    /// `YYYYMMDDTHHMM`, the stamp used in batch and slice file names.
    pub fn minute_stamp(&self) -> String {
        self.hour.format("%Y%m%dT%H%M").to_string()
    }

    /// `YYYY-MM-DD`
    pub fn day(&self) -> String {
        self.hour.format("%Y-%m-%d").to_string()
    }

    pub fn hour(&self) -> u32 {
        self.hour.hour()
    }

    /// The `hours` digest ids preceding `now`, newest first.
    pub fn preceding(now: DateTime<Utc>, hours: u32) -> Vec<DigestId> {
        (1..=i64::from(hours))
            .map(|i| DigestId::from_timestamp(now - Duration::hours(i)))
            .collect()
    }
}

impl fmt::Display for DigestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hour.format("%Y%m%dT%H"))
    }
}

impl FromStr for DigestId {
    type Err = PipelineError;

    /// Accepts `YYYYMMDDTHH` and `YYYYMMDDTHHMM`; minutes are discarded.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let padded = match s.len() {
            11 => format!("{s}00"),
            13 => s.to_string(),
            _ => return Err(PipelineError::InvalidDigestId(s.to_string())),
        };
        let naive = NaiveDateTime::parse_from_str(&padded, "%Y%m%dT%H%M")
            .map_err(|_| PipelineError::InvalidDigestId(s.to_string()))?;
        Ok(DigestId::from_timestamp(Utc.from_utc_datetime(&naive)))
    }
}
