//! Command-line interface definitions for the media monitor.
//!
//! Every stage can be run on its own; `run` chains them for one digest id
//! and `daemon` keeps polling. Global options can also come from the
//! environment.

use crate::digest_id::DigestId;
use crate::outputs::digests::DigestSelection;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the media monitor.
///
/// # Examples
///
/// ```sh
/// # One fetch cycle for a given hour
/// media_monitor fetch --trigger-time 2025-05-28T12:00
///
/// # Rebuild every digest found in the slice directory
/// media_monitor digest --digest-id all --force
///
/// # Poll forever, catching up on the last 6 hours
/// media_monitor --config media_monitor.yaml daemon --backfill 6
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "MEDIA_MONITOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory; overrides the configuration file
    #[arg(short, long, env = "MEDIA_MONITOR_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read the feeds, write the normalized batch and the due window slices
    Fetch {
        /// Trigger instant, e.g. 2025-05-28T12:00 (UTC unless an offset is given); defaults to now
        #[arg(short, long)]
        trigger_time: Option<String>,
    },

    /// Fold new batch and slice files into the master index
    Index,

    /// Build headline digests
    Digest {
        /// `YYYYMMDDTHH`, or `all`; defaults to the current hour
        #[arg(long)]
        digest_id: Option<DigestSelection>,

        /// Rebuild even when the digest JSONL already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Send a digest to the LLM
    Summarize {
        #[arg(long)]
        digest_id: DigestId,
    },

    /// Explode LLM outputs into article and idea records
    Explode {
        /// Only this digest id; every LLM output when omitted
        #[arg(long)]
        digest_id: Option<DigestId>,
    },

    /// Capture the full text of cited articles
    Scrape {
        /// Pages fetched in this run; defaults to the configured limit
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run every stage for one digest id, resuming after the last completed stage
    Run {
        #[arg(long)]
        digest_id: Option<DigestId>,
    },

    /// Poll on a fixed interval, running the current hour and backfilling missed ones
    Daemon {
        /// Hours to look back for runs that never happened
        #[arg(short, long)]
        backfill: Option<u32>,

        #[arg(short, long)]
        interval_minutes: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "media_monitor",
            "--config",
            "./media_monitor.yaml",
            "fetch",
            "--trigger-time",
            "2025-05-28T12:00",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("./media_monitor.yaml")));
        assert_eq!(
            cli.command,
            Command::Fetch {
                trigger_time: Some("2025-05-28T12:00".to_string())
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["media_monitor", "index", "-d", "/tmp/data"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/data")));
        assert_eq!(cli.command, Command::Index);
    }

    #[test]
    fn test_digest_selection() {
        let cli = Cli::parse_from(["media_monitor", "digest", "--digest-id", "ALL", "-f"]);
        assert_eq!(
            cli.command,
            Command::Digest {
                digest_id: Some(DigestSelection::All),
                force: true
            }
        );

        let cli = Cli::parse_from(["media_monitor", "digest", "--digest-id", "20250601T1200"]);
        let Command::Digest { digest_id: Some(DigestSelection::One(id)), force: false } = cli.command else {
            panic!("unexpected command: {:?}", cli.command);
        };
        assert_eq!(id.to_string(), "20250601T12");
    }

    #[test]
    fn test_summarize_requires_valid_digest_id() {
        assert!(Cli::try_parse_from(["media_monitor", "summarize"]).is_err());
        assert!(Cli::try_parse_from(["media_monitor", "summarize", "--digest-id", "yesterday"]).is_err());
    }

    #[test]
    fn test_daemon_short_flags() {
        let cli = Cli::parse_from(["media_monitor", "daemon", "-b", "6", "-i", "5"]);
        assert_eq!(
            cli.command,
            Command::Daemon {
                backfill: Some(6),
                interval_minutes: Some(5)
            }
        );
    }
}
