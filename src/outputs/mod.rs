//! On-disk formats written and read by the stages.
//!
//! # Submodules
//!
//! - [`batch`]: article CSVs (normalized batches and window slices)
//! - [`slices`]: one CSV per due window of a trigger
//! - [`digests`]: headline Markdown documents and the digest JSONL built from them
//! - [`json`]: JSON Lines helpers shared by the LLM, explode and scrape stages
//!
//! # Output Structure
//!
//! ```text
//! rss_slices/rss_dumps/
//! ├── 4h_window_20250601T1200.csv
//! └── 2day_window_20250601T1200.csv
//!
//! output_digests/
//! ├── headlines_2day_window_20250601T12_Finanzas_01.md
//! └── headlines_2day_window_20250601T12_Finanzas_02.md
//!
//! digest_jsonls/
//! └── 20250601T12.jsonl
//! ```

pub mod batch;
pub mod digests;
pub mod json;
pub mod slices;
