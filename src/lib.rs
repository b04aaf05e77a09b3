//! Usage Blocks Library
//!
//! Ingests the append-only JSONL usage logs written by Claude Code, removes
//! duplicate events, and partitions the result into fixed-duration billing
//! windows ("session blocks") with burn-rate and cost projections.
//!
//! ## Architecture Overview
//!
//! Leaf-first:
//!
//! - [`file_discovery`] - enumerates log files, prunes stale projects, orders files
//! - [`parser`] - streaming line reader and validator producing [`UsageEvent`]s
//! - [`dedup`] - the shared `(message id, request id)` identity set
//! - [`pipeline`] - rayon worker pool running parser + dedup per file
//! - [`blocks`] - the session block segmenter and block queries
//! - [`burn_rate`] - burn rate, projection and intensity
//! - [`pricing`] - embedded price table for events logged without a cost
//! - [`analyzer`] - runs one scan → ingest → cost → segment cycle
//! - [`reports`] - daily aggregation plus JSON and table rendering
//! - [`monitor`] - the polling live dashboard
//! - [`config`] / [`logging`] - configuration and structured logging
//!
//! ## Main Entry Point
//!
//! ```no_run
//! use usage_blocks::{AnalyzerOptions, CancelFlag, Config, DateRange, UsageAnalyzer};
//!
//! let config = Config::default();
//! let analyzer = UsageAnalyzer::new(AnalyzerOptions::from_config(&config));
//! let blocks = analyzer.session_blocks(&DateRange::default(), &CancelFlag::new())?;
//! for block in &blocks {
//!     println!("{} {} tokens", block.id, block.total_tokens());
//! }
//! # Ok::<(), usage_blocks::IngestError>(())
//! ```

pub mod analyzer;
pub mod blocks;
pub mod burn_rate;
pub mod config;
pub mod dedup;
pub mod error;
pub mod file_discovery;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod pipeline;
pub mod pricing;
pub mod reports;
pub mod timestamp_parser;
pub mod timezone;

pub use analyzer::{AnalyzerOptions, UsageAnalyzer};
pub use blocks::{identify_session_blocks, DateRange, FilterStage};
pub use burn_rate::{calculate_burn_rate, project_block_usage, BurnIntensity};
pub use config::Config;
pub use dedup::DedupSet;
pub use error::{EntryError, IngestError};
pub use models::*;
pub use pipeline::{CancelFlag, IngestPipeline};
