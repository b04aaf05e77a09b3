//! Usage Analysis Engine
//!
//! Coordinates one full cycle of the engine:
//!
//! 1. **Discovery**: [`FileDiscovery`] lists log files under the data roots
//! 2. **Ingestion**: [`IngestPipeline`] parses and deduplicates them in parallel
//! 3. **Costing**: [`fill_missing_costs`] settles costs per [`CostMode`]
//! 4. **Ordering**: events are sorted by timestamp
//! 5. **Reporting**: blocks are segmented or days aggregated, with the date
//!    range applied at the [`FilterStage`] each report requires
//!
//! The analyzer owns its [`DedupSet`]. Running two cycles on the same
//! analyzer therefore never returns an already-admitted event twice.

use crate::blocks::{
    filter_blocks_by_range, filter_events_by_range, filter_recent_blocks, identify_session_blocks,
    DateRange, FilterStage,
};
use crate::config::Config;
use crate::dedup::DedupSet;
use crate::error::IngestError;
use crate::file_discovery::{FileDiscovery, ScanOptions};
use crate::models::{DailyUsage, SessionBlock, UsageEvent};
use crate::parser::{ParseStats, ParserOptions, UsageParser};
use crate::pipeline::{CancelFlag, IngestPipeline};
use crate::pricing::{fill_missing_costs, CostCalculator, CostMode, EmbeddedPricing};
use crate::reports::daily_usage;
use crate::timezone::DisplayTimezone;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, instrument};

/// Everything one analyzer needs, resolved from config and CLI flags
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub roots: Vec<PathBuf>,
    pub workers: usize,
    pub session_duration: Duration,
    pub cost_mode: CostMode,
    pub timezone: DisplayTimezone,
    pub scan: ScanOptions,
    pub parser: ParserOptions,
}

impl AnalyzerOptions {
    /// Options for bulk reports: no freshness window, no file cap
    pub fn from_config(config: &Config) -> Self {
        Self {
            roots: config.data_roots(),
            workers: config.processing.workers,
            session_duration: Duration::hours(config.blocks.duration_hours),
            cost_mode: CostMode::default(),
            timezone: config.output.timezone.parse().unwrap_or_default(),
            scan: ScanOptions {
                modified_within: None,
                max_files: None,
                sample_lines: config.processing.sample_lines,
                max_line_bytes: config.processing.max_line_kb * 1024,
            },
            parser: ParserOptions::from(&config.processing),
        }
    }

    /// Options for the live dashboard: few workers, recent files only
    pub fn live_from_config(config: &Config) -> Self {
        let hours = config.live.modified_within_hours.max(0) as u64;
        let mut options = Self::from_config(config);
        options.workers = config.processing.live_workers;
        options.scan.modified_within = Some(StdDuration::from_secs(hours * 3600));
        options.scan.max_files = Some(config.live.max_files);
        options
    }
}

/// Ingestion totals for one cycle
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub files: usize,
    pub failed_files: usize,
    pub duplicates: usize,
    pub stats: ParseStats,
}

/// Cost-settled, time-sorted events from one cycle
#[derive(Debug, Default)]
pub struct LoadedEvents {
    pub events: Vec<UsageEvent>,
    pub summary: IngestSummary,
}

/// Which report is being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Blocks,
    Daily,
}

impl ReportKind {
    pub fn filter_stage(&self) -> FilterStage {
        match self {
            Self::Blocks => FilterStage::AfterSegmentation,
            Self::Daily => FilterStage::BeforeSegmentation,
        }
    }
}

pub struct UsageAnalyzer {
    options: AnalyzerOptions,
    discovery: FileDiscovery,
    pipeline: IngestPipeline,
    calculator: Arc<dyn CostCalculator>,
}

impl UsageAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self::with_parts(
            options,
            Arc::new(DedupSet::new()),
            Arc::new(EmbeddedPricing::default()),
        )
    }

    pub fn with_parts(
        options: AnalyzerOptions,
        dedup: Arc<DedupSet>,
        calculator: Arc<dyn CostCalculator>,
    ) -> Self {
        let discovery = FileDiscovery::new(options.scan.clone());
        let pipeline = IngestPipeline::new(UsageParser::new(options.parser), dedup, options.workers);
        Self {
            options,
            discovery,
            pipeline,
            calculator,
        }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn dedup(&self) -> &Arc<DedupSet> {
        self.pipeline.dedup()
    }

    /// Scan, ingest and cost one cycle's events, sorted by timestamp
    #[instrument(skip_all, fields(roots = self.options.roots.len(), workers = self.options.workers))]
    pub fn load_events(&self, cancel: &CancelFlag) -> Result<LoadedEvents, IngestError> {
        let files = self.discovery.scan(&self.options.roots)?;
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let outcome = self.pipeline.ingest(&files, cancel)?;
        let mut events = outcome.events;
        fill_missing_costs(&mut events, self.calculator.as_ref(), self.options.cost_mode);
        events.sort_by_key(|e| e.timestamp);

        Ok(LoadedEvents {
            events,
            summary: IngestSummary {
                files: outcome.files_processed,
                failed_files: outcome.failed_files.len(),
                duplicates: outcome.duplicates,
                stats: outcome.stats,
            },
        })
    }

    /// Session blocks over the whole history, then narrowed to `range`
    pub fn session_blocks(&self, range: &DateRange, cancel: &CancelFlag) -> Result<Vec<SessionBlock>, IngestError> {
        let loaded = self.load_events(cancel)?;
        let stage = ReportKind::Blocks.filter_stage();

        let events = self.apply_event_range(stage, loaded.events, range);
        let blocks = identify_session_blocks(events, self.options.session_duration);
        let blocks = self.apply_block_range(stage, blocks, range);

        info!(blocks = blocks.len(), "Session blocks ready");
        Ok(blocks)
    }

    /// Blocks started within `days`, plus the active one
    pub fn recent_blocks(
        &self,
        days: i64,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Vec<SessionBlock>, IngestError> {
        let blocks = self.session_blocks(&DateRange::default(), cancel)?;
        Ok(filter_recent_blocks(blocks, days, now))
    }

    /// Per-date totals of the events inside `range`
    pub fn daily(&self, range: &DateRange, cancel: &CancelFlag) -> Result<Vec<DailyUsage>, IngestError> {
        let loaded = self.load_events(cancel)?;
        let events = self.apply_event_range(ReportKind::Daily.filter_stage(), loaded.events, range);
        Ok(daily_usage(&events, &self.options.timezone))
    }

    fn apply_event_range(&self, stage: FilterStage, events: Vec<UsageEvent>, range: &DateRange) -> Vec<UsageEvent> {
        match stage {
            FilterStage::BeforeSegmentation => filter_events_by_range(events, range, &self.options.timezone),
            FilterStage::AfterSegmentation => events,
        }
    }

    fn apply_block_range(&self, stage: FilterStage, blocks: Vec<SessionBlock>, range: &DateRange) -> Vec<SessionBlock> {
        match stage {
            FilterStage::BeforeSegmentation => blocks,
            FilterStage::AfterSegmentation => filter_blocks_by_range(blocks, range, &self.options.timezone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn line(ts: &str, id: &str, tokens: u64) -> String {
        format!(
            r#"{{"timestamp":"{ts}","requestId":"req-{id}","message":{{"id":"msg-{id}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{tokens},"output_tokens":0}}}}}}"#
        )
    }

    fn options(root: PathBuf) -> AnalyzerOptions {
        let mut options = AnalyzerOptions::from_config(&Config::default());
        options.roots = vec![root];
        options.timezone = DisplayTimezone::Utc;
        options.workers = 2;
        options
    }

    #[test]
    fn test_blocks_filter_after_segmentation() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("projects").join("-home-app");
        fs::create_dir_all(&project).unwrap();
        // One block spanning midnight: 22:30 on the 14th to 01:00 on the 15th
        fs::write(
            project.join("s.jsonl"),
            [
                line("2024-01-14T22:30:00Z", "1", 10),
                line("2024-01-15T01:00:00Z", "2", 20),
            ]
            .join("\n"),
        )
        .unwrap();

        let analyzer = UsageAnalyzer::new(options(dir.path().to_path_buf()));
        let range = DateRange::new(chrono::NaiveDate::from_ymd_opt(2024, 1, 14), None);
        let blocks = analyzer.session_blocks(&range, &CancelFlag::new()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].entries.len(), 2);
        assert_eq!(blocks[0].entries[0].project, "home-app");
    }

    #[test]
    fn test_daily_filters_before_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("projects").join("app");
        fs::create_dir_all(&project).unwrap();
        fs::write(
            project.join("s.jsonl"),
            [
                line("2024-01-14T22:30:00Z", "1", 10),
                line("2024-01-15T01:00:00Z", "2", 20),
            ]
            .join("\n"),
        )
        .unwrap();

        let analyzer = UsageAnalyzer::new(options(dir.path().to_path_buf()));
        let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 15);
        let days = analyzer
            .daily(&DateRange::new(day, day), &CancelFlag::new())
            .unwrap();

        assert_eq!(days.len(), 1);
        assert_eq!(days[0].total_tokens, 20);
        // Costs filled from the embedded table
        assert!(days[0].cost_usd > 0.0);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let analyzer = UsageAnalyzer::new(options(PathBuf::from("/no/such/root")));
        let result = analyzer.session_blocks(&DateRange::default(), &CancelFlag::new());
        assert!(matches!(result, Err(IngestError::RootUnreadable { .. })));
    }

    #[test]
    fn test_report_stages() {
        assert_eq!(ReportKind::Blocks.filter_stage(), FilterStage::AfterSegmentation);
        assert_eq!(ReportKind::Daily.filter_stage(), FilterStage::BeforeSegmentation);
    }
}
