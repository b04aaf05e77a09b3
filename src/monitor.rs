//! Real-time Session Monitoring
//!
//! Polls the engine on a fixed interval and renders the active block's
//! usage, burn rate and projection.
//!
//! ## Refresh cycle
//!
//! Every tick rescans and reparses the (freshness-pruned) log files from
//! scratch on a blocking thread. The monitor's [`DedupSet`] lives for the
//! whole process, so only events not seen on an earlier tick come back; they
//! are merged into the accumulated event list, which is then re-sorted and
//! re-segmented. Rendering happens only after the reload finishes.
//!
//! Ctrl+C sets the shared [`CancelFlag`]; an in-flight reload stops at the
//! next file and its partial results are discarded.
//!
//! ```text
//! Usage Live (14:23:05)
//! Block 2025-01-15 10:00 → 15:00 • 65,000 tokens • $3.25
//! [████████████░░░░░░░░░░░░░░░░░░░░░░░░░░░░] 30.1% of 216,000
//!    burn rate: 540 tokens/min (MODERATE) • $2.40/h
//!    projected: 162,200 tokens • $8.65 • 2h 15m left
//! ```
//!
//! [`DedupSet`]: crate::dedup::DedupSet

use crate::analyzer::UsageAnalyzer;
use crate::blocks::{active_block, identify_session_blocks};
use crate::error::IngestError;
use crate::models::{SessionBlock, UsageEvent};
use crate::pipeline::CancelFlag;
use crate::reports::{BlockView, LiveSnapshot, ReportRenderer, TokenLimit};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub refresh: Duration,
    pub token_limit: Option<TokenLimit>,
    pub json_output: bool,
}

pub struct LiveMonitor {
    analyzer: Arc<UsageAnalyzer>,
    renderer: ReportRenderer,
    options: MonitorOptions,
    events: Vec<UsageEvent>,
}

impl LiveMonitor {
    pub fn new(analyzer: UsageAnalyzer, renderer: ReportRenderer, options: MonitorOptions) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            renderer,
            options,
            events: Vec::new(),
        }
    }

    /// Events accumulated across all ticks so far
    pub fn events(&self) -> &[UsageEvent] {
        &self.events
    }

    /// Reload once and return the re-segmented blocks
    pub async fn refresh(&mut self, cancel: &CancelFlag) -> Result<Vec<SessionBlock>> {
        let analyzer = Arc::clone(&self.analyzer);
        let cancel = cancel.clone();
        let duration = analyzer.options().session_duration;
        let mut events = std::mem::take(&mut self.events);

        let (events, result) = tokio::task::spawn_blocking(move || {
            match analyzer.load_events(&cancel) {
                Ok(loaded) => {
                    debug!(new_events = loaded.events.len(), "Merged reload");
                    events.extend(loaded.events);
                    events.sort_by_key(|e| e.timestamp);
                    let blocks = identify_session_blocks(events.clone(), duration);
                    (events, Ok(blocks))
                }
                Err(e) => (events, Err(e)),
            }
        })
        .await
        .context("Reload task failed")?;

        self.events = events;
        Ok(result?)
    }

    /// Render one frame for `blocks` as seen at `now`
    pub fn frame(&self, blocks: &[SessionBlock], now: DateTime<Utc>) -> Result<String> {
        let token_limit = self.options.token_limit.and_then(|l| l.resolve(blocks, now));
        let snapshot = LiveSnapshot {
            generated_at: now,
            active_block: active_block(blocks, now).map(|b| BlockView::new(b, now, token_limit)),
            token_limit,
            events: self.events.len(),
            blocks: blocks.iter().filter(|b| !b.is_gap).count(),
        };

        if self.options.json_output {
            self.renderer.live_json(&snapshot)
        } else {
            Ok(self.renderer.live_text(&snapshot))
        }
    }

    /// Print a single frame and return
    pub async fn snapshot(&mut self) -> Result<()> {
        let blocks = self.refresh(&CancelFlag::new()).await?;
        println!("{}", self.frame(&blocks, Utc::now())?);
        Ok(())
    }

    /// Refresh until Ctrl+C
    pub async fn run(&mut self) -> Result<()> {
        let cancel = CancelFlag::new();
        let mut interval = time::interval(self.options.refresh);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        hide_cursor();
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                _ = interval.tick() => {}
            }

            let reload = tokio::select! {
                _ = &mut ctrl_c => None,
                result = self.refresh(&cancel) => Some(result),
            };
            let Some(result) = reload else {
                break;
            };

            match result {
                Ok(blocks) => {
                    let frame = self.frame(&blocks, Utc::now())?;
                    clear_screen();
                    print!("{frame}");
                    let _ = io::stdout().flush();
                }
                Err(e) if is_cancelled(&e) => break,
                Err(e) => {
                    warn!(error = %e, "Live reload failed");
                    clear_screen();
                    println!("Reload failed: {e:#}");
                }
            }
        }

        cancel.cancel();
        show_cursor();
        println!("\nMonitoring stopped.");
        Ok(())
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<IngestError>(), Some(IngestError::Cancelled))
}

fn clear_screen() {
    print!("\x1b[2J\x1b[H");
    let _ = io::stdout().flush();
}

fn hide_cursor() {
    print!("\x1b[?25l");
    let _ = io::stdout().flush();
}

fn show_cursor() {
    print!("\x1b[?25h");
    let _ = io::stdout().flush();
}
