//! Session Block Segmenter
//!
//! Groups a time-sorted event stream into fixed-duration billing windows.
//!
//! A block is anchored at the hour floor of its first event and covers
//! `[start, start + duration)`. An event closes the current block when it
//! falls at or past the block's nominal end, or when more than one duration
//! has passed since the block's last event. The second case also emits a gap
//! block covering `[last_event + duration, event)`.
//!
//! Continuation is always measured from the floored anchor, never from the
//! raw first-event time; shifting that changes every historical boundary.
//!
//! Segmentation is a pure function of the sorted input. Whether a block is
//! active is asked separately with [`SessionBlock::is_active_at`].

use crate::models::{SessionBlock, TokenCounts, UsageEvent};
use crate::timezone::DisplayTimezone;
use chrono::{DateTime, Duration, DurationRound, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeSet;
use tracing::debug;

/// Default block length in hours
pub const DEFAULT_SESSION_DURATION_HOURS: i64 = 5;

/// Longest accepted block length in hours
pub const MAX_SESSION_DURATION_HOURS: i64 = 24 * 7;

/// Floors a timestamp to the beginning of its UTC hour
pub fn floor_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp)
}

enum State {
    NoBlock,
    Building {
        start: DateTime<Utc>,
        entries: Vec<UsageEvent>,
    },
}

/// Incremental state machine behind [`identify_session_blocks`].
///
/// Events must be pushed in ascending timestamp order.
pub struct BlockSegmenter {
    duration: Duration,
    state: State,
    blocks: Vec<SessionBlock>,
}

impl BlockSegmenter {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: State::NoBlock,
            blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, event: UsageEvent) {
        self.state = match std::mem::replace(&mut self.state, State::NoBlock) {
            State::NoBlock => State::Building {
                start: floor_to_hour(event.timestamp),
                entries: vec![event],
            },
            State::Building { start, mut entries } => {
                let last_time = entries.last().map_or(start, |e| e.timestamp);
                let since_block_start = event.timestamp - start;
                let since_last_event = event.timestamp - last_time;

                if since_block_start >= self.duration || since_last_event > self.duration {
                    self.blocks.push(create_block(start, entries, self.duration));
                    if since_last_event > self.duration {
                        self.blocks
                            .push(create_gap_block(last_time, event.timestamp, self.duration));
                    }
                    State::Building {
                        start: floor_to_hour(event.timestamp),
                        entries: vec![event],
                    }
                } else {
                    entries.push(event);
                    State::Building { start, entries }
                }
            }
        };
    }

    /// Close whatever block is still open and return all blocks
    pub fn finish(mut self) -> Vec<SessionBlock> {
        if let State::Building { start, entries } = self.state {
            self.blocks.push(create_block(start, entries, self.duration));
        }
        self.blocks
    }
}

/// Segment events into session blocks. Sorts (stably) by timestamp first.
pub fn identify_session_blocks(mut events: Vec<UsageEvent>, duration: Duration) -> Vec<SessionBlock> {
    if events.is_empty() {
        return Vec::new();
    }

    events.sort_by_key(|e| e.timestamp);

    let event_count = events.len();
    let mut segmenter = BlockSegmenter::new(duration);
    for event in events {
        segmenter.push(event);
    }
    let blocks = segmenter.finish();

    debug!(
        events = event_count,
        blocks = blocks.len(),
        gaps = blocks.iter().filter(|b| b.is_gap).count(),
        "Segmented session blocks"
    );
    blocks
}

fn create_block(start_time: DateTime<Utc>, entries: Vec<UsageEvent>, duration: Duration) -> SessionBlock {
    let mut token_counts = TokenCounts::default();
    let mut cost_usd = 0.0;
    let mut models = BTreeSet::new();

    for entry in &entries {
        token_counts += entry.tokens;
        cost_usd += entry.cost_usd;
        models.insert(entry.model.clone());
    }

    SessionBlock {
        id: start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        start_time,
        end_time: start_time + duration,
        actual_end_time: entries.last().map(|e| e.timestamp),
        token_counts,
        cost_usd,
        models: models.into_iter().collect(),
        is_gap: false,
        entries,
    }
}

fn create_gap_block(
    last_activity_time: DateTime<Utc>,
    next_activity_time: DateTime<Utc>,
    duration: Duration,
) -> SessionBlock {
    let gap_start = last_activity_time + duration;

    SessionBlock {
        id: format!("gap-{}", gap_start.to_rfc3339_opts(SecondsFormat::Millis, true)),
        start_time: gap_start,
        end_time: next_activity_time,
        actual_end_time: None,
        token_counts: TokenCounts::default(),
        cost_usd: 0.0,
        models: Vec::new(),
        is_gap: true,
        entries: Vec::new(),
    }
}

/// Inclusive calendar-date range in the display timezone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self { since, until }
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>, tz: &DisplayTimezone) -> bool {
        let date = tz.date_of(ts);
        self.since.map_or(true, |since| date >= since) && self.until.map_or(true, |until| date <= until)
    }
}

/// Where a report applies its date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    /// Drop events before aggregation (daily report)
    BeforeSegmentation,
    /// Segment the full history, then drop blocks by start time (blocks report)
    AfterSegmentation,
}

pub fn filter_events_by_range(
    events: Vec<UsageEvent>,
    range: &DateRange,
    tz: &DisplayTimezone,
) -> Vec<UsageEvent> {
    if range.is_unbounded() {
        return events;
    }
    events
        .into_iter()
        .filter(|e| range.contains(e.timestamp, tz))
        .collect()
}

pub fn filter_blocks_by_range(
    blocks: Vec<SessionBlock>,
    range: &DateRange,
    tz: &DisplayTimezone,
) -> Vec<SessionBlock> {
    if range.is_unbounded() {
        return blocks;
    }
    blocks
        .into_iter()
        .filter(|b| range.contains(b.start_time, tz))
        .collect()
}

/// Keep blocks started within the last `days`, plus any block still active
pub fn filter_recent_blocks(blocks: Vec<SessionBlock>, days: i64, now: DateTime<Utc>) -> Vec<SessionBlock> {
    let cutoff = now - Duration::days(days);
    blocks
        .into_iter()
        .filter(|block| block.start_time >= cutoff || block.is_active_at(now))
        .collect()
}

/// The block active at `now`, if any
pub fn active_block(blocks: &[SessionBlock], now: DateTime<Utc>) -> Option<&SessionBlock> {
    blocks.iter().rev().find(|b| b.is_active_at(now))
}

/// Largest token total among completed real blocks; the automatic dashboard limit
pub fn max_block_tokens(blocks: &[SessionBlock], now: DateTime<Utc>) -> u64 {
    blocks
        .iter()
        .filter(|b| !b.is_gap && !b.is_active_at(now))
        .map(SessionBlock::total_tokens)
        .max()
        .unwrap_or(0)
}
