use chrono::{DateTime, Duration, Utc};
use usage_blocks::analyzer::{AnalyzerOptions, UsageAnalyzer};
use usage_blocks::blocks::{floor_to_hour, max_block_tokens};
use usage_blocks::config::Config;
use usage_blocks::timezone::DisplayTimezone;
use usage_blocks::{identify_session_blocks, CancelFlag, DateRange, TokenCounts, UsageEvent};

mod common;
use common::{ts, usage_line, Fixture};

fn event(at: DateTime<Utc>, tokens: u64) -> UsageEvent {
    UsageEvent {
        timestamp: at,
        model: "claude-sonnet-4-20250514".to_string(),
        tokens: TokenCounts {
            input_tokens: tokens,
            output_tokens: 0,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        },
        cost_usd: 0.01,
        session_id: None,
        message_id: None,
        request_id: None,
        project: "app".to_string(),
    }
}

/// Deterministic irregular event stream with bursts and long pauses
fn irregular_events(count: usize) -> Vec<UsageEvent> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut at = ts("2024-01-01T00:17:00Z");
    let mut events = Vec::with_capacity(count);
    for i in 0..count {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let step_minutes = match (state >> 33) % 10 {
            0 => 60 * 11,
            1 => 60 * 5,
            2 | 3 => 45,
            _ => 1 + ((state >> 40) % 20) as i64,
        };
        at += Duration::minutes(step_minutes);
        events.push(event(at, (i as u64 % 7) + 1));
    }
    events
}

fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

#[test]
fn test_segmentation_is_idempotent() {
    let events = irregular_events(400);
    let first = identify_session_blocks(events.clone(), hours(5));

    let flattened: Vec<UsageEvent> = first.iter().flat_map(|b| b.entries.clone()).collect();
    let second = identify_session_blocks(flattened, hours(5));
    assert_eq!(first, second);
}

#[test]
fn test_input_order_does_not_matter() {
    let events = irregular_events(200);
    let mut shuffled = events.clone();
    shuffled.reverse();
    assert_eq!(
        identify_session_blocks(events, hours(5)),
        identify_session_blocks(shuffled, hours(5))
    );
}

#[test]
fn test_partition_is_complete_and_disjoint() {
    let events = irregular_events(400);
    let total: u64 = events.iter().map(UsageEvent::total_tokens).sum();
    let blocks = identify_session_blocks(events.clone(), hours(5));

    let entries: usize = blocks.iter().map(|b| b.entries.len()).sum();
    assert_eq!(entries, events.len());
    assert_eq!(blocks.iter().map(|b| b.total_tokens()).sum::<u64>(), total);

    for block in &blocks {
        if block.is_gap {
            assert!(block.entries.is_empty());
            assert_eq!(block.total_tokens(), 0);
            continue;
        }
        assert_eq!(block.end_time - block.start_time, hours(5));
        assert_eq!(block.start_time, floor_to_hour(block.start_time));
        for entry in &block.entries {
            assert!(entry.timestamp >= block.start_time);
            assert!(entry.timestamp < block.end_time);
        }
    }

    let real: Vec<_> = blocks.iter().filter(|b| !b.is_gap).collect();
    for pair in real.windows(2) {
        assert!(pair[0].end_time <= pair[1].start_time);
    }
}

#[test]
fn test_gap_block_bounds() {
    let events = vec![
        event(ts("2024-01-15T10:00:00Z"), 10),
        event(ts("2024-01-15T16:00:00Z"), 20),
    ];
    let blocks = identify_session_blocks(events, hours(5));

    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].id, "2024-01-15T10:00:00.000Z");
    assert!(blocks[1].is_gap);
    assert_eq!(blocks[1].id, "gap-2024-01-15T15:00:00.000Z");
    assert_eq!(blocks[1].start_time, ts("2024-01-15T15:00:00Z"));
    assert_eq!(blocks[1].end_time, ts("2024-01-15T16:00:00Z"));
    assert_eq!(blocks[2].start_time, ts("2024-01-15T16:00:00Z"));
}

#[test]
fn test_no_gap_when_pause_equals_duration() {
    let events = vec![
        event(ts("2024-01-15T10:30:00Z"), 10),
        event(ts("2024-01-15T15:30:00Z"), 20),
    ];
    let blocks = identify_session_blocks(events, hours(5));
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|b| !b.is_gap));
}

#[test]
fn test_event_at_exact_block_end_opens_new_block() {
    let events = vec![
        event(ts("2024-01-15T10:00:00Z"), 10),
        event(ts("2024-01-15T14:59:59Z"), 10),
        event(ts("2024-01-15T15:00:00Z"), 10),
    ];
    let blocks = identify_session_blocks(events, hours(5));
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].entries.len(), 2);
    assert_eq!(blocks[1].start_time, ts("2024-01-15T15:00:00Z"));
}

#[test]
fn test_floored_anchor_shortens_first_block() {
    // 10:59 anchors at 10:00, so 15:30 falls outside even though only 4.5h passed
    let events = vec![
        event(ts("2024-01-15T10:59:00Z"), 10),
        event(ts("2024-01-15T15:30:00Z"), 10),
    ];
    let blocks = identify_session_blocks(events, hours(5));
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].start_time, ts("2024-01-15T10:00:00Z"));
    assert_eq!(blocks[1].start_time, ts("2024-01-15T15:00:00Z"));
    assert!(blocks.iter().all(|b| !b.is_gap));
}

#[test]
fn test_custom_duration() {
    let events = vec![
        event(ts("2024-01-15T10:00:00Z"), 10),
        event(ts("2024-01-15T11:30:00Z"), 10),
    ];
    let blocks = identify_session_blocks(events, hours(1));
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].end_time, ts("2024-01-15T11:00:00Z"));
    assert_eq!(blocks[1].start_time, ts("2024-01-15T11:00:00Z"));
}

#[test]
fn test_max_block_tokens_ignores_active_and_gaps() {
    let now = ts("2024-01-16T02:00:00Z");
    let events = vec![
        event(ts("2024-01-15T08:00:00Z"), 500),
        event(ts("2024-01-15T20:00:00Z"), 100),
        // Opens a new block that is still active at `now`
        event(ts("2024-01-16T01:30:00Z"), 9000),
    ];
    let blocks = identify_session_blocks(events, hours(5));
    assert_eq!(max_block_tokens(&blocks, now), 500);
}

#[test]
fn test_analyzer_blocks_end_to_end() {
    let fixture = Fixture::new();
    fixture.write_log(
        "app",
        "session.jsonl",
        &[
            usage_line(ts("2024-01-15T10:05:00Z"), Some("m1"), Some("r1"), 100, 50),
            usage_line(ts("2024-01-15T10:05:00Z"), Some("m1"), Some("r1"), 100, 50),
            usage_line(ts("2024-01-15T12:00:00Z"), Some("m2"), Some("r2"), 200, 100),
            usage_line(ts("2024-01-16T09:00:00Z"), Some("m3"), Some("r3"), 10, 10),
        ],
    );

    let mut options = AnalyzerOptions::from_config(&Config::default());
    options.roots = vec![fixture.root().to_path_buf()];
    options.timezone = DisplayTimezone::Utc;
    options.workers = 2;
    let analyzer = UsageAnalyzer::new(options);

    let blocks = analyzer
        .session_blocks(&DateRange::default(), &CancelFlag::new())
        .unwrap();
    let real: Vec<_> = blocks.iter().filter(|b| !b.is_gap).collect();
    assert_eq!(real.len(), 2);
    assert_eq!(real[0].total_tokens(), 450);
    assert_eq!(real[0].entries.len(), 2);
    assert!(real[0].cost_usd > 0.0);

    let since = chrono::NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
    let blocks = UsageAnalyzer::new({
        let mut options = AnalyzerOptions::from_config(&Config::default());
        options.roots = vec![fixture.root().to_path_buf()];
        options.timezone = DisplayTimezone::Utc;
        options
    })
    .session_blocks(&DateRange::new(Some(since), None), &CancelFlag::new())
    .unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].total_tokens(), 20);
}
