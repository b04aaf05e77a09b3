//! Core Data Models
//!
//! This module defines the data structures that flow through the engine, from the raw
//! shape of a log line to the derived statistics handed to the dashboard.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`RawRecord`] - one JSONL line, every field optional
//! 2. **Validated Event**: [`UsageEvent`] - a strongly typed, immutable usage record
//! 3. **Segmentation**: [`SessionBlock`] - events grouped into fixed-duration windows
//! 4. **Derived**: [`BurnRate`], [`ProjectedUsage`] - recomputed on every read
//! 5. **Reports**: [`DailyUsage`] - per calendar date totals
//!
//! ## Invariants
//!
//! - Token counts are unsigned; a line with negative or fractional counts never
//!   becomes a [`UsageEvent`].
//! - A [`SessionBlock`] covers the half-open interval `[start_time, end_time)`.
//! - Gap blocks carry no entries, zero tokens and zero cost.
//! - Whether a block is active depends on the wall clock, so it is a method
//!   ([`SessionBlock::is_active_at`]) rather than a stored field.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::AddAssign;

/// One JSONL line as written by the producer. Unknown fields are ignored.
///
/// Both spellings of the id and cost fields are kept as separate fields so a
/// line carrying both never fails to decode; the accessors pick one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// RFC3339 string, or a Unix timestamp in seconds/milliseconds.
    pub timestamp: Option<serde_json::Value>,
    /// `None` when absent or not an object.
    #[serde(default, deserialize_with = "lenient_message")]
    pub message: Option<RawMessage>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "request_id")]
    pub request_id_snake: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "session_id")]
    pub session_id_snake: Option<String>,
    #[serde(rename = "costUSD")]
    pub cost_usd: Option<serde_json::Value>,
    pub cost: Option<serde_json::Value>,
}

impl RawRecord {
    pub fn request_id(&self) -> Option<&str> {
        first_non_empty(&self.request_id, &self.request_id_snake)
    }

    pub fn session_id(&self) -> Option<&str> {
        first_non_empty(&self.session_id, &self.session_id_snake)
    }

    /// Logged cost; numeric strings are accepted, anything else counts as 0
    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
            .as_ref()
            .or(self.cost.as_ref())
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|c: &f64| c.is_finite())
            .unwrap_or(0.0)
    }
}

fn first_non_empty<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<&'a str> {
    a.as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| b.as_deref().filter(|s| !s.is_empty()))
}

fn lenient_message<'de, D>(deserializer: D) -> Result<Option<RawMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(value @ serde_json::Value::Object(_)) => RawMessage::deserialize(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<RawUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

/// Token counts by kind. Used both per event and as block aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "cacheCreationInputTokens")]
    pub cache_creation_input_tokens: u64,
    #[serde(rename = "cacheReadInputTokens")]
    pub cache_read_input_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    /// Input plus output, excluding both cache kinds.
    pub fn non_cache_total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// Identity of a logical event across files and retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub message_id: String,
    pub request_id: String,
}

/// A validated usage record. Created once by the parser and never mutated
/// afterwards, except for cost filling before segmentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub tokens: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub project: String,
}

impl UsageEvent {
    /// Events missing either identifier are never deduplicated.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        match (self.message_id.as_deref(), self.request_id.as_deref()) {
            (Some(message_id), Some(request_id))
                if !message_id.is_empty() && !request_id.is_empty() =>
            {
                Some(DedupKey {
                    message_id: message_id.to_string(),
                    request_id: request_id.to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// A fixed-duration billing window, or a synthetic gap between two of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    /// Canonical start time (RFC3339); gap blocks are prefixed with `gap-`.
    pub id: String,
    pub start_time: DateTime<Utc>,
    /// Nominal end: `start_time + duration` for real blocks, next activity for gaps.
    pub end_time: DateTime<Utc>,
    /// Timestamp of the last real event in the block.
    pub actual_end_time: Option<DateTime<Utc>>,
    pub token_counts: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    /// Sorted, unique.
    pub models: Vec<String>,
    pub is_gap: bool,
    #[serde(skip)]
    pub entries: Vec<UsageEvent>,
}

impl SessionBlock {
    pub fn first_event_time(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.timestamp)
    }

    /// True when the last real activity is within one block duration of `now`
    /// and `now` has not yet reached the nominal end.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_gap {
            return false;
        }
        let Some(actual_end) = self.actual_end_time else {
            return false;
        };
        let duration = self.end_time - self.start_time;
        now - actual_end < duration && now < self.end_time
    }

    pub fn total_tokens(&self) -> u64 {
        self.token_counts.total()
    }
}

/// Rate of consumption inside a block. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    /// Excludes cache tokens; only used to classify burn intensity.
    pub tokens_per_minute_for_indicator: f64,
    pub cost_per_hour: f64,
}

/// Linear extrapolation of an active block to its nominal end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedUsage {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub remaining_minutes: u64,
}

/// Totals for one calendar date in the display timezone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub token_counts: TokenCounts,
    pub total_tokens: u64,
    #[serde(rename = "totalCost")]
    pub cost_usd: f64,
    pub models_used: Vec<String>,
    pub entries: usize,
}
