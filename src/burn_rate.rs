//! Burn-Rate & Projection Calculator
//!
//! Both values are derived on demand from a finished [`SessionBlock`] and
//! recomputed on every dashboard tick; nothing here keeps state.

use crate::models::{BurnRate, ProjectedUsage, SessionBlock};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Indicator thresholds in non-cache tokens per minute
pub const MODERATE_BURN_THRESHOLD: f64 = 500.0;
pub const HIGH_BURN_THRESHOLD: f64 = 1000.0;

/// Rate of consumption within a block.
///
/// Returns `None` for gap blocks, empty blocks and blocks whose first and
/// last events share a timestamp.
pub fn calculate_burn_rate(block: &SessionBlock) -> Option<BurnRate> {
    if block.is_gap {
        return None;
    }

    let first = block.entries.first()?.timestamp;
    let last = block.entries.last()?.timestamp;
    let duration_minutes = (last - first).num_milliseconds() as f64 / 60_000.0;
    if duration_minutes <= 0.0 {
        return None;
    }

    let total_tokens = block.token_counts.total() as f64;
    let non_cache_tokens = block.token_counts.non_cache_total() as f64;

    Some(BurnRate {
        tokens_per_minute: total_tokens / duration_minutes,
        tokens_per_minute_for_indicator: non_cache_tokens / duration_minutes,
        cost_per_hour: (block.cost_usd / duration_minutes) * 60.0,
    })
}

/// Linear extrapolation of an active block to its nominal end
pub fn project_block_usage(block: &SessionBlock, now: DateTime<Utc>) -> Option<ProjectedUsage> {
    if block.is_gap || !block.is_active_at(now) {
        return None;
    }

    let burn_rate = calculate_burn_rate(block)?;
    let remaining_minutes = ((block.end_time - now).num_milliseconds() as f64 / 60_000.0).max(0.0);

    let total_tokens =
        block.token_counts.total() as f64 + burn_rate.tokens_per_minute * remaining_minutes;
    let total_cost = block.cost_usd + (burn_rate.cost_per_hour / 60.0) * remaining_minutes;

    Some(ProjectedUsage {
        total_tokens: total_tokens.round() as u64,
        total_cost: (total_cost * 100.0).round() / 100.0,
        remaining_minutes: remaining_minutes.round() as u64,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BurnIntensity {
    Normal,
    Moderate,
    High,
}

impl BurnIntensity {
    pub fn classify(rate: &BurnRate) -> Self {
        let tpm = rate.tokens_per_minute_for_indicator;
        if tpm >= HIGH_BURN_THRESHOLD {
            Self::High
        } else if tpm >= MODERATE_BURN_THRESHOLD {
            Self::Moderate
        } else {
            Self::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
        }
    }
}
