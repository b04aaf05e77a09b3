//! Report aggregation and output formatting
//!
//! Everything here consumes already-computed blocks and events. Rendering
//! returns strings; printing is left to the caller.
//!
//! ### JSON shape (blocks)
//! ```json
//! {
//!   "blocks": [
//!     {
//!       "id": "2025-01-15T10:00:00.000Z",
//!       "startTime": "2025-01-15T10:00:00Z",
//!       "isActive": true,
//!       "burnRate": { "tokensPerMinute": 300.0, "costPerHour": 1.2 },
//!       "projection": { "totalTokens": 90000, "remainingMinutes": 120 }
//!     }
//!   ]
//! }
//! ```

use crate::blocks::max_block_tokens;
use crate::burn_rate::{calculate_burn_rate, project_block_usage, BurnIntensity};
use crate::models::{BurnRate, DailyUsage, ProjectedUsage, SessionBlock, TokenCounts, UsageEvent};
use crate::timezone::DisplayTimezone;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::str::FromStr;

/// Per-date token totals, cost and models, ascending by date
pub fn daily_usage(events: &[UsageEvent], tz: &DisplayTimezone) -> Vec<DailyUsage> {
    #[derive(Default)]
    struct Acc {
        tokens: TokenCounts,
        cost: f64,
        models: BTreeSet<String>,
        entries: usize,
    }

    let mut by_date: BTreeMap<NaiveDate, Acc> = BTreeMap::new();
    for event in events {
        let acc = by_date.entry(tz.date_of(event.timestamp)).or_default();
        acc.tokens += event.tokens;
        acc.cost += event.cost_usd;
        acc.models.insert(event.model.clone());
        acc.entries += 1;
    }

    by_date
        .into_iter()
        .map(|(date, acc)| DailyUsage {
            date,
            token_counts: acc.tokens,
            total_tokens: acc.tokens.total(),
            cost_usd: acc.cost,
            models_used: acc.models.into_iter().collect(),
            entries: acc.entries,
        })
        .collect()
}

/// Token budget for the active block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimit {
    Fixed(u64),
    /// Largest completed block in the loaded history
    Max,
}

impl TokenLimit {
    pub fn resolve(&self, blocks: &[SessionBlock], now: DateTime<Utc>) -> Option<u64> {
        let limit = match self {
            Self::Fixed(n) => *n,
            Self::Max => max_block_tokens(blocks, now),
        };
        (limit > 0).then_some(limit)
    }
}

impl FromStr for TokenLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("max") {
            return Ok(Self::Max);
        }
        let n = s
            .parse()
            .with_context(|| format!("Invalid token limit '{s}', expected a number or 'max'"))?;
        Ok(Self::Fixed(n))
    }
}

/// A block plus the values derived from it at `now`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView<'a> {
    #[serde(flatten)]
    pub block: &'a SessionBlock,
    pub entries: usize,
    pub total_tokens: u64,
    pub is_active: bool,
    pub burn_rate: Option<BurnRate>,
    pub burn_intensity: Option<BurnIntensity>,
    pub projection: Option<ProjectedUsage>,
    /// Share of the token limit used, in percent
    pub limit_usage: Option<f64>,
}

impl<'a> BlockView<'a> {
    pub fn new(block: &'a SessionBlock, now: DateTime<Utc>, token_limit: Option<u64>) -> Self {
        let burn_rate = calculate_burn_rate(block);
        Self {
            block,
            entries: block.entries.len(),
            total_tokens: block.total_tokens(),
            is_active: block.is_active_at(now),
            burn_intensity: burn_rate.as_ref().map(BurnIntensity::classify),
            burn_rate,
            projection: project_block_usage(block, now),
            limit_usage: token_limit
                .filter(|_| !block.is_gap)
                .map(|limit| block.total_tokens() as f64 / limit as f64 * 100.0),
        }
    }
}

/// What one live frame shows
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot<'a> {
    pub generated_at: DateTime<Utc>,
    pub active_block: Option<BlockView<'a>>,
    pub token_limit: Option<u64>,
    pub events: usize,
    pub blocks: usize,
}

pub struct ReportRenderer {
    timezone: DisplayTimezone,
    json_pretty: bool,
}

impl ReportRenderer {
    pub fn new(timezone: DisplayTimezone, json_pretty: bool) -> Self {
        Self {
            timezone,
            json_pretty,
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.json_pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        json.context("Failed to serialize report to JSON")
    }

    fn time(&self, ts: DateTime<Utc>) -> String {
        self.timezone.format(ts, "%Y-%m-%d %H:%M")
    }

    pub fn blocks_json(&self, views: &[BlockView<'_>]) -> Result<String> {
        self.to_json(&serde_json::json!({ "blocks": views }))
    }

    pub fn daily_json(&self, days: &[DailyUsage]) -> Result<String> {
        let totals = days.iter().fold((TokenCounts::default(), 0.0), |(mut t, c), d| {
            t += d.token_counts;
            (t, c + d.cost_usd)
        });
        self.to_json(&serde_json::json!({
            "daily": days,
            "totals": {
                "tokenCounts": totals.0,
                "totalTokens": totals.0.total(),
                "totalCost": totals.1,
            }
        }))
    }

    pub fn live_json(&self, snapshot: &LiveSnapshot<'_>) -> Result<String> {
        self.to_json(snapshot)
    }

    pub fn blocks_table(&self, views: &[BlockView<'_>]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", "=".repeat(80).bright_cyan());
        let _ = writeln!(out, "{}", "Usage Report - Session Blocks".bright_white().bold());
        let _ = writeln!(out, "{}", "=".repeat(80).bright_cyan());

        if views.is_empty() {
            let _ = writeln!(out, "\nNo session blocks found.");
            return out;
        }

        let _ = writeln!(
            out,
            "\n{:<18} {:<10} {:>14} {:>10}  {}",
            "Block Start", "Status", "Tokens", "Cost", "Models"
        );
        let _ = writeln!(out, "{}", "-".repeat(80));

        for view in views {
            let block = view.block;
            if block.is_gap {
                let hours = (block.end_time - block.start_time).num_minutes() as f64 / 60.0;
                let _ = writeln!(
                    out,
                    "{}",
                    format!("{:<18} {:<10} ({:.1}h idle)", self.time(block.start_time), "gap", hours)
                        .dimmed()
                );
                continue;
            }

            let status = if view.is_active {
                "ACTIVE".bright_green().bold().to_string()
            } else {
                "done".normal().to_string()
            };
            let _ = writeln!(
                out,
                "{:<18} {:<10} {:>14} {:>10}  {}",
                self.time(block.start_time),
                status,
                format_number(view.total_tokens).bright_white(),
                format!("${:.2}", block.cost_usd).bright_green(),
                block.models.join(", ").bright_cyan()
            );

            if view.is_active {
                self.write_active_details(&mut out, view);
            }
        }

        let real: Vec<_> = views.iter().filter(|v| !v.block.is_gap).collect();
        let total_tokens: u64 = real.iter().map(|v| v.total_tokens).sum();
        let total_cost: f64 = real.iter().map(|v| v.block.cost_usd).sum();
        let _ = writeln!(out, "{}", "-".repeat(80));
        let _ = writeln!(
            out,
            "{} blocks • {} tokens • {} total",
            real.len().to_string().bright_white().bold(),
            format_number(total_tokens).bright_white().bold(),
            format!("${:.2}", total_cost).bright_green().bold()
        );
        out
    }

    fn write_active_details(&self, out: &mut String, view: &BlockView<'_>) {
        if let (Some(rate), Some(intensity)) = (&view.burn_rate, view.burn_intensity) {
            let label = match intensity {
                BurnIntensity::High => intensity.label().bright_red().bold(),
                BurnIntensity::Moderate => intensity.label().bright_yellow(),
                BurnIntensity::Normal => intensity.label().bright_green(),
            };
            let _ = writeln!(
                out,
                "   burn rate: {} tokens/min ({}) • ${:.2}/h",
                format_number(rate.tokens_per_minute.round() as u64),
                label,
                rate.cost_per_hour
            );
        }
        if let Some(projection) = &view.projection {
            let _ = writeln!(
                out,
                "   projected: {} tokens • ${:.2} • {} left",
                format_number(projection.total_tokens),
                projection.total_cost,
                format_minutes(projection.remaining_minutes)
            );
        }
        if let Some(pct) = view.limit_usage {
            let _ = writeln!(out, "   limit: {:.1}% used", pct);
        }
    }

    pub fn daily_table(&self, days: &[DailyUsage]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", "=".repeat(80).bright_cyan());
        let _ = writeln!(out, "{}", "Usage Report - Daily".bright_white().bold());
        let _ = writeln!(out, "{}", "=".repeat(80).bright_cyan());

        if days.is_empty() {
            let _ = writeln!(out, "\nNo usage data found.");
            return out;
        }

        let _ = writeln!(
            out,
            "\n{:<12} {:>12} {:>12} {:>14} {:>10}  {}",
            "Date", "Input", "Output", "Total", "Cost", "Models"
        );
        let _ = writeln!(out, "{}", "-".repeat(80));
        for day in days {
            let _ = writeln!(
                out,
                "{:<12} {:>12} {:>12} {:>14} {:>10}  {}",
                day.date.to_string().bright_white().bold(),
                format_number(day.token_counts.input_tokens),
                format_number(day.token_counts.output_tokens),
                format_number(day.total_tokens),
                format!("${:.2}", day.cost_usd).bright_green(),
                day.models_used.join(", ").bright_cyan()
            );
        }

        let total_cost: f64 = days.iter().map(|d| d.cost_usd).sum();
        let total_tokens: u64 = days.iter().map(|d| d.total_tokens).sum();
        let _ = writeln!(out, "{}", "-".repeat(80));
        let _ = writeln!(
            out,
            "{} days • {} tokens • {} total",
            days.len().to_string().bright_white().bold(),
            format_number(total_tokens).bright_white().bold(),
            format!("${:.2}", total_cost).bright_green().bold()
        );
        out
    }

    pub fn live_text(&self, snapshot: &LiveSnapshot<'_>) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {}",
            "Usage Live".bright_white().bold(),
            format!("({})", self.timezone.format(snapshot.generated_at, "%H:%M:%S")).dimmed()
        );

        let Some(view) = &snapshot.active_block else {
            let _ = writeln!(out, "No active session block.");
            return out;
        };

        let block = view.block;
        let _ = writeln!(
            out,
            "Block {} → {} • {} tokens • ${:.2}",
            self.time(block.start_time),
            self.timezone.format(block.end_time, "%H:%M"),
            format_number(view.total_tokens).bright_white().bold(),
            block.cost_usd
        );
        if let (Some(limit), Some(pct)) = (snapshot.token_limit, view.limit_usage) {
            let _ = writeln!(
                out,
                "{} {:.1}% of {}",
                progress_bar(pct, 40),
                pct,
                format_number(limit)
            );
        }
        self.write_active_details(&mut out, view);
        out
    }
}

fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent / 100.0) * width as f64).round().clamp(0.0, width as f64) as usize;
    let bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled));
    if percent >= 90.0 {
        bar.bright_red().to_string()
    } else if percent >= 70.0 {
        bar.bright_yellow().to_string()
    } else {
        bar.bright_green().to_string()
    }
}

/// `1234567` → `1,234,567`
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_minutes(minutes: u64) -> String {
    if minutes >= 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{}m", minutes)
    }
}
