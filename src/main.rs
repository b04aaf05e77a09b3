use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::Instrument;
use usage_blocks::analyzer::{AnalyzerOptions, UsageAnalyzer};
use usage_blocks::blocks::{DateRange, MAX_SESSION_DURATION_HOURS};
use usage_blocks::config::{get_config, Config};
use usage_blocks::logging::{init_logging, run_span};
use usage_blocks::monitor::{LiveMonitor, MonitorOptions};
use usage_blocks::pipeline::CancelFlag;
use usage_blocks::pricing::CostMode;
use usage_blocks::reports::{BlockView, ReportRenderer, TokenLimit};
use usage_blocks::timezone::{parse_date, DisplayTimezone};

#[derive(Parser)]
#[command(name = "usage-blocks")]
#[command(about = "Session blocks, burn rate and projections from Claude Code usage logs")]
#[command(version)]
struct Cli {
    /// Data root containing a `projects/` directory (repeatable)
    #[arg(long = "data-dir", global = true)]
    data_dirs: Vec<PathBuf>,

    /// Display timezone: local, utc or an offset such as +09:00
    #[arg(long, global = true)]
    timezone: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct RangeArgs {
    /// Start date filter (YYYYMMDD or YYYY-MM-DD)
    #[arg(long)]
    since: Option<String>,
    /// End date filter (YYYYMMDD or YYYY-MM-DD)
    #[arg(long)]
    until: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show usage grouped into session blocks
    Blocks {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Only show the active block
        #[arg(long)]
        active: bool,
        /// Only show blocks from the last few days (plus the active one)
        #[arg(long)]
        recent: bool,
        #[command(flatten)]
        range: RangeArgs,
        /// Block length in hours
        #[arg(long = "session-length")]
        session_length: Option<i64>,
        /// Ingestion worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Token budget per block: a number or `max`
        #[arg(long = "token-limit")]
        token_limit: Option<String>,
        /// How event costs are settled
        #[arg(long, value_enum, default_value_t = CostMode::Auto)]
        mode: CostMode,
    },
    /// Show daily usage totals
    Daily {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        range: RangeArgs,
        /// Ingestion worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// How event costs are settled
        #[arg(long, value_enum, default_value_t = CostMode::Auto)]
        mode: CostMode,
    },
    /// Show live monitoring of the active block
    Live {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Show a single frame instead of the monitoring loop
        #[arg(long)]
        snapshot: bool,
        /// Seconds between reloads
        #[arg(long = "refresh-secs")]
        refresh_secs: Option<u64>,
        /// Ingestion worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Token budget per block: a number or `max`
        #[arg(long = "token-limit")]
        token_limit: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Blocks { .. } => "blocks",
            Commands::Daily { .. } => "daily",
            Commands::Live { .. } => "live",
        }
    }

    fn json(&self) -> bool {
        match self {
            Commands::Blocks { json, .. } | Commands::Daily { json, .. } | Commands::Live { json, .. } => *json,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Daily {
        json: false,
        range: RangeArgs::default(),
        workers: None,
        mode: CostMode::Auto,
    });
    let json = command.json();

    let config = match get_config() {
        Ok(config) => config.clone(),
        Err(e) => handle_error(e, json),
    };
    let log_guard = init_logging(&config);
    let span = run_span(command.name());

    let result = run(command, &cli.data_dirs, cli.timezone.as_deref(), config)
        .instrument(span)
        .await;

    if let Err(e) = result {
        // process::exit skips destructors; flush file logs first
        drop(log_guard);
        handle_error(e, json);
    }
}

async fn run(command: Commands, data_dirs: &[PathBuf], timezone: Option<&str>, config: Config) -> Result<()> {
    let timezone: DisplayTimezone = timezone
        .unwrap_or(&config.output.timezone)
        .parse()?;
    let renderer = ReportRenderer::new(timezone, config.output.json_pretty);

    match command {
        Commands::Blocks {
            json,
            active,
            recent,
            range,
            session_length,
            workers,
            token_limit,
            mode,
        } => {
            let mut options = base_options(&config, data_dirs, timezone, workers);
            options.cost_mode = mode;
            if let Some(hours) = session_length {
                anyhow::ensure!(
                    (1..=MAX_SESSION_DURATION_HOURS).contains(&hours),
                    "Session length must be between 1 and {MAX_SESSION_DURATION_HOURS} hours, got {hours}"
                );
                options.session_duration = Duration::hours(hours);
            }
            let token_limit = token_limit.as_deref().map(str::parse::<TokenLimit>).transpose()?;
            let range = parse_range(&range)?;

            let analyzer = UsageAnalyzer::new(options);
            let cancel = CancelFlag::new();
            let now = Utc::now();
            let span = tracing::Span::current();
            let blocks = tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                if recent {
                    analyzer.recent_blocks(config.blocks.recent_days, now, &cancel)
                } else {
                    analyzer.session_blocks(&range, &cancel)
                }
            })
            .await
            .context("Block computation failed")??;

            let limit = token_limit.and_then(|l| l.resolve(&blocks, now));
            let views: Vec<BlockView<'_>> = blocks
                .iter()
                .filter(|b| !active || b.is_active_at(now))
                .map(|b| BlockView::new(b, now, limit))
                .collect();

            if json {
                println!("{}", renderer.blocks_json(&views)?);
            } else {
                print!("{}", renderer.blocks_table(&views));
            }
        }
        Commands::Daily {
            json,
            range,
            workers,
            mode,
        } => {
            let mut options = base_options(&config, data_dirs, timezone, workers);
            options.cost_mode = mode;
            let range = parse_range(&range)?;

            let analyzer = UsageAnalyzer::new(options);
            let span = tracing::Span::current();
            let days = tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                analyzer.daily(&range, &CancelFlag::new())
            })
            .await
            .context("Daily aggregation failed")??;

            if json {
                println!("{}", renderer.daily_json(&days)?);
            } else {
                print!("{}", renderer.daily_table(&days));
            }
        }
        Commands::Live {
            json,
            snapshot,
            refresh_secs,
            workers,
            token_limit,
        } => {
            if json && !snapshot {
                anyhow::bail!("Live monitoring does not support --json output without --snapshot");
            }

            let mut options = AnalyzerOptions::live_from_config(&config);
            options.timezone = timezone;
            if !data_dirs.is_empty() {
                options.roots = data_dirs.to_vec();
            }
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let token_limit = token_limit.as_deref().map(str::parse::<TokenLimit>).transpose()?;
            let refresh = refresh_secs.unwrap_or(config.live.refresh_secs).max(1);

            let mut monitor = LiveMonitor::new(
                UsageAnalyzer::new(options),
                renderer,
                MonitorOptions {
                    refresh: std::time::Duration::from_secs(refresh),
                    token_limit,
                    json_output: json,
                },
            );

            if snapshot {
                monitor.snapshot().await?;
            } else {
                monitor.run().await?;
            }
        }
    }

    Ok(())
}

fn base_options(
    config: &Config,
    data_dirs: &[PathBuf],
    timezone: DisplayTimezone,
    workers: Option<usize>,
) -> AnalyzerOptions {
    let mut options = AnalyzerOptions::from_config(config);
    options.timezone = timezone;
    if !data_dirs.is_empty() {
        options.roots = data_dirs.to_vec();
    }
    if let Some(workers) = workers {
        options.workers = workers;
    }
    options
}

fn parse_range(args: &RangeArgs) -> Result<DateRange> {
    let since = args.since.as_deref().map(parse_date).transpose()?;
    let until = args.until.as_deref().map(parse_date).transpose()?;
    if let (Some(since), Some(until)) = (since, until) {
        anyhow::ensure!(since <= until, "--since {since} is after --until {until}");
    }
    Ok(DateRange::new(since, until))
}

fn handle_error(e: anyhow::Error, json: bool) -> ! {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
    } else {
        eprintln!("Error: {e:#}");
    }
    process::exit(1);
}
