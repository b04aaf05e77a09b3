//! Configuration for scanning, segmentation and the live dashboard
//!
//! Resolution order: built-in defaults, then the first TOML file found
//! (`usage-blocks.toml`, `.usage-blocks.toml`, the user config dir), then
//! environment overrides (`LOG_*`, `USAGE_BLOCKS_*`, `CLAUDE_HOME`,
//! `CLAUDE_CONFIG_DIR`). The result is validated once.
//!
//! Engine components never read the global directly; they take the relevant
//! section (or options derived from it) as an argument.

use crate::blocks::{DEFAULT_SESSION_DURATION_HOURS, MAX_SESSION_DURATION_HOURS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Ingestion configuration
    pub processing: ProcessingConfig,

    /// Session block configuration
    pub blocks: BlocksConfig,

    /// Live dashboard configuration
    pub live: LiveConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Paths configuration
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Worker threads for bulk report commands
    pub workers: usize,
    /// Worker threads for the live dashboard
    pub live_workers: usize,
    /// Longest accepted JSONL line
    pub max_line_kb: usize,
    pub buffer_size_kb: usize,
    /// Lines sampled per file when ordering files by earliest timestamp
    pub sample_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksConfig {
    pub duration_hours: i64,
    pub recent_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub refresh_secs: u64,
    pub modified_within_hours: i64,
    pub max_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `local`, `utc` or a fixed offset such as `+09:00`
    pub timezone: String,
    pub json_pretty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub claude_home: PathBuf,
    pub extra_roots: Vec<PathBuf>,
    pub log_directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            live_workers: 1,
            max_line_kb: 10 * 1024,
            buffer_size_kb: 64,
            sample_lines: 100,
        }
    }
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            duration_hours: DEFAULT_SESSION_DURATION_HOURS,
            recent_days: 3,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 5,
            modified_within_hours: 6,
            max_files: 64,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            timezone: "local".to_string(),
            json_pretty: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            claude_home: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude"),
            extra_roots: Vec::new(),
            log_directory: PathBuf::from("logs"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            processing: ProcessingConfig::default(),
            blocks: BlocksConfig::default(),
            live: LiveConfig::default(),
            output: OutputConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment, file, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("usage-blocks.toml"),
            PathBuf::from(".usage-blocks.toml"),
            dirs::config_dir()
                .map(|d| d.join("usage-blocks").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("USAGE_BLOCKS_WORKERS") {
            self.processing.workers = val.parse().context("Invalid USAGE_BLOCKS_WORKERS")?;
        }
        if let Ok(val) = env::var("USAGE_BLOCKS_LIVE_WORKERS") {
            self.processing.live_workers =
                val.parse().context("Invalid USAGE_BLOCKS_LIVE_WORKERS")?;
        }
        if let Ok(val) = env::var("USAGE_BLOCKS_MAX_LINE_KB") {
            self.processing.max_line_kb =
                val.parse().context("Invalid USAGE_BLOCKS_MAX_LINE_KB")?;
        }
        if let Ok(val) = env::var("USAGE_BLOCKS_SESSION_HOURS") {
            self.blocks.duration_hours =
                val.parse().context("Invalid USAGE_BLOCKS_SESSION_HOURS")?;
        }

        if let Ok(val) = env::var("CLAUDE_HOME") {
            self.paths.claude_home = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CLAUDE_CONFIG_DIR") {
            let roots: Vec<PathBuf> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if let Some((first, rest)) = roots.split_first() {
                self.paths.claude_home = first.clone();
                self.paths.extra_roots = rest.to_vec();
            }
        }
        if let Ok(val) = env::var("USAGE_BLOCKS_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.processing.workers == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }

        if self.processing.live_workers == 0 {
            return Err(anyhow::anyhow!("Live worker count must be greater than 0"));
        }

        if self.processing.max_line_kb == 0 {
            return Err(anyhow::anyhow!("Maximum line size must be greater than 0"));
        }

        if self.processing.buffer_size_kb < 1 || self.processing.buffer_size_kb > 16 * 1024 {
            return Err(anyhow::anyhow!(
                "Buffer size must be between 1KB and 16MB, got {}KB",
                self.processing.buffer_size_kb
            ));
        }

        if !(1..=MAX_SESSION_DURATION_HOURS).contains(&self.blocks.duration_hours) {
            return Err(anyhow::anyhow!(
                "Session block duration must be between 1 and {}h, got {}h",
                MAX_SESSION_DURATION_HOURS,
                self.blocks.duration_hours
            ));
        }

        if self.live.refresh_secs == 0 {
            return Err(anyhow::anyhow!("Live refresh interval must be at least 1 second"));
        }

        if self.live.max_files == 0 {
            return Err(anyhow::anyhow!("Live file cap must be at least 1"));
        }

        if !(1..=MAX_FRESHNESS_HOURS).contains(&self.live.modified_within_hours) {
            return Err(anyhow::anyhow!(
                "Live freshness window must be between 1 and {}h, got {}h",
                MAX_FRESHNESS_HOURS,
                self.live.modified_within_hours
            ));
        }

        if self.live.modified_within_hours < self.blocks.duration_hours {
            warn!(
                modified_within_hours = self.live.modified_within_hours,
                duration_hours = self.blocks.duration_hours,
                "Live freshness window is shorter than a block; the active block may be truncated"
            );
        }

        // Only file logging needs the directory
        if self.logging.output != "console" && !self.paths.log_directory.exists() {
            fs::create_dir_all(&self.paths.log_directory)
                .context("Failed to create log directory")?;
        }

        Ok(())
    }

    /// Data roots to scan when none are given on the command line
    pub fn data_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.paths.claude_home.clone()];
        roots.extend(self.paths.extra_roots.iter().cloned());

        // VM instances live under <claude_home>/vms/<vm>/projects
        let vms_dir = self.paths.claude_home.join("vms");
        if let Ok(entries) = fs::read_dir(&vms_dir) {
            let mut vm_roots: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.join("projects").is_dir())
                .collect();
            vm_roots.sort();
            roots.extend(vm_roots);
        }

        roots
    }

    /// Save current configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}

/// Upper bound on the live freshness window
const MAX_FRESHNESS_HOURS: i64 = 24 * 365;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration instance, loading it on first use.
///
/// An unreadable config file, a malformed environment override or a value
/// that fails validation is an error; nothing falls back to defaults.
pub fn get_config() -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    let config = Config::load()?;
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.processing.workers, 8);
        assert_eq!(config.processing.live_workers, 1);
        assert_eq!(config.blocks.duration_hours, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.processing.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.blocks.duration_hours = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.buffer_size_kb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = Config::default();
        config.live.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.blocks.duration_hours = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.blocks.duration_hours = MAX_SESSION_DURATION_HOURS;
        config.live.modified_within_hours = MAX_SESSION_DURATION_HOURS + 1;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.live.modified_within_hours = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [blocks]
            duration_hours = 3
            recent_days = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.blocks.duration_hours, 3);
        assert_eq!(config.processing.workers, 8);
        assert_eq!(config.live.refresh_secs, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.live.max_files = 12;
        config.save_to_file(&path).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.live.max_files, 12);
    }

    #[test]
    fn test_data_roots_include_vms() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vms").join("vm1").join("projects")).unwrap();
        fs::create_dir_all(dir.path().join("vms").join("not-a-vm")).unwrap();

        let mut config = Config::default();
        config.paths.claude_home = dir.path().to_path_buf();

        let roots = config.data_roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[1], dir.path().join("vms").join("vm1"));
    }
}
