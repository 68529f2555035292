//! Runtime configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (YAOXIANG_FIBER_*)
//! 3. Config file (--path, or ~/.config/yaoxiang-fiber/config.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use yaoxiang_fiber::util::config::RuntimeConfig;
//!
//! let config: RuntimeConfig = toml::from_str("[scheduler]\nnum_workers = 2\n").unwrap();
//! assert_eq!(config.scheduler.num_workers, Some(2));
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::clock::SystemClock;
use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::LogLevel;

pub const ENV_WORKERS: &str = "YAOXIANG_FIBER_WORKERS";
pub const ENV_OPS_PER_TURN: &str = "YAOXIANG_FIBER_OPS_PER_TURN";
pub const ENV_LOG: &str = "YAOXIANG_FIBER_LOG";

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[scheduler]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSection {
    /// Worker threads; the available parallelism when absent.
    #[serde(default)]
    pub num_workers: Option<usize>,
    /// Primitive operations per fiber turn
    #[serde(default = "default_ops_per_turn")]
    pub ops_per_turn: usize,
    /// Work stealing batch size
    #[serde(default = "default_steal_batch")]
    pub steal_batch: usize,
    /// Whether idle workers steal
    #[serde(default = "default_use_work_stealing")]
    pub use_work_stealing: bool,
    /// Idle park timeout in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Grace period for fibers interrupted at shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_ops_per_turn() -> usize {
    2048
}

fn default_steal_batch() -> usize {
    4
}

fn default_use_work_stealing() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    1
}

fn default_shutdown_timeout_ms() -> u64 {
    1000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            num_workers: None,
            ops_per_turn: default_ops_per_turn(),
            steal_batch: default_steal_batch(),
            use_work_stealing: default_use_work_stealing(),
            idle_timeout_ms: default_idle_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override settings from an environment lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.scheduler.num_workers = Some(parse_env(ENV_WORKERS, &value)?);
        }
        if let Some(value) = lookup(ENV_OPS_PER_TURN) {
            self.scheduler.ops_per_turn = parse_env(ENV_OPS_PER_TURN, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.logging.level = parse_env(ENV_LOG, &value)?;
        }
        Ok(())
    }

    /// The scheduler configuration these settings describe.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            num_workers: self.scheduler.num_workers.unwrap_or(defaults.num_workers),
            ops_per_turn: self.scheduler.ops_per_turn,
            steal_batch: self.scheduler.steal_batch,
            use_work_stealing: self.scheduler.use_work_stealing,
            idle_timeout: Duration::from_millis(self.scheduler.idle_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.scheduler.shutdown_timeout_ms),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    var: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        })
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("yaoxiang-fiber"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(
            PathBuf::from(home)
                .join(".config")
                .join("yaoxiang-fiber"),
        );
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("yaoxiang-fiber"));
    }

    None
}

/// Get the user config file path (~/.config/yaoxiang-fiber/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load a config file. Without an explicit path the user config is used;
/// a missing user config yields the defaults, a missing explicit file is an
/// error.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match get_config_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(RuntimeConfig::default()),
        },
    };

    let content = fs::read_to_string(&path)?;
    RuntimeConfig::from_toml_str(&content)
}

/// Load a config file and apply environment overrides.
pub fn load_effective_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = load_config(path)?;
    config.apply_env()?;
    Ok(config)
}

/// Save a config file, creating its directory.
pub fn save_config(
    config: &RuntimeConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
