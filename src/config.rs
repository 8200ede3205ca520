//! Configuration.
//!
//! Settings load from an optional TOML file, then individual
//! `TSWEEP_`-prefixed environment variables override on top. A `.env`
//! file is honored through dotenvy before any of this runs (see main).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enrich::DEFAULT_PLIEGO_RATIO;
use crate::fetch::FetchOptions;
use crate::scheduler::SchedulerConfig;
use crate::vigencia::DEFAULT_ARCHIVE_AFTER_DAYS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Global concurrent source-run ceiling.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Heavy-source ceiling (gazette crawls, rendered pages).
    #[serde(default = "default_max_heavy")]
    pub max_heavy: usize,

    /// Per-run wall-clock budget, seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Light-request timeout, seconds.
    #[serde(default = "default_light_timeout_secs")]
    pub light_timeout_secs: u64,

    /// Heavy-request timeout, seconds.
    #[serde(default = "default_heavy_timeout_secs")]
    pub heavy_timeout_secs: u64,

    /// Minimum gap between requests to one domain, milliseconds.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    /// Fixed User-Agent; unset rotates through the browser pool, the
    /// literal "plain" identifies as the tool itself.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Remote rendering endpoint for browser-driven sources.
    #[serde(default)]
    pub render_endpoint: Option<String>,

    /// Budget estimation ratio used when a source has no calibrated one.
    #[serde(default = "default_pliego_ratio")]
    pub default_pliego_ratio: f64,

    /// Days after publication before records are archived.
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tendersweep")
        .join("tendersweep.db")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_heavy() -> usize {
    1
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_light_timeout_secs() -> u64 {
    30
}

fn default_heavy_timeout_secs() -> u64 {
    180
}

fn default_politeness_delay_ms() -> u64 {
    500
}

fn default_pliego_ratio() -> f64 {
    DEFAULT_PLIEGO_RATIO
}

fn default_archive_after_days() -> i64 {
    DEFAULT_ARCHIVE_AFTER_DAYS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_concurrent: default_max_concurrent(),
            max_heavy: default_max_heavy(),
            run_timeout_secs: default_run_timeout_secs(),
            light_timeout_secs: default_light_timeout_secs(),
            heavy_timeout_secs: default_heavy_timeout_secs(),
            politeness_delay_ms: default_politeness_delay_ms(),
            user_agent: None,
            render_endpoint: None,
            default_pliego_ratio: default_pliego_ratio(),
            archive_after_days: default_archive_after_days(),
        }
    }
}

impl Settings {
    /// Load from a TOML file if one exists, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("TSWEEP_DB_PATH") {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = env_parse("TSWEEP_MAX_CONCURRENT") {
            self.max_concurrent = value;
        }
        if let Some(value) = env_parse("TSWEEP_MAX_HEAVY") {
            self.max_heavy = value;
        }
        if let Some(value) = env_parse("TSWEEP_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = value;
        }
        if let Some(value) = env_parse("TSWEEP_POLITENESS_DELAY_MS") {
            self.politeness_delay_ms = value;
        }
        if let Ok(value) = std::env::var("TSWEEP_USER_AGENT") {
            self.user_agent = Some(value);
        }
        if let Ok(value) = std::env::var("TSWEEP_RENDER_ENDPOINT") {
            self.render_endpoint = Some(value);
        }
        if let Some(value) = env_parse("TSWEEP_PLIEGO_RATIO") {
            self.default_pliego_ratio = value;
        }
        if let Some(value) = env_parse("TSWEEP_ARCHIVE_AFTER_DAYS") {
            self.archive_after_days = value;
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            light_timeout: Duration::from_secs(self.light_timeout_secs),
            heavy_timeout: Duration::from_secs(self.heavy_timeout_secs),
            politeness_delay: Duration::from_millis(self.politeness_delay_ms),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
            max_heavy: self.max_heavy,
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            ..SchedulerConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
