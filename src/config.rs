use std::path::PathBuf;

use chrono_tz::Tz;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
const WAL_FILE_NAME: &str = "appointments.wal";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("KATU_TIMEZONE: unknown IANA timezone {0:?}")]
    Timezone(String),
    #[error("{var}: expected a number, got {value:?}")]
    Number { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Reference timezone for calendar-day listings.
    pub timezone: Tz,
    /// WAL appends tolerated before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            timezone: Tz::UTC,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or blank variables fall back to
    /// their defaults; malformed values are errors rather than silent defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(dir) = get("KATU_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = get("KATU_TIMEZONE") {
            config.timezone = name
                .trim()
                .parse()
                .map_err(|_| ConfigError::Timezone(name.clone()))?;
        }
        if let Some(value) = get("KATU_COMPACT_THRESHOLD") {
            config.compact_threshold = value.trim().parse().map_err(|_| ConfigError::Number {
                var: "KATU_COMPACT_THRESHOLD",
                value: value.clone(),
            })?;
        }
        if let Some(value) = get("KATU_METRICS_PORT") {
            let port = value.trim().parse().map_err(|_| ConfigError::Number {
                var: "KATU_METRICS_PORT",
                value: value.clone(),
            })?;
            config.metrics_port = Some(port);
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
