use std::path::PathBuf;

use thiserror::Error;

use crate::calendar::LocalCalendar;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const WAL_FILE_NAME: &str = "pista.wal";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("UTC offset of {0} minutes is out of range")]
    OffsetOutOfRange(i32),
}

/// Runtime settings, read from `PISTA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub utc_offset_minutes: i32,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            utc_offset_minutes: 0,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value })
    })
    .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            data_dir: lookup("PISTA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            utc_offset_minutes: parse("PISTA_UTC_OFFSET_MINUTES", lookup("PISTA_UTC_OFFSET_MINUTES"))?
                .unwrap_or(defaults.utc_offset_minutes),
            compact_threshold: parse("PISTA_COMPACT_THRESHOLD", lookup("PISTA_COMPACT_THRESHOLD"))?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse("PISTA_METRICS_PORT", lookup("PISTA_METRICS_PORT"))?,
        };
        config.calendar()?;
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn calendar(&self) -> Result<LocalCalendar, ConfigError> {
        LocalCalendar::with_offset_minutes(self.utc_offset_minutes)
            .ok_or(ConfigError::OffsetOutOfRange(self.utc_offset_minutes))
    }
}
