use std::env;
use std::path::PathBuf;

use crate::error::{EtlError, Result};
use crate::scd2::Scd2Policy;

pub const ENV_DATA_DIR: &str = "DONOR_ETL_DATA_DIR";
pub const ENV_DATABASE: &str = "DONOR_ETL_DATABASE";
pub const ENV_LOG_DIR: &str = "DONOR_ETL_LOG_DIR";
pub const ENV_PROCESS_ALL: &str = "DONOR_ETL_PROCESS_ALL";
pub const ENV_SCD2_POLICY: &str = "DONOR_ETL_SCD2_POLICY";

/// Settings for one ETL run
#[derive(Debug, Clone, PartialEq)]
pub struct EtlConfig {
    /// Directory scanned for `*.json` input files
    pub data_dir: PathBuf,

    /// SQLite warehouse file
    pub database_path: PathBuf,

    /// Where per-run log files go; None = console only
    pub log_dir: Option<PathBuf>,

    /// Reload files already recorded as completed
    pub process_all: bool,

    pub scd2_policy: Scd2Policy,
}

impl Default for EtlConfig {
    fn default() -> Self {
        EtlConfig {
            data_dir: PathBuf::from("data"),
            database_path: PathBuf::from("warehouse.db"),
            log_dir: Some(PathBuf::from("logs")),
            process_all: false,
            scd2_policy: Scd2Policy::AlwaysVersion,
        }
    }
}

impl EtlConfig {
    /// Defaults overridden by `DONOR_ETL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EtlConfig::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            // Empty value turns file logging off
            config.log_dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(flag) = lookup(ENV_PROCESS_ALL) {
            config.process_all = parse_bool(&flag).ok_or_else(|| {
                EtlError::Config(format!("{} must be true/false, got '{}'", ENV_PROCESS_ALL, flag))
            })?;
        }
        if let Some(policy) = lookup(ENV_SCD2_POLICY) {
            config.scd2_policy = policy.parse()?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
