//! Configuration for the stats service
//!
//! Defaults live in `constants`; a `config.toml` can override them, and CLI
//! flags or environment variables (merged by the caller) override the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub chain: ChainSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tuning: TuningSection,
}

/// Chain connection section
#[derive(Debug, Default, Deserialize)]
pub struct ChainSection {
    pub url: Option<String>,
}

/// Read surface section
#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub port: Option<u16>,
}

/// Optional overrides for the refresh timing defaults
#[derive(Debug, Default, Deserialize)]
pub struct TuningSection {
    pub refresh_interval_secs: Option<u64>,
    pub staleness_threshold_secs: Option<u64>,
    pub watchdog_poll_secs: Option<u64>,
    pub bp_reward_deadline_secs: Option<u64>,
    pub store_op_deadline_secs: Option<u64>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content).with_context(|| "Failed to parse config.toml")
    }

    /// Load the config file if it exists, otherwise use defaults
    pub fn load_if_present(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Resolved runtime configuration
#[derive(Debug)]
pub struct Config {
    /// Chain API base URL
    pub chain_url: String,
    /// HTTP listen port for the read surface
    pub port: u16,
    /// Directory holding the snapshot history database
    pub data_dir: PathBuf,
    /// Interval between refresh cycles
    pub refresh_interval: Duration,
    /// Watchdog gives up when the last refresh is older than this
    pub staleness_threshold: Duration,
    /// Interval between watchdog checks
    pub watchdog_poll: Duration,
    /// Hard deadline for the block-producer reward fetch
    pub bp_reward_deadline: Duration,
    /// Deadline for each snapshot store operation
    pub store_op_deadline: Duration,
}

impl Config {
    /// Resolve the runtime configuration from the file config plus any
    /// overrides the caller collected from flags or the environment
    pub fn resolve(
        file: FileConfig,
        url_override: Option<String>,
        port_override: Option<u16>,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let chain_url = url_override
            .or(file.chain.url)
            .context("no chain url specified, use --url, the URL env var, or config.toml")?;

        let port = port_override
            .or(file.server.port)
            .unwrap_or(constants::DEFAULT_PORT);

        let t = file.tuning;
        Ok(Self {
            chain_url,
            port,
            data_dir,
            refresh_interval: Duration::from_secs(
                t.refresh_interval_secs
                    .unwrap_or(constants::REFRESH_INTERVAL_SECS),
            ),
            staleness_threshold: Duration::from_secs(
                t.staleness_threshold_secs
                    .unwrap_or(constants::STALENESS_THRESHOLD_SECS),
            ),
            watchdog_poll: Duration::from_secs(
                t.watchdog_poll_secs.unwrap_or(constants::WATCHDOG_POLL_SECS),
            ),
            bp_reward_deadline: Duration::from_secs(
                t.bp_reward_deadline_secs
                    .unwrap_or(constants::BP_REWARD_DEADLINE_SECS),
            ),
            store_op_deadline: Duration::from_secs(
                t.store_op_deadline_secs
                    .unwrap_or(constants::STORE_OP_DEADLINE_SECS),
            ),
        })
    }
}
