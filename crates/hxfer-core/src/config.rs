use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::outcome::TracingSink;
use crate::scheduler::{default_workers, PoolOptions, MAX_WORKERS};

pub const DEFAULT_LOG_TAG: &str = "HttpLog";

/// Outcome log settings (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeLogConfig {
    /// Emit one log event per finished exchange.
    pub enabled: bool,
    /// Tag attached to every outcome event.
    pub tag: String,
}

impl Default for OutcomeLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tag: DEFAULT_LOG_TAG.to_string(),
        }
    }
}

/// Global configuration loaded from `~/.config/hxfer/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XferConfig {
    /// Worker threads per scheduler. Clamped to `1..=MAX_WORKERS`.
    pub max_workers: usize,
    /// Seconds an idle worker waits for work before exiting.
    pub idle_keep_alive_secs: u64,
    /// Optional outcome log settings; if missing, logging is on with the default tag.
    #[serde(default)]
    pub outcome_log: Option<OutcomeLogConfig>,
}

impl Default for XferConfig {
    fn default() -> Self {
        Self {
            max_workers: default_workers(),
            idle_keep_alive_secs: 1,
            outcome_log: None,
        }
    }
}

impl XferConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_workers: self.max_workers.clamp(1, MAX_WORKERS),
            keep_alive: Duration::from_secs(self.idle_keep_alive_secs),
        }
    }

    pub fn outcome_sink(&self) -> TracingSink {
        let log = self.outcome_log.clone().unwrap_or_default();
        TracingSink::new(log.enabled, log.tag)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hxfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<XferConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = XferConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read {}", path.display()))?;
    let cfg: XferConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
