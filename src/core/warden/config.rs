// src/core/warden/config.rs

//! Bootstrap configuration for a Warden process, loaded once at startup from
//! a TOML file. This is distinct from the line-oriented, continuously
//! rewritten topology snapshot in `persistence.rs` — this file only seeds
//! the initial set of monitored masters and process-wide settings.

use super::errors::WardenError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub announce_ip: Option<String>,

    /// Where the durable topology/epoch/vote snapshot is rewritten. Defaults
    /// next to the bootstrap file.
    #[serde(default = "default_config_file_path")]
    pub config_file_path: String,

    pub masters: Vec<MonitoredMaster>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoredMaster {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub quorum: usize,

    #[serde(with = "humantime_serde")]
    pub down_after: Duration,

    #[serde(with = "humantime_serde")]
    pub failover_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_hello_interval")]
    pub hello_interval: Duration,

    #[serde(default = "default_parallel_syncs")]
    pub parallel_syncs: usize,

    pub auth_pass: Option<String>,
    pub notification_script: Option<String>,
    pub client_reconfig_script: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    26379
}

fn default_hello_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_parallel_syncs() -> usize {
    1
}

fn default_config_file_path() -> String {
    "warden.state".to_string()
}

impl WardenConfig {
    pub async fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read warden config file '{path}'"))?;
        let config: WardenConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse warden config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for m in &self.masters {
            m.validate()?;
        }
        Ok(())
    }
}

impl MonitoredMaster {
    fn validate(&self) -> Result<()> {
        // parallel_syncs = 0 is illegal per the design's Open Question resolution.
        if self.parallel_syncs == 0 {
            return Err(WardenError::InvalidConfig(format!(
                "master '{}': parallel-syncs must be >= 1",
                self.name
            ))
            .into());
        }
        if self.quorum == 0 {
            return Err(WardenError::InvalidConfig(format!(
                "master '{}': quorum must be >= 1",
                self.name
            ))
            .into());
        }
        Ok(())
    }
}
