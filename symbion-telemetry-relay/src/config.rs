//! Configuration management
//!
//! Handles:
//! - Sensor source location and provider process name
//! - Sink overrides (explicit address / subnet), port and signature
//! - Discovery timeouts, concurrency and freshness window
//! - Fallback usage values
//!
//! Stored as TOML in the OS config directory; every field has a default so
//! partial files are accepted. `SYMBION_SINK_ADDRESS` and
//! `SYMBION_SINK_SUBNET` override the file.

use crate::discovery::subnets::SubnetPrefix;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const APP_DIR: &str = "symbion-relay";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub sensors: SensorsConfig,
    pub sink: SinkConfig,
    pub discovery: DiscoveryConfig,
    pub poll: PollConfig,
    pub defaults: UsageDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub url: String,
    pub provider_process: String,
    pub timeout_secs: u64,
    /// Query `nvidia-smi` when the tree has no GPU load
    pub vendor_gpu_utility: bool,
    /// Sample CPU/RAM usage from the OS when the tree has none
    pub host_usage_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub address: Option<Ipv4Addr>,
    pub subnet: Option<SubnetPrefix>,
    pub port: u16,
    pub signature: String,
    pub update_path: String,
    pub delivery_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub connect_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub liveness_timeout_ms: u64,
    pub max_in_flight: usize,
    pub freshness_secs: u64,
    pub priority_subnets: Vec<SubnetPrefix>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
}

/// Usage values reported when nothing better is available
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageDefaults {
    pub cpu_usage: f64,
    pub ram_usage: f64,
    /// Non-zero so the display never shows a false idle GPU
    pub gpu_usage: f64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8085/data.json".to_string(),
            provider_process: "OpenHardwareMonitor".to_string(),
            timeout_secs: 5,
            vendor_gpu_utility: true,
            host_usage_fallback: true,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            subnet: None,
            port: 80,
            signature: "System Monitor".to_string(),
            update_path: "/update".to_string(),
            delivery_timeout_secs: 5,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 100,
            probe_timeout_ms: 500,
            liveness_timeout_ms: 1000,
            max_in_flight: 50,
            freshness_secs: 300,
            priority_subnets: [
                [192, 168, 137],
                [192, 168, 0],
                [192, 168, 1],
                [172, 20, 10],
                [10, 0, 0],
                [10, 0, 1],
            ]
            .into_iter()
            .map(SubnetPrefix::new)
            .collect(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 3 }
    }
}

impl Default for UsageDefaults {
    fn default() -> Self {
        Self {
            cpu_usage: 10.0,
            ram_usage: 20.0,
            gpu_usage: 25.0,
        }
    }
}

impl SensorsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SinkConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl DiscoveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_secs as i64)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl RelayConfig {
    /// Load config from OS-specific location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(
            std::env::var("SYMBION_SINK_ADDRESS").ok(),
            std::env::var("SYMBION_SINK_SUBNET").ok(),
        );
        Ok(config)
    }

    /// Save config to OS-specific location
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Operator overrides; unparseable values are reported and ignored
    pub fn apply_overrides(&mut self, address: Option<String>, subnet: Option<String>) {
        if let Some(raw) = address.filter(|s| !s.trim().is_empty()) {
            match raw.trim().parse::<Ipv4Addr>() {
                Ok(ip) => self.sink.address = Some(ip),
                Err(e) => warn!("Ignoring sink address override '{}': {}", raw, e),
            }
        }

        if let Some(raw) = subnet.filter(|s| !s.trim().is_empty()) {
            match raw.trim().parse::<SubnetPrefix>() {
                Ok(prefix) => self.sink.subnet = Some(prefix),
                Err(e) => warn!("Ignoring subnet override: {}", e),
            }
        }
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push(APP_DIR);
        path.push("config.toml");
        Ok(path)
    }

    /// Durable discovery state location
    pub fn discovery_cache_path() -> Result<PathBuf> {
        let mut path = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;

        path.push(APP_DIR);
        path.push("discovery.toml");
        Ok(path)
    }

    /// Check if this is first-time setup
    pub fn is_first_time_setup() -> bool {
        Self::config_file_path()
            .map(|p| !p.exists())
            .unwrap_or(true)
    }
}
