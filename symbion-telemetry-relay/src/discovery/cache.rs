//! Durable last-known-good sink location
//!
//! Reads and writes are best-effort: a missing, unreadable or corrupt file
//! yields an empty state and a log line, never an error.

use super::subnets::SubnetPrefix;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub sink_address: Option<Ipv4Addr>,
    pub last_subnet: Option<SubnetPrefix>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DiscoveryState {
    pub fn resolved(address: Ipv4Addr, now: DateTime<Utc>) -> Self {
        Self {
            sink_address: Some(address),
            last_subnet: Some(SubnetPrefix::of(address)),
            resolved_at: Some(now),
        }
    }

    /// Drop the address and timestamp; the subnet hint survives
    pub fn invalidate(&mut self) {
        self.sink_address = None;
        self.resolved_at = None;
    }
}

/// True iff an address is present and younger than `window`
pub fn is_fresh(state: &DiscoveryState, now: DateTime<Utc>, window: Duration) -> bool {
    match (state.sink_address, state.resolved_at) {
        (Some(_), Some(at)) => now.signed_duration_since(at) < window,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    path: Option<PathBuf>,
}

impl DiscoveryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Cache that never touches disk
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> DiscoveryState {
        let Some(path) = &self.path else {
            return DiscoveryState::default();
        };
        if !path.exists() {
            debug!("No discovery cache at {}", path.display());
            return DiscoveryState::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read discovery cache {}: {}", path.display(), e);
                return DiscoveryState::default();
            }
        };

        match toml::from_str(&content) {
            Ok(state) => {
                debug!("Loaded discovery cache: {:?}", state);
                state
            }
            Err(e) => {
                warn!("Ignoring corrupt discovery cache {}: {}", path.display(), e);
                DiscoveryState::default()
            }
        }
    }

    pub fn store(&self, state: &DiscoveryState) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = Self::write(path, state) {
            warn!("Failed to persist discovery cache {}: {}", path.display(), e);
        }
    }

    fn write(path: &Path, state: &DiscoveryState) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(state)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
