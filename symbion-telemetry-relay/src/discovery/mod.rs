//! Sink discovery for the telemetry relay
//!
//! This module handles:
//! - Candidate subnet enumeration (operator, cache, interfaces, hotspot prefixes)
//! - Concurrent /24 sweeps for the sink's HTTP signature
//! - Durable caching of the last good address with a freshness window
//! - The resolve/invalidate state machine used by the sender
//!
//! Phases: `Unresolved -> Validating -> Resolved -> Invalidated -> Validating ...`

pub mod cache;
pub mod scanner;
pub mod subnets;
pub mod transport;

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use cache::{is_fresh, DiscoveryCache, DiscoveryState};
use chrono::Utc;
use scanner::SubnetScanner;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use subnets::SubnetPrefix;
use tracing::{debug, info, warn};
use transport::SinkTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    Unresolved,
    Validating,
    Resolved,
    Invalidated,
}

/// Operator-supplied hints
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<Ipv4Addr>,
    pub subnet: Option<SubnetPrefix>,
}

pub struct DiscoveryCoordinator<T: SinkTransport> {
    transport: Arc<T>,
    scanner: SubnetScanner<T>,
    cache: DiscoveryCache,
    state: DiscoveryState,
    phase: DiscoveryPhase,
    // Survives invalidation for the last-resort probe
    last_persisted: Option<Ipv4Addr>,
    overrides: Overrides,
    freshness: chrono::Duration,
    priority_subnets: Vec<SubnetPrefix>,
    interface_addrs: Option<Vec<Ipv4Addr>>,
}

impl<T: SinkTransport> DiscoveryCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        cache: DiscoveryCache,
        overrides: Overrides,
        config: &DiscoveryConfig,
        probe_budget: Duration,
    ) -> Self {
        let state = cache.load();
        if let Some(addr) = state.sink_address {
            info!("Last known sink: {}", addr);
        }

        Self {
            scanner: SubnetScanner::new(Arc::clone(&transport), config.max_in_flight, probe_budget),
            transport,
            cache,
            last_persisted: state.sink_address,
            state,
            phase: DiscoveryPhase::Unresolved,
            overrides,
            freshness: config.freshness_window(),
            priority_subnets: config.priority_subnets.clone(),
            interface_addrs: None,
        }
    }

    /// Use a fixed interface list instead of enumerating the host's
    #[cfg(test)]
    pub fn with_interface_addrs(mut self, addrs: Vec<Ipv4Addr>) -> Self {
        self.interface_addrs = Some(addrs);
        self
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn state(&self) -> &DiscoveryState {
        &self.state
    }

    /// Current sink address, discovering it if necessary
    pub async fn resolve(&mut self) -> Result<Ipv4Addr, DiscoveryError> {
        let now = Utc::now();

        if self.phase == DiscoveryPhase::Resolved {
            if let Some(addr) = self.state.sink_address {
                if is_fresh(&self.state, now, self.freshness) {
                    return Ok(addr);
                }
                debug!("Sink {} older than freshness window, re-validating", addr);
            }
        }

        let forced = self.phase == DiscoveryPhase::Invalidated;
        let aged = self.phase == DiscoveryPhase::Resolved;
        self.phase = DiscoveryPhase::Validating;

        if let Some(addr) = self.overrides.address {
            return if self.transport.is_alive(addr).await {
                info!("Using configured sink address {}", addr);
                Ok(self.mark_resolved(addr))
            } else {
                self.phase = DiscoveryPhase::Unresolved;
                Err(DiscoveryError::OperatorAddressUnreachable(addr))
            };
        }

        // An aged resolution is re-checked in place before any sweep
        if !forced && (aged || is_fresh(&self.state, now, self.freshness)) {
            if let Some(addr) = self.state.sink_address {
                if self.transport.is_alive(addr).await {
                    debug!("Sink {} still alive", addr);
                    return Ok(self.mark_resolved(addr));
                }
                warn!("Cached sink {} did not answer, rediscovering", addr);
                self.state.invalidate();
            }
        }

        let candidates = self.candidates();
        for prefix in &candidates {
            if let Some(addr) = self.scanner.scan_subnet(prefix).await {
                return Ok(self.mark_resolved(addr));
            }
        }

        if let Some(addr) = self.last_persisted {
            info!("Sweep found nothing, trying last known sink {}", addr);
            if self.transport.is_alive(addr).await {
                return Ok(self.mark_resolved(addr));
            }
        }

        self.phase = DiscoveryPhase::Unresolved;
        report_not_found(&candidates);
        Err(DiscoveryError::SinkNotFound {
            subnets: candidates.len(),
        })
    }

    /// Forget the in-memory address; the next `resolve` skips the freshness shortcut
    pub fn invalidate(&mut self) {
        if let Some(addr) = self.state.sink_address {
            warn!("Invalidating sink address {}", addr);
        }
        self.state.invalidate();
        self.phase = DiscoveryPhase::Invalidated;
    }

    fn candidates(&self) -> Vec<SubnetPrefix> {
        let interface_addrs = match &self.interface_addrs {
            Some(addrs) => addrs.clone(),
            None => subnets::local_ipv4_addrs(),
        };

        subnets::candidate_subnets(
            self.overrides.subnet,
            self.state.last_subnet,
            &interface_addrs,
            &self.priority_subnets,
        )
    }

    fn mark_resolved(&mut self, addr: Ipv4Addr) -> Ipv4Addr {
        self.state = DiscoveryState::resolved(addr, Utc::now());
        self.phase = DiscoveryPhase::Resolved;
        self.last_persisted = Some(addr);
        self.cache.store(&self.state);
        addr
    }
}

fn report_not_found(candidates: &[SubnetPrefix]) {
    let scanned: Vec<String> = candidates.iter().map(ToString::to_string).collect();
    warn!("Could not find the telemetry display on the network");
    warn!("Scanned subnets: {}", scanned.join(", "));
    warn!("1. Make sure the display is powered on and joined to the same WiFi/LAN");
    warn!("2. Check that its web page opens in a browser");
    warn!("3. If you know its address, set SYMBION_SINK_ADDRESS (or sink.address in the config)");
    warn!("4. If it sits on another subnet, set SYMBION_SINK_SUBNET, e.g. 192.168.4");
}
