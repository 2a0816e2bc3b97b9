//! Symbion Telemetry Relay - hardware sensors to a LAN display
//!
//! Every poll cycle the relay:
//! - Pulls the sensor tree from the local hardware monitor web server
//! - Reduces it to CPU/GPU temperature and CPU/RAM/GPU usage
//! - Finds the display on the LAN (cached, or by scanning candidate subnets)
//! - POSTs the readings to it, rediscovering once if it went away

mod config;
mod dedup;
mod discovery;
mod error;
mod metrics;
mod sender;
mod sensors;

use anyhow::{Context, Result};
use config::RelayConfig;
use discovery::cache::DiscoveryCache;
use discovery::transport::HttpSinkTransport;
use discovery::{DiscoveryCoordinator, Overrides};
use error::DeliveryError;
use metrics::{MetricExtractor, NvidiaSmi};
use sender::TelemetrySender;
use sensors::{HttpSensorSource, SensorSource, SourceHealth};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

struct Relay {
    config: RelayConfig,
    source: HttpSensorSource,
    extractor: MetricExtractor,
    discovery: DiscoveryCoordinator<HttpSinkTransport>,
    sender: TelemetrySender,
    source_health: SourceHealth,
}

impl Relay {
    fn new(config: RelayConfig) -> Result<Self> {
        let source = HttpSensorSource::new(config.sensors.url.clone(), config.sensors.timeout())?;

        let mut extractor = MetricExtractor::new(config.defaults)
            .with_host_fallback(config.sensors.host_usage_fallback);
        if config.sensors.vendor_gpu_utility {
            extractor = extractor.with_gpu_utility(Box::new(NvidiaSmi::new(Duration::from_secs(2))));
        }

        let transport = HttpSinkTransport::new(
            config.sink.port,
            config.sink.signature.clone(),
            config.discovery.connect_timeout(),
            config.discovery.probe_timeout(),
            config.discovery.liveness_timeout(),
        )
        .context("Failed to build discovery transport")?;
        let probe_budget = transport.probe_budget();

        let cache = match RelayConfig::discovery_cache_path() {
            Ok(path) => DiscoveryCache::new(path),
            Err(e) => {
                warn!("Discovery cache disabled: {}", e);
                DiscoveryCache::disabled()
            }
        };
        if let Some(path) = cache.path() {
            debug!("Discovery cache at {}", path.display());
        }

        let overrides = Overrides {
            address: config.sink.address,
            subnet: config.sink.subnet,
        };
        let discovery = DiscoveryCoordinator::new(
            Arc::new(transport),
            cache,
            overrides,
            &config.discovery,
            probe_budget,
        );

        let sender = TelemetrySender::new(
            config.sink.port,
            config.sink.update_path.clone(),
            config.sink.delivery_timeout(),
        )?;

        Ok(Self {
            config,
            source,
            extractor,
            discovery,
            sender,
            source_health: SourceHealth::default(),
        })
    }

    async fn run(&mut self) -> Result<()> {
        info!(
            "Polling {} every {}s",
            self.source.url(),
            self.config.poll.interval().as_secs()
        );

        let mut poll_timer = interval(self.config.poll.interval());
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        // A cycle can sit in a long sweep, so shutdown races it too
        loop {
            if unless_shutdown(poll_timer.tick(), shutdown.as_mut()).await.is_none() {
                break;
            }
            if unless_shutdown(self.cycle(), shutdown.as_mut()).await.is_none() {
                break;
            }
        }

        info!("Shutdown requested, stopping relay");
        Ok(())
    }

    /// One poll: fetch, extract, deliver. Never fails; problems are logged.
    async fn cycle(&mut self) {
        let fetched = self.source.fetch_tree().await;
        let tree = self.source_health.observe(self.source.url(), fetched);

        let record = self.extractor.extract(tree.as_ref()).await;
        record.log_summary();

        match self
            .sender
            .deliver_with_rediscovery(&record, &mut self.discovery)
            .await
        {
            Ok(addr) => info!("Data sent successfully to {}", addr),
            Err(DeliveryError::Discovery(e)) => {
                warn!("No sink this cycle ({:?}): {}", self.discovery.phase(), e)
            }
            Err(e) => error!("Failed to send data ({:?}): {}", self.discovery.phase(), e),
        }
    }
}

/// `Some(output)` if `work` finishes first, `None` once `shutdown` fires
async fn unless_shutdown<W, S>(work: W, shutdown: Pin<&mut S>) -> Option<W::Output>
where
    W: Future,
    S: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = shutdown => None,
    }
}

fn print_provider_instructions(process: &str) {
    warn!("{} does not appear to be running", process);
    warn!("Start it and enable its web server:");
    warn!("  1. Options > Remote Web Server > Run");
    warn!("  2. Options > Remote Web Server > Port, set 8085");
    warn!("The relay keeps polling and will pick up readings once it is available");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("symbion_telemetry_relay=info")),
        )
        .init();

    info!("Symbion Telemetry Relay starting...");

    if RelayConfig::is_first_time_setup() {
        match RelayConfig::default().save().await {
            Ok(()) => {
                if let Ok(path) = RelayConfig::config_file_path() {
                    info!("Wrote default configuration to {}", path.display());
                }
            }
            Err(e) => warn!("Could not write default configuration: {:#}", e),
        }
    }

    let config = RelayConfig::load().await.context("Failed to load configuration")?;

    if !sensors::provider_running(&config.sensors.provider_process) {
        print_provider_instructions(&config.sensors.provider_process);
    }

    let mut relay = Relay::new(config).context("Failed to create relay")?;

    relay.run().await.context("Relay execution failed")?;

    Ok(())
}
