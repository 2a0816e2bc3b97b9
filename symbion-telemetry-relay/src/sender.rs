//! Delivery of metric records to the sink's `/update` endpoint

use crate::discovery::transport::SinkTransport;
use crate::discovery::DiscoveryCoordinator;
use crate::error::DeliveryError;
use crate::metrics::MetricRecord;
use anyhow::Context;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TelemetrySender {
    client: reqwest::Client,
    port: u16,
    update_path: String,
}

impl TelemetrySender {
    pub fn new(port: u16, update_path: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build telemetry HTTP client")?;

        Ok(Self {
            client,
            port,
            update_path: update_path.into(),
        })
    }

    fn update_url(&self, addr: Ipv4Addr) -> String {
        let path = self.update_path.trim_start_matches('/');
        format!("http://{}:{}/{}", addr, self.port, path)
    }

    /// POST one record; non-2xx answers are `Rejected`, transport failures `Unreachable`
    pub async fn deliver(&self, record: &MetricRecord, addr: Ipv4Addr) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.update_url(addr))
            .json(record)
            .send()
            .await
            .map_err(|source| DeliveryError::Unreachable { address: addr, source })?;

        let status = response.status();
        if status.is_success() {
            debug!("Sink {} accepted telemetry", addr);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            address: addr,
            status,
            body,
        })
    }

    /// Resolve the sink and deliver; a dead sink gets one rediscovery and one retry.
    ///
    /// Returns the address that accepted the record.
    pub async fn deliver_with_rediscovery<T: SinkTransport>(
        &self,
        record: &MetricRecord,
        discovery: &mut DiscoveryCoordinator<T>,
    ) -> Result<Ipv4Addr, DeliveryError> {
        let addr = discovery.resolve().await?;

        match self.deliver(record, addr).await {
            Ok(()) => return Ok(addr),
            Err(DeliveryError::Unreachable { address, source }) => {
                warn!("Failed to send data to {}: {}", address, source);
                discovery.invalidate();
            }
            Err(e) => return Err(e),
        }

        info!("Attempting to rediscover the sink...");
        let addr = discovery.resolve().await?;

        match self.deliver(record, addr).await {
            Ok(()) => Ok(addr),
            Err(e) => {
                if matches!(e, DeliveryError::Unreachable { .. }) {
                    discovery.invalidate();
                }
                Err(e)
            }
        }
    }
}
