//! Network probes used during discovery
//!
//! `probe` identifies a sink (TCP connect, then signature check on `/`);
//! `is_alive` checks that a known address still answers. Both are
//! individually timeboxed and never return errors, only yes/no.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[async_trait]
pub trait SinkTransport: Send + Sync + 'static {
    /// Whether `addr` hosts the sink device
    async fn probe(&self, addr: Ipv4Addr) -> bool;

    /// Whether a previously found sink at `addr` still answers
    async fn is_alive(&self, addr: Ipv4Addr) -> bool;
}

/// Plain HTTP transport
pub struct HttpSinkTransport {
    client: reqwest::Client,
    port: u16,
    signature: String,
    connect_timeout: Duration,
    probe_timeout: Duration,
    liveness_timeout: Duration,
}

impl HttpSinkTransport {
    pub fn new(
        port: u16,
        signature: impl Into<String>,
        connect_timeout: Duration,
        probe_timeout: Duration,
        liveness_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout.max(liveness_timeout))
            .build()?;

        Ok(Self {
            client,
            port,
            signature: signature.into(),
            connect_timeout,
            probe_timeout,
            liveness_timeout,
        })
    }

    fn root_url(&self, addr: Ipv4Addr) -> String {
        format!("http://{}:{}/", addr, self.port)
    }

    /// Upper bound for one `probe` call
    pub fn probe_budget(&self) -> Duration {
        self.connect_timeout + self.probe_timeout
    }
}

#[async_trait]
impl SinkTransport for HttpSinkTransport {
    async fn probe(&self, addr: Ipv4Addr) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect((addr, self.port))).await {
            Ok(Ok(_stream)) => {}
            _ => return false,
        }

        let response = match self
            .client
            .get(self.root_url(addr))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Port {} open on {} but HTTP probe failed: {}", self.port, addr, e);
                return false;
            }
        };

        match response.text().await {
            Ok(body) => body.contains(&self.signature),
            Err(_) => false,
        }
    }

    async fn is_alive(&self, addr: Ipv4Addr) -> bool {
        match self
            .client
            .get(self.root_url(addr))
            .timeout(self.liveness_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Liveness probe of {} failed: {}", addr, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symbion_relay_devkit::{free_local_port, MockSink};

    fn transport(port: u16, signature: &str) -> HttpSinkTransport {
        HttpSinkTransport::new(
            port,
            signature,
            Duration::from_millis(200),
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_matches_signature() {
        let sink = MockSink::start("System Monitor").await.unwrap();
        let localhost = Ipv4Addr::LOCALHOST;

        assert!(transport(sink.port(), "System Monitor").probe(localhost).await);
        assert!(!transport(sink.port(), "Other Device").probe(localhost).await);
        assert!(transport(sink.port(), "Other Device").is_alive(localhost).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_neither_sink_nor_alive() {
        let port = free_local_port();
        let t = transport(port, "System Monitor");

        assert!(!t.probe(Ipv4Addr::LOCALHOST).await);
        assert!(!t.is_alive(Ipv4Addr::LOCALHOST).await);
    }
}
