//! Bounded-concurrency sweep of one /24
//!
//! Hosts are probed in batches of at most `max_in_flight` tasks. The first
//! positive probe ends the sweep; the rest of its batch is aborted when the
//! `JoinSet` is dropped, so nothing waits on stragglers.

use super::subnets::SubnetPrefix;
use super::transport::SinkTransport;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

pub struct SubnetScanner<T: SinkTransport> {
    transport: Arc<T>,
    max_in_flight: usize,
    worker_timeout: Duration,
}

impl<T: SinkTransport> SubnetScanner<T> {
    pub fn new(transport: Arc<T>, max_in_flight: usize, worker_timeout: Duration) -> Self {
        Self {
            transport,
            max_in_flight: max_in_flight.max(1),
            worker_timeout,
        }
    }

    pub async fn scan_subnet(&self, prefix: &SubnetPrefix) -> Option<Ipv4Addr> {
        info!("Scanning {}.0/24 for the sink...", prefix);

        let hosts: Vec<Ipv4Addr> = prefix.hosts().collect();
        for batch in hosts.chunks(self.max_in_flight) {
            let mut workers = JoinSet::new();

            for &addr in batch {
                let transport = Arc::clone(&self.transport);
                let limit = self.worker_timeout;
                workers.spawn(async move {
                    match timeout(limit, transport.probe(addr)).await {
                        Ok(true) => Some(addr),
                        _ => None,
                    }
                });
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Some(addr)) => {
                        info!("Sink found at {}", addr);
                        return Some(addr);
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Probe worker ended abnormally: {}", e),
                }
            }
        }

        debug!("No sink in {}.0/24", prefix);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts concurrent probes; answers yes for `sink` only
    #[derive(Default)]
    struct CountingTransport {
        sink: Option<Ipv4Addr>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl SinkTransport for CountingTransport {
        async fn probe(&self, addr: Ipv4Addr) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Some(addr) == self.sink
        }

        async fn is_alive(&self, _addr: Ipv4Addr) -> bool {
            false
        }
    }

    fn prefix() -> SubnetPrefix {
        "192.168.0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_never_more_than_max_in_flight() {
        let transport = Arc::new(CountingTransport {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let scanner = SubnetScanner::new(Arc::clone(&transport), 50, Duration::from_secs(1));

        assert_eq!(scanner.scan_subnet(&prefix()).await, None);

        let max = transport.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 50, "saw {} probes in flight", max);
        assert!(max > 1, "probes never overlapped");
        assert_eq!(transport.probes.load(Ordering::SeqCst), 254);
    }

    #[tokio::test]
    async fn test_first_match_stops_later_batches() {
        let transport = Arc::new(CountingTransport {
            sink: Some(Ipv4Addr::new(192, 168, 0, 20)),
            delay: Duration::from_millis(1),
            ..Default::default()
        });
        let scanner = SubnetScanner::new(Arc::clone(&transport), 50, Duration::from_secs(1));

        assert_eq!(
            scanner.scan_subnet(&prefix()).await,
            Some(Ipv4Addr::new(192, 168, 0, 20))
        );
        assert!(transport.probes.load(Ordering::SeqCst) <= 50);
    }

    #[tokio::test]
    async fn test_slow_probe_is_timeboxed() {
        let transport = Arc::new(CountingTransport {
            sink: Some(Ipv4Addr::new(192, 168, 0, 1)),
            delay: Duration::from_secs(30),
            ..Default::default()
        });
        let scanner = SubnetScanner::new(transport, 254, Duration::from_millis(20));

        let started = std::time::Instant::now();
        assert_eq!(scanner.scan_subnet(&prefix()).await, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
