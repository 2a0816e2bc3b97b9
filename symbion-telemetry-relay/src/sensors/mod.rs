//! Sensor tree acquisition for the telemetry relay
//!
//! This module handles:
//! - Fetching the hardware monitor's `data.json` tree over HTTP
//! - Tolerant conversion of that JSON into `SensorNode` values
//! - Checking whether the monitor process is running
//! - Reporting every failed poll and the source's recovery
//!
//! The monitor (OpenHardwareMonitor or a compatible fork) exposes a tree of
//! `{"Text", "Value", "Children"}` objects whose shape depends on the vendor
//! drivers present on the machine, so nothing here assumes a fixed layout.

pub mod walker;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, info, warn};

/// Node of the vendor sensor tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorNode {
    pub label: Option<String>,
    pub raw_value: Option<String>,
    pub children: Vec<SensorNode>,
}

impl SensorNode {
    /// Convert a JSON object into a node, dropping anything that is not shaped like one.
    ///
    /// Returns `None` only when `value` itself is not an object. Fields with the
    /// wrong type are treated as absent, and non-object children are skipped.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let label = object.get("Text").and_then(Value::as_str).map(str::to_string);
        let raw_value = object.get("Value").and_then(Value::as_str).map(str::to_string);
        let children = object
            .get("Children")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(SensorNode::from_json).collect())
            .unwrap_or_default();

        Some(SensorNode {
            label,
            raw_value,
            children,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn raw_value(&self) -> Option<&str> {
        self.raw_value.as_deref()
    }

    /// First direct child whose label is exactly `label`
    pub fn child(&self, label: &str) -> Option<&SensorNode> {
        self.children.iter().find(|c| c.label() == Some(label))
    }

    /// Direct children whose label contains `fragment`
    pub fn children_containing<'a>(
        &'a self,
        fragment: &'a str,
    ) -> impl Iterator<Item = &'a SensorNode> + 'a {
        self.children
            .iter()
            .filter(move |c| c.label().is_some_and(|l| l.contains(fragment)))
    }
}

/// Source of the current sensor tree
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch_tree(&self) -> Result<SensorNode>;
}

/// Hardware monitor remote web server (`/data.json`)
pub struct HttpSensorSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSensorSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build sensor source HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn fetch_tree(&self) -> Result<SensorNode> {
        debug!("Fetching sensor tree from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Sensor source unreachable at {}", self.url))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Sensor source answered {} at {}",
                response.status(),
                self.url
            ));
        }

        let body: Value = response
            .json()
            .await
            .context("Sensor source returned invalid JSON")?;

        SensorNode::from_json(&body)
            .ok_or_else(|| anyhow::anyhow!("Sensor source root is not an object"))
    }
}

/// Sensor source availability across polls
#[derive(Debug, Default)]
pub struct SourceHealth {
    consecutive_failures: u32,
}

impl SourceHealth {
    /// Log one fetch result and hand the tree on; every failure is reported
    pub fn observe(&mut self, url: &str, result: Result<SensorNode>) -> Option<SensorNode> {
        match result {
            Ok(tree) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Sensor source is back at {} after {} failed poll(s)",
                        url, self.consecutive_failures
                    );
                    self.consecutive_failures = 0;
                }
                Some(tree)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "Failed to fetch sensor data ({} in a row): {:#}",
                    self.consecutive_failures, e
                );
                None
            }
        }
    }
}

/// Whether a process named like the hardware monitor is currently running
pub fn provider_running(process_name: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();

    let running = sys.processes_by_name(process_name).next().is_some();
    debug!("Provider process '{}' running: {}", process_name, running);
    running
}
