//! Metric collection for the telemetry relay
//!
//! Provides the five values shown on the display:
//! - CPU and GPU temperature (from the sensor tree, or "N/A")
//! - CPU, RAM and GPU usage (sensor tree, then OS / vendor tools, then defaults)
//!
//! Tree heuristics live in `rules`; this module wires the cascades together
//! with the non-tree fallbacks and builds the immutable `MetricRecord`.

pub mod rules;

use crate::config::UsageDefaults;
use crate::dedup::EventDeduplicator;
use crate::sensors::SensorNode;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Wire value for a temperature that could not be determined
pub const UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temperature {
    Celsius(f64),
    Unavailable,
}

impl From<Option<f64>> for Temperature {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Temperature::Unavailable, |v| Temperature::Celsius(round1(v)))
    }
}

impl Serialize for Temperature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Temperature::Celsius(v) => serializer.serialize_f64(*v),
            Temperature::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temperature::Celsius(v) => write!(f, "{}°C", v),
            Temperature::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// One poll cycle's telemetry (the sink's `/update` payload)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    cpu_temp: Temperature,
    cpu_usage: f64,
    ram_usage: f64,
    gpu_temp: Temperature,
    gpu_usage: f64,
}

impl MetricRecord {
    /// Usages are clamped to [0, 100]; everything is rounded to one decimal
    pub fn new(
        cpu_temp: Temperature,
        gpu_temp: Temperature,
        cpu_usage: f64,
        ram_usage: f64,
        gpu_usage: f64,
    ) -> Self {
        Self {
            cpu_temp,
            cpu_usage: percentage(cpu_usage),
            ram_usage: percentage(ram_usage),
            gpu_temp,
            gpu_usage: percentage(gpu_usage),
        }
    }

    pub fn log_summary(&self) {
        info!("System Metrics:");
        info!("  • cpu_usage: {}%", self.cpu_usage);
        info!("  • ram_usage: {}%", self.ram_usage);
        info!("  • gpu_usage: {}%", self.gpu_usage);
        info!("  • cpu_temp: {}", self.cpu_temp);
        info!("  • gpu_temp: {}", self.gpu_temp);
    }
}

#[cfg(test)]
impl MetricRecord {
    pub fn cpu_temp(&self) -> Temperature {
        self.cpu_temp
    }

    pub fn gpu_temp(&self) -> Temperature {
        self.gpu_temp
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    pub fn ram_usage(&self) -> f64 {
        self.ram_usage
    }

    pub fn gpu_usage(&self) -> f64 {
        self.gpu_usage
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percentage(value: f64) -> f64 {
    if value.is_finite() {
        round1(value.clamp(0.0, 100.0))
    } else {
        0.0
    }
}

/// GPU utilization from a vendor tool
#[async_trait]
pub trait GpuUtilization: Send + Sync {
    async fn utilization(&self) -> Option<f64>;
}

/// `nvidia-smi` query, killed if it outlives `timeout`
pub struct NvidiaSmi {
    timeout: Duration,
}

impl NvidiaSmi {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl GpuUtilization for NvidiaSmi {
    async fn utilization(&self) -> Option<f64> {
        let child = AsyncCommand::new("nvidia-smi")
            .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!("nvidia-smi exited with {}", output.status);
                return None;
            }
            Ok(Err(e)) => {
                debug!("nvidia-smi unavailable: {}", e);
                return None;
            }
            Err(_) => {
                debug!("nvidia-smi timed out after {:?}", self.timeout);
                return None;
            }
        };

        let usage = parse_smi_utilization(&String::from_utf8_lossy(&output.stdout));
        if let Some(usage) = usage {
            debug!("GPU Usage (NVIDIA): {}%", usage);
        }
        usage
    }
}

/// First GPU's value from `nvidia-smi` csv output
fn parse_smi_utilization(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .next()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// CPU/RAM usage sampled from the OS
#[derive(Debug, Clone, Copy, Default)]
pub struct HostUsage {
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
}

impl HostUsage {
    pub async fn sample() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();

        // Wait a moment for accurate CPU readings
        tokio::time::sleep(Duration::from_millis(200)).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = Some(sys.global_cpu_info().cpu_usage() as f64).filter(|v| v.is_finite());

        let total = sys.total_memory();
        let ram_percent = if total > 0 {
            let used = total.saturating_sub(sys.available_memory());
            Some(used as f64 / total as f64 * 100.0)
        } else {
            None
        };

        HostUsage {
            cpu_percent,
            ram_percent,
        }
    }
}

/// Runs the per-metric cascades; owns the diagnostics registry for the process
pub struct MetricExtractor {
    dedup: EventDeduplicator,
    defaults: UsageDefaults,
    gpu_utility: Option<Box<dyn GpuUtilization>>,
    host_fallback: bool,
}

impl MetricExtractor {
    pub fn new(defaults: UsageDefaults) -> Self {
        Self {
            dedup: EventDeduplicator::new(),
            defaults,
            gpu_utility: None,
            host_fallback: false,
        }
    }

    pub fn with_gpu_utility(mut self, utility: Box<dyn GpuUtilization>) -> Self {
        self.gpu_utility = Some(utility);
        self
    }

    pub fn with_host_fallback(mut self, enabled: bool) -> Self {
        self.host_fallback = enabled;
        self
    }

    /// Build this cycle's record; `tree` is `None` when the sensor source was unreachable
    pub async fn extract(&mut self, tree: Option<&SensorNode>) -> MetricRecord {
        let cpu_temp = self.from_tree(tree, "CPU temperature", rules::CPU_TEMPERATURE);
        let gpu_temp = self.from_tree(tree, "GPU temperature", rules::GPU_TEMPERATURE);
        let mut cpu_usage = self.from_tree(tree, "CPU usage", rules::CPU_USAGE);
        let mut ram_usage = self.from_tree(tree, "RAM usage", rules::RAM_USAGE);
        let mut gpu_usage = self.from_tree(tree, "GPU usage", rules::GPU_USAGE);

        if self.host_fallback && (cpu_usage.is_none() || ram_usage.is_none()) {
            let host = HostUsage::sample().await;
            cpu_usage = cpu_usage.or(host.cpu_percent);
            ram_usage = ram_usage.or(host.ram_percent);
        }

        if gpu_usage.is_none() {
            if let Some(utility) = &self.gpu_utility {
                gpu_usage = utility.utilization().await;
            }
        }

        if cpu_temp.is_none() {
            warn!("CPU temperature could not be determined, reporting as {}", UNAVAILABLE);
        }
        if gpu_temp.is_none() {
            warn!("GPU temperature could not be determined, reporting as {}", UNAVAILABLE);
        }

        MetricRecord::new(
            cpu_temp.into(),
            gpu_temp.into(),
            self.or_default("CPU usage", cpu_usage, self.defaults.cpu_usage),
            self.or_default("RAM usage", ram_usage, self.defaults.ram_usage),
            self.or_default("GPU usage", gpu_usage, self.defaults.gpu_usage),
        )
    }

    fn from_tree(&mut self, tree: Option<&SensorNode>, metric: &str, cascade: &[rules::Rule]) -> Option<f64> {
        let root = tree?;
        rules::cascade(metric, cascade, root, &mut self.dedup).map(|reading| reading.value)
    }

    fn or_default(&self, metric: &str, value: Option<f64>, default: f64) -> f64 {
        value.unwrap_or_else(|| {
            warn!("Could not determine {}, using default value {}", metric, default);
            default
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use symbion_relay_devkit::sensor_tree::{desktop_tree, group, hardware, sensor, tree};

    struct FixedGpu(Option<f64>);

    #[async_trait]
    impl GpuUtilization for FixedGpu {
        async fn utilization(&self) -> Option<f64> {
            self.0
        }
    }

    fn node(value: serde_json::Value) -> SensorNode {
        SensorNode::from_json(&value).unwrap()
    }

    #[test]
    fn test_record_wire_format() {
        let record = MetricRecord::new(
            Temperature::Celsius(45.3),
            Temperature::Unavailable,
            37.24,
            120.0,
            -3.0,
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "cpu_temp": 45.3,
                "cpu_usage": 37.2,
                "ram_usage": 100.0,
                "gpu_temp": "N/A",
                "gpu_usage": 0.0
            })
        );
    }

    #[test]
    fn test_temperature_from_option_rounds() {
        assert_eq!(Temperature::from(Some(41.06)), Temperature::Celsius(41.1));
        assert_eq!(Temperature::from(None), Temperature::Unavailable);
        assert_eq!(Temperature::Unavailable.to_string(), "N/A");
    }

    #[test]
    fn test_parse_smi_utilization() {
        assert_eq!(parse_smi_utilization("37\n12\n"), Some(37.0));
        assert_eq!(parse_smi_utilization(" 5 \n"), Some(5.0));
        assert_eq!(parse_smi_utilization("[N/A]\n"), None);
        assert_eq!(parse_smi_utilization(""), None);
    }

    #[tokio::test]
    async fn test_extract_full_desktop_tree() {
        let root = node(desktop_tree());
        let mut extractor = MetricExtractor::new(UsageDefaults::default())
            .with_gpu_utility(Box::new(FixedGpu(Some(99.0))));

        let record = extractor.extract(Some(&root)).await;

        assert_eq!(record.cpu_temp(), Temperature::Celsius(52.0));
        assert_eq!(record.gpu_temp(), Temperature::Celsius(61.0));
        assert_eq!(record.cpu_usage(), 37.2);
        assert_eq!(record.ram_usage(), 48.3);
        assert_eq!(record.gpu_usage(), 14.0);
        assert!(extractor.dedup.seen("hw:gpu:Sensor/DESKTOP-RELAY/NVIDIA GeForce RTX 3070"));
    }

    #[tokio::test]
    async fn test_missing_tree_uses_defaults_and_sentinel() {
        let mut extractor = MetricExtractor::new(UsageDefaults::default());

        let record = extractor.extract(None).await;

        assert_eq!(record.cpu_temp(), Temperature::Unavailable);
        assert_eq!(record.gpu_temp(), Temperature::Unavailable);
        assert_eq!(record.cpu_usage(), 10.0);
        assert_eq!(record.ram_usage(), 20.0);
        assert_eq!(record.gpu_usage(), 25.0);
    }

    #[tokio::test]
    async fn test_vendor_utility_fills_gpu_usage() {
        let root = node(tree(vec![hardware(
            "Intel Core i5-8400",
            vec![group("Load", vec![sensor("CPU Total", "12 %")])],
        )]));
        let mut extractor = MetricExtractor::new(UsageDefaults::default())
            .with_gpu_utility(Box::new(FixedGpu(Some(63.0))));

        let record = extractor.extract(Some(&root)).await;
        assert_eq!(record.cpu_usage(), 12.0);
        assert_eq!(record.gpu_usage(), 63.0);

        let mut failing = MetricExtractor::new(UsageDefaults::default())
            .with_gpu_utility(Box::new(FixedGpu(None)));
        assert_eq!(failing.extract(Some(&root)).await.gpu_usage(), 25.0);
    }

    #[tokio::test]
    async fn test_host_fallback_yields_valid_percentages() {
        let mut extractor = MetricExtractor::new(UsageDefaults::default()).with_host_fallback(true);

        let record = extractor.extract(None).await;
        assert!((0.0..=100.0).contains(&record.cpu_usage()));
        assert!((0.0..=100.0).contains(&record.ram_usage()));
    }

    #[tokio::test]
    async fn test_malformed_trees_never_panic() {
        let shapes = vec![
            json!({}),
            json!({ "Children": [] }),
            json!({ "Text": "Sensor", "Children": [ { "Text": "CPU" }, { "Value": "50 °C" } ] }),
            json!({ "Text": "Sensor", "Children": [ { "Text": "AMD Ryzen", "Children": [
                { "Text": "Temperatures", "Children": [ { "Text": "Tctl" }, { "Value": "x" } ] },
                { "Text": "Load", "Children": [ { "Text": "CPU Total", "Value": "" } ] }
            ] } ] }),
        ];
        let mut extractor = MetricExtractor::new(UsageDefaults::default());

        for shape in shapes {
            let root = node(shape);
            let record = extractor.extract(Some(&root)).await;
            assert_eq!(record.cpu_temp(), Temperature::Unavailable);
            assert_eq!(record.cpu_usage(), 10.0);
            assert_eq!(record.ram_usage(), 20.0);
            assert_eq!(record.gpu_usage(), 25.0);
        }
    }
}
