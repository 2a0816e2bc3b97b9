//! Extraction rules over the sensor tree
//!
//! Each metric is an ordered list of `Rule` variants; the first rule that
//! produces a parseable reading wins. Keyword matching is case-sensitive
//! unless a rule says otherwise, since vendor labels are stable.

use crate::dedup::EventDeduplicator;
use crate::sensors::walker::{self, Visit};
use crate::sensors::SensorNode;
use tracing::debug;

const CPU_HARDWARE: &[&str] = &[
    "CPU", "Processor", "Ryzen", "Intel", "Core i", "Pentium", "Celeron", "AMD",
];
const CPU_EXCLUDED: &[&str] = &["Graphics", "GPU"];
const CPU_PACKAGE: &[&str] = &["Package", "Tctl", "Tdie", "Total", "CPU"];
const CPU_SCAN_LABELS: &[&str] = &["CPU", "Package", "Processor"];

const GPU_HARDWARE: &[&str] = &["GPU", "Graphics", "NVIDIA", "AMD", "Radeon", "GeForce"];
const GPU_EXCLUDED: &[&str] = &["CPU", "Processor", "Ryzen", "Athlon", "EPYC"];
const GPU_CORE: &[&str] = &["Core", "GPU", "Die", "Hot Spot", "Junction"];
const GPU_SCAN_LABELS: &[&str] = &["GPU", "Graphics", "Video"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Cpu,
    Gpu,
}

impl HardwareKind {
    pub fn name(self) -> &'static str {
        match self {
            HardwareKind::Cpu => "CPU",
            HardwareKind::Gpu => "GPU",
        }
    }

    fn key(self) -> &'static str {
        match self {
            HardwareKind::Cpu => "cpu",
            HardwareKind::Gpu => "gpu",
        }
    }

    /// Whether a hardware-level label names this kind of device
    pub fn is_hardware(self, label: &str) -> bool {
        let (keywords, excluded) = match self {
            HardwareKind::Cpu => (CPU_HARDWARE, CPU_EXCLUDED),
            HardwareKind::Gpu => (GPU_HARDWARE, GPU_EXCLUDED),
        };
        contains_any(label, keywords) && !contains_any(label, excluded)
    }

    /// Package-level (CPU) or core-level (GPU) temperature sensor labels
    fn sensor_keywords(self) -> &'static [&'static str] {
        match self {
            HardwareKind::Cpu => CPU_PACKAGE,
            HardwareKind::Gpu => GPU_CORE,
        }
    }

    fn is_scan_candidate(self, label: &str, path: &str) -> bool {
        match self {
            HardwareKind::Cpu => {
                !path.contains("GPU")
                    && (path.contains("CPU")
                        || path.contains("Processor")
                        || contains_any(label, CPU_SCAN_LABELS))
            }
            HardwareKind::Gpu => {
                path.contains("GPU")
                    || path.contains("Graphics")
                    || contains_any(label, GPU_SCAN_LABELS)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Hardware node -> "Temperatures" group -> package/core sensor
    HardwareTemperature(HardwareKind),
    /// Any temperature-looking node whose path or label points at the device
    TemperatureScan(HardwareKind),
    /// CPU hardware -> "Load" -> "CPU Total"
    CpuTotalLoad,
    /// Any "load" + "cpu"/"processor" label, preferring totals
    CpuLoadScan,
    /// "Generic Memory" -> "Load" -> "Memory" (percent only)
    MemoryLoad,
    /// Any "load"/"used" + "memory"/"ram" label (percent only)
    MemoryLoadScan,
    /// GPU hardware -> "Load" -> GPU/Core sensor (percent only)
    GpuCoreLoad,
    /// Any "load" + "gpu"/"graphics" label
    GpuLoadScan,
}

pub const CPU_TEMPERATURE: &[Rule] = &[
    Rule::HardwareTemperature(HardwareKind::Cpu),
    Rule::TemperatureScan(HardwareKind::Cpu),
];
pub const GPU_TEMPERATURE: &[Rule] = &[
    Rule::HardwareTemperature(HardwareKind::Gpu),
    Rule::TemperatureScan(HardwareKind::Gpu),
];
pub const CPU_USAGE: &[Rule] = &[Rule::CpuTotalLoad, Rule::CpuLoadScan];
pub const RAM_USAGE: &[Rule] = &[Rule::MemoryLoad, Rule::MemoryLoadScan];
pub const GPU_USAGE: &[Rule] = &[Rule::GpuCoreLoad, Rule::GpuLoadScan];

/// A value produced by one rule
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub rule: Rule,
    pub path: String,
}

/// Run `rules` in order and return the first reading.
pub fn cascade(
    metric: &str,
    rules: &[Rule],
    root: &SensorNode,
    dedup: &mut EventDeduplicator,
) -> Option<Reading> {
    for &rule in rules {
        if let Some((value, path)) = rule.apply(root, dedup) {
            dedup.notify_once(
                format!("Using {} from {}: {} ({:?})", metric, path, value, rule),
                format!("{}:{}", metric, path),
            );
            return Some(Reading { value, rule, path });
        }
        debug!("{} rule {:?} found nothing", metric, rule);
    }
    None
}

impl Rule {
    pub fn apply(self, root: &SensorNode, dedup: &mut EventDeduplicator) -> Option<(f64, String)> {
        match self {
            Rule::HardwareTemperature(kind) => hardware_temperature(root, kind, dedup),
            Rule::TemperatureScan(kind) => scan(
                root,
                |label, raw, path| {
                    (label.contains("Temperature") || is_temperature_value(raw))
                        && kind.is_scan_candidate(label, path)
                },
                |label| contains_any(label, kind.sensor_keywords()),
                parse_temperature,
            ),
            Rule::CpuTotalLoad => cpu_total_load(root),
            Rule::CpuLoadScan => scan(
                root,
                |label, _, _| {
                    let label = label.to_lowercase();
                    label.contains("load") && (label.contains("cpu") || label.contains("processor"))
                },
                |label| {
                    let label = label.to_lowercase();
                    label.contains("total") || label.contains("package")
                },
                parse_reading,
            ),
            Rule::MemoryLoad => walker::find(root, |node, _| {
                node.label() == Some("Generic Memory") && memory_load(node).is_some()
            })
            .and_then(|(node, path)| Some((memory_load(node)?, format!("{}/Load/Memory", path)))),
            Rule::MemoryLoadScan => scan(
                root,
                |label, raw, _| {
                    let label = label.to_lowercase();
                    (label.contains("load") || label.contains("used"))
                        && (label.contains("memory") || label.contains("ram"))
                        && is_percentage(raw)
                },
                |_| false,
                parse_reading,
            ),
            Rule::GpuCoreLoad => walker::find_map(root, |node, _| {
                if !is_hardware_node(node, HardwareKind::Gpu) {
                    return None;
                }
                node.child("Load")?.children.iter().find_map(|sensor| {
                    let label = sensor.label()?;
                    let raw = sensor.raw_value()?;
                    if !(label.contains("GPU") || label.contains("Core")) || !is_percentage(raw) {
                        return None;
                    }
                    parse_reading(raw).map(|value| (value, label.to_string()))
                })
            })
            .map(|((value, sensor), path)| (value, format!("{}/Load/{}", path, sensor))),
            Rule::GpuLoadScan => scan(
                root,
                |label, _, _| {
                    let label = label.to_lowercase();
                    label.contains("load") && (label.contains("gpu") || label.contains("graphics"))
                },
                |_| false,
                parse_reading,
            ),
        }
    }
}

/// Leading whitespace-delimited token of a sensor value, as a finite number.
pub fn parse_reading(raw: &str) -> Option<f64> {
    raw.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Like `parse_reading`, converting Fahrenheit readings to Celsius.
pub fn parse_temperature(raw: &str) -> Option<f64> {
    let value = parse_reading(raw)?;
    if raw.contains("°F") {
        Some((value - 32.0) * 5.0 / 9.0)
    } else {
        Some(value)
    }
}

fn is_percentage(raw: &str) -> bool {
    raw.contains('%')
}

fn is_temperature_value(raw: &str) -> bool {
    raw.contains("°C") || raw.contains("°F")
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

// Leaves are sensors, not hardware, even when their label names a device
fn is_hardware_node(node: &SensorNode, kind: HardwareKind) -> bool {
    !node.children.is_empty() && node.label().is_some_and(|l| kind.is_hardware(l))
}

// "CPU Total" of the first CPU that reports one; a CPU's own subtree holds no other CPU
fn cpu_total_load(root: &SensorNode) -> Option<(f64, String)> {
    let mut found = None;
    walker::walk(root, |node, path| {
        if !is_hardware_node(node, HardwareKind::Cpu) {
            return Visit::Continue;
        }
        let total = node
            .child("Load")
            .and_then(|load| load.child("CPU Total"))
            .and_then(|sensor| sensor.raw_value())
            .and_then(parse_reading);
        match total {
            Some(value) => {
                found = Some((value, format!("{}/Load/CPU Total", path)));
                Visit::Stop
            }
            None => Visit::SkipChildren,
        }
    });
    found
}

/// "Generic Memory" -> "Load" -> "Memory", percentages only
fn memory_load(node: &SensorNode) -> Option<f64> {
    let raw = node.child("Load")?.child("Memory")?.raw_value()?;
    if !is_percentage(raw) {
        return None;
    }
    parse_reading(raw)
}

fn hardware_nodes<'a>(
    root: &'a SensorNode,
    kind: HardwareKind,
    dedup: &mut EventDeduplicator,
) -> Vec<(&'a SensorNode, String)> {
    let mut found = Vec::new();
    walker::walk_all(root, |node, path| {
        if is_hardware_node(node, kind) {
            found.push((node, path.to_string()));
        }
    });

    for (_, path) in &found {
        dedup.notify_once(
            format!("Found {} hardware: {}", kind.name(), path),
            format!("hw:{}:{}", kind.key(), path),
        );
    }
    found
}

fn hardware_temperature(
    root: &SensorNode,
    kind: HardwareKind,
    dedup: &mut EventDeduplicator,
) -> Option<(f64, String)> {
    for (hardware, path) in hardware_nodes(root, kind, dedup) {
        for group in hardware.children_containing("Temperatures") {
            for sensor in &group.children {
                let (Some(label), Some(raw)) = (sensor.label(), sensor.raw_value()) else {
                    continue;
                };
                if !contains_any(label, kind.sensor_keywords()) {
                    continue;
                }
                match parse_temperature(raw) {
                    Some(value) => {
                        let group_label = group.label().unwrap_or("Temperatures");
                        return Some((value, format!("{}/{}/{}", path, group_label, label)));
                    }
                    None => debug!("Unparseable {} temperature '{}' at {}/{}", kind.name(), raw, path, label),
                }
            }
        }
    }
    None
}

/// Exhaustive keyword scan: first preferred match, else first match.
fn scan<M, P>(
    root: &SensorNode,
    matches: M,
    preferred: P,
    parse: fn(&str) -> Option<f64>,
) -> Option<(f64, String)>
where
    M: Fn(&str, &str, &str) -> bool,
    P: Fn(&str) -> bool,
{
    let mut best = None;
    let mut fallback = None;

    walker::walk_all(root, |node, path| {
        let (Some(label), Some(raw)) = (node.label(), node.raw_value()) else {
            return;
        };
        if best.is_some() || !matches(label, raw, path) {
            return;
        }
        let Some(value) = parse(raw) else {
            return;
        };

        if preferred(label) {
            best = Some((value, path.to_string()));
        } else if fallback.is_none() {
            fallback = Some((value, path.to_string()));
        }
    });

    best.or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symbion_relay_devkit::sensor_tree::{group, hardware, sensor, tree};

    fn node(value: serde_json::Value) -> SensorNode {
        SensorNode::from_json(&value).unwrap()
    }

    fn run(rules: &[Rule], root: &SensorNode) -> Option<Reading> {
        cascade("test metric", rules, root, &mut EventDeduplicator::new())
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("45.3 °C"), Some(45.3));
        assert_eq!(parse_reading("  37.2 %"), Some(37.2));
        assert_eq!(parse_reading("12"), Some(12.0));
        assert_eq!(parse_reading(""), None);
        assert_eq!(parse_reading("N/A"), None);
        assert_eq!(parse_reading("NaN %"), None);
        assert_eq!(parse_temperature("212 °F"), Some(100.0));
    }

    #[test]
    fn test_hardware_keywords() {
        assert!(HardwareKind::Cpu.is_hardware("Intel Core i7-9700K"));
        assert!(HardwareKind::Cpu.is_hardware("AMD Ryzen 7 5800X"));
        assert!(!HardwareKind::Cpu.is_hardware("Intel UHD Graphics 630"));
        assert!(HardwareKind::Gpu.is_hardware("NVIDIA GeForce RTX 3070"));
        assert!(HardwareKind::Gpu.is_hardware("AMD Radeon RX 6800"));
        assert!(!HardwareKind::Gpu.is_hardware("AMD Ryzen 7 5800X"));
    }

    #[test]
    fn test_cpu_temperature_from_package_sensor() {
        let root = node(tree(vec![hardware(
            "Intel Core i7-9700K",
            vec![group(
                "Temperatures",
                vec![sensor("Core #1", "51.0 °C"), sensor("CPU Package", "55.0 °C")],
            )],
        )]));

        let reading = run(CPU_TEMPERATURE, &root).unwrap();
        assert_eq!(reading.value, 55.0);
        assert_eq!(reading.rule, Rule::HardwareTemperature(HardwareKind::Cpu));
        assert_eq!(reading.path, "Sensor/Intel Core i7-9700K/Temperatures/CPU Package");
    }

    #[test]
    fn test_cpu_temperature_skips_unparseable_sensor() {
        let root = node(tree(vec![hardware(
            "AMD Ryzen 5 3600",
            vec![group(
                "Temperatures",
                vec![sensor("Core (Tctl)", "-"), sensor("Core (Tdie)", "62.5 °C")],
            )],
        )]));

        let reading = run(CPU_TEMPERATURE, &root).unwrap();
        assert_eq!(reading.value, 62.5);
        assert_eq!(reading.rule, Rule::HardwareTemperature(HardwareKind::Cpu));
    }

    #[test]
    fn test_cpu_temperature_falls_back_to_generic_scan() {
        let root = node(tree(vec![
            sensor("Motherboard Temperature", "30 °C"),
            sensor("CPU Package Temperature", "41 °C"),
        ]));

        let reading = run(CPU_TEMPERATURE, &root).unwrap();
        assert_eq!(reading.value, 41.0);
        assert_eq!(reading.rule, Rule::TemperatureScan(HardwareKind::Cpu));
    }

    #[test]
    fn test_generic_scan_prefers_package_label() {
        let root = node(tree(vec![hardware(
            "Processor Sensors",
            vec![sensor("Sensor 1", "39 °C"), sensor("Die Package", "44 °C")],
        )]));

        let reading = run(&[Rule::TemperatureScan(HardwareKind::Cpu)], &root).unwrap();
        assert_eq!(reading.value, 44.0);
    }

    #[test]
    fn test_gpu_temperature_from_core_sensor() {
        let root = node(tree(vec![
            hardware(
                "AMD Ryzen 7 5800X",
                vec![group("Temperatures", vec![sensor("Core (Tctl/Tdie)", "70 °C")])],
            ),
            hardware(
                "NVIDIA GeForce RTX 3070",
                vec![group("Temperatures", vec![sensor("GPU Core", "63 °C")])],
            ),
        ]));

        let cpu = run(CPU_TEMPERATURE, &root).unwrap();
        let gpu = run(GPU_TEMPERATURE, &root).unwrap();
        assert_eq!(cpu.value, 70.0);
        assert_eq!(gpu.value, 63.0);
        assert_eq!(gpu.path, "Sensor/NVIDIA GeForce RTX 3070/Temperatures/GPU Core");
    }

    #[test]
    fn test_gpu_temperature_scan_ignores_cpu_paths() {
        let root = node(tree(vec![
            sensor("CPU Temperature", "48 °C"),
            sensor("Video Temperature", "58 °C"),
        ]));

        assert_eq!(run(GPU_TEMPERATURE, &root).unwrap().value, 58.0);
        assert_eq!(run(CPU_TEMPERATURE, &root).unwrap().value, 48.0);
    }

    #[test]
    fn test_cpu_usage_exact_path() {
        let root = node(tree(vec![hardware(
            "Intel Core i5-8400",
            vec![group(
                "Load",
                vec![sensor("CPU Core #1", "80.0 %"), sensor("CPU Total", "37.2 %")],
            )],
        )]));

        let reading = run(CPU_USAGE, &root).unwrap();
        assert_eq!(reading.value, 37.2);
        assert_eq!(reading.rule, Rule::CpuTotalLoad);
        assert_eq!(reading.path, "Sensor/Intel Core i5-8400/Load/CPU Total");
    }

    #[test]
    fn test_cpu_usage_moves_on_to_next_cpu() {
        let root = node(tree(vec![
            hardware(
                "Intel Xeon CPU #0",
                vec![group("Clocks", vec![sensor("Bus Speed", "100 MHz")])],
            ),
            hardware(
                "Intel Xeon CPU #1",
                vec![group("Load", vec![sensor("CPU Total", "64.5 %")])],
            ),
        ]));

        let reading = run(CPU_USAGE, &root).unwrap();
        assert_eq!(reading.value, 64.5);
        assert_eq!(reading.rule, Rule::CpuTotalLoad);
        assert_eq!(reading.path, "Sensor/Intel Xeon CPU #1/Load/CPU Total");
    }

    #[test]
    fn test_cpu_usage_scan_prefers_total() {
        let root = node(tree(vec![
            sensor("CPU Load Core 1", "90 %"),
            sensor("Processor Load Total", "22 %"),
        ]));

        let reading = run(CPU_USAGE, &root).unwrap();
        assert_eq!(reading.value, 22.0);
        assert_eq!(reading.rule, Rule::CpuLoadScan);
    }

    #[test]
    fn test_ram_usage_requires_percentage() {
        let exact = node(tree(vec![hardware(
            "Generic Memory",
            vec![group("Load", vec![sensor("Memory", "48.1 %")])],
        )]));
        let reading = run(RAM_USAGE, &exact).unwrap();
        assert_eq!(reading.value, 48.1);
        assert_eq!(reading.rule, Rule::MemoryLoad);

        let gigabytes = node(tree(vec![
            hardware("Generic Memory", vec![group("Load", vec![sensor("Memory", "7.9 GB")])]),
            sensor("Used Memory", "7.9 GB"),
            sensor("RAM Load", "33 %"),
        ]));
        let reading = run(RAM_USAGE, &gigabytes).unwrap();
        assert_eq!(reading.value, 33.0);
        assert_eq!(reading.rule, Rule::MemoryLoadScan);
    }

    #[test]
    fn test_gpu_usage_exact_path_and_scan() {
        let exact = node(tree(vec![hardware(
            "NVIDIA GeForce GTX 1660",
            vec![group(
                "Load",
                vec![sensor("GPU Memory Controller", "n/a"), sensor("GPU Core", "12 %")],
            )],
        )]));
        let reading = run(GPU_USAGE, &exact).unwrap();
        assert_eq!(reading.value, 12.0);
        assert_eq!(reading.rule, Rule::GpuCoreLoad);

        let flat = node(tree(vec![sensor("Graphics Load", "7 %")]));
        let reading = run(GPU_USAGE, &flat).unwrap();
        assert_eq!(reading.value, 7.0);
        assert_eq!(reading.rule, Rule::GpuLoadScan);
    }

    #[test]
    fn test_rules_survive_bare_tree() {
        let root = node(serde_json::json!({
            "Children": [ {}, { "Text": "Intel Core i3", "Children": [ {}, { "Text": "Load" } ] } ]
        }));
        for rules in [CPU_TEMPERATURE, GPU_TEMPERATURE, CPU_USAGE, RAM_USAGE, GPU_USAGE] {
            assert!(run(rules, &root).is_none());
        }
    }

    #[test]
    fn test_hardware_discovery_is_notified_once() {
        let root = node(tree(vec![hardware(
            "Intel Core i7-9700K",
            vec![group("Temperatures", vec![sensor("CPU Package", "55.0 °C")])],
        )]));
        let mut dedup = EventDeduplicator::new();

        cascade("CPU temperature", CPU_TEMPERATURE, &root, &mut dedup);
        let after_first = dedup.len();
        cascade("CPU temperature", CPU_TEMPERATURE, &root, &mut dedup);

        assert!(dedup.seen("hw:cpu:Sensor/Intel Core i7-9700K"));
        assert_eq!(dedup.len(), after_first);
    }
}
