//! Node capacity model and resource quantity normalization.
//!
//! All quantity strings coming from the platform (`500m`, `2Gi`, ...) are
//! converted here, at the boundary, into the canonical pair of whole CPU
//! cores and mebibytes of memory. Placement code never sees raw quantity
//! strings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::error::SchedulerError;

/// A normalized resource vector: CPU in whole cores, memory in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceVec {
    /// CPU in whole cores (fractions allowed).
    pub cpu: f64,
    /// Memory in mebibytes.
    pub memory: f64,
}

impl ResourceVec {
    /// Creates a vector from its components.
    pub const fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    /// Componentwise `self <= other`.
    pub fn fits_within(&self, other: &ResourceVec) -> bool {
        self.cpu <= other.cpu && self.memory <= other.memory
    }

    /// Componentwise subtraction, clamped at zero.
    pub fn saturating_sub(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: (self.memory - other.memory).max(0.0),
        }
    }

    /// Componentwise addition.
    pub fn add(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
        }
    }
}

impl fmt::Display for ResourceVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} memory={}",
            format_cpu(self.cpu),
            format_memory(self.memory)
        )
    }
}

/// Splits a quantity string into its numeric value and unit suffix.
fn split_quantity(input: &str) -> Result<(f64, &str), SchedulerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::Quantity {
            value: input.to_string(),
            reason: "empty quantity".into(),
        });
    }

    let split_at = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split_at);

    let value: f64 = number.parse().map_err(|_| SchedulerError::Quantity {
        value: input.to_string(),
        reason: "invalid numeric part".into(),
    })?;
    if value < 0.0 {
        return Err(SchedulerError::Quantity {
            value: input.to_string(),
            reason: "negative quantity".into(),
        });
    }

    Ok((value, suffix))
}

/// Converts a CPU quantity string to whole cores.
pub fn parse_cpu(input: &str) -> Result<f64, SchedulerError> {
    let (value, suffix) = split_quantity(input)?;
    match suffix {
        "" => Ok(value),
        "n" => Ok(value / 1_000_000_000.0),
        "m" => Ok(value / 1000.0),
        other => Err(SchedulerError::Quantity {
            value: input.to_string(),
            reason: format!("unknown CPU suffix '{other}'"),
        }),
    }
}

/// Converts a memory quantity string to mebibytes.
pub fn parse_memory(input: &str) -> Result<f64, SchedulerError> {
    let (value, suffix) = split_quantity(input)?;
    match suffix {
        "" => Ok(value / (1024.0 * 1024.0)),
        "Ki" => Ok(value / 1024.0),
        "Mi" => Ok(value),
        "Gi" => Ok(value * 1024.0),
        "Ti" => Ok(value * 1024.0 * 1024.0),
        other => Err(SchedulerError::Quantity {
            value: input.to_string(),
            reason: format!("unknown memory suffix '{other}'"),
        }),
    }
}

/// Formats a core count in its canonical (suffix-free) form.
pub fn format_cpu(cores: f64) -> String {
    format!("{cores}")
}

/// Formats a MiB amount in its canonical `Mi` form.
pub fn format_memory(mebibytes: f64) -> String {
    format!("{mebibytes}Mi")
}

fn cpu_from_value(value: &Value) -> Result<f64, SchedulerError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| SchedulerError::Quantity {
            value: value.to_string(),
            reason: "non-finite number".into(),
        }),
        Value::String(s) => parse_cpu(s),
        other => Err(SchedulerError::Quantity {
            value: other.to_string(),
            reason: "expected a number or quantity string".into(),
        }),
    }
}

fn memory_from_value(value: &Value) -> Result<f64, SchedulerError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| SchedulerError::Quantity {
            value: value.to_string(),
            reason: "non-finite number".into(),
        }),
        Value::String(s) => parse_memory(s),
        other => Err(SchedulerError::Quantity {
            value: other.to_string(),
            reason: "expected a number or quantity string".into(),
        }),
    }
}

fn de_cpu<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    cpu_from_value(&value).map_err(serde::de::Error::custom)
}

fn de_memory<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    memory_from_value(&value).map_err(serde::de::Error::custom)
}

/// One capacity/usage vector as reported by the platform.
///
/// Unknown fields are preserved for forward compatibility.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeResources {
    /// CPU, normalized to whole cores.
    #[serde(deserialize_with = "de_cpu")]
    pub cpu: f64,
    /// Memory, normalized to MiB.
    #[serde(deserialize_with = "de_memory")]
    pub memory: f64,
    /// Fields this service does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NodeResources {
    /// The normalized `(cpu, memory)` pair.
    pub fn vector(&self) -> ResourceVec {
        ResourceVec::new(self.cpu, self.memory)
    }
}

/// One execution host as reported by the platform inventory.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    /// Unique node name.
    pub name: String,
    /// Opaque stable identifier assigned by the platform.
    #[serde(default)]
    pub id: Option<String>,
    /// Observed consumption.
    pub usage: NodeResources,
    /// Physical capacity.
    pub capacity: NodeResources,
    /// Capacity available to workloads.
    pub allocatable: NodeResources,
    /// Per-hosted-rigid-workload slack vectors, keyed by `namespace;name`.
    ///
    /// The shape varies across platform versions, so entries are kept raw
    /// and validated lazily in [`Node::slack_entries`].
    #[serde(default)]
    pub slack: Option<serde_json::Map<String, Value>>,
    /// Fields this service does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Node {
    /// Free capacity: `allocatable − usage`, clamped at zero.
    pub fn available(&self) -> ResourceVec {
        self.allocatable.vector().saturating_sub(&self.usage.vector())
    }

    /// Parses the raw slack mapping, skipping malformed entries.
    pub fn slack_entries(&self) -> Vec<(String, ResourceVec)> {
        let Some(slack) = &self.slack else {
            return Vec::new();
        };

        let mut entries = Vec::with_capacity(slack.len());
        for (pod_key, raw) in slack {
            let cpu = raw.get("cpu").map(cpu_from_value);
            let memory = raw.get("memory").map(memory_from_value);
            match (cpu, memory) {
                (Some(Ok(cpu)), Some(Ok(memory))) => {
                    entries.push((pod_key.clone(), ResourceVec::new(cpu, memory)));
                }
                _ => {
                    warn!(node = %self.name, pod_key = %pod_key, "Skipping malformed slack entry");
                }
            }
        }
        entries
    }

    /// Checks `0 ≤ usage ≤ allocatable ≤ capacity` componentwise.
    ///
    /// Violations are logged; the node remains admissible either way.
    pub fn check_invariants(&self) -> bool {
        let usage = self.usage.vector();
        let allocatable = self.allocatable.vector();
        let capacity = self.capacity.vector();

        let ok = usage.cpu >= 0.0
            && usage.memory >= 0.0
            && usage.fits_within(&allocatable)
            && allocatable.fits_within(&capacity);
        if !ok {
            warn!(
                node = %self.name,
                usage = %usage,
                allocatable = %allocatable,
                capacity = %capacity,
                "Node reports inconsistent capacity figures"
            );
        }
        ok
    }
}

/// Parses a platform node array, skipping elements that fail to decode.
pub fn nodes_from_json(items: Vec<Value>) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Node>(item) {
            Ok(node) => nodes.push(node),
            Err(err) => warn!(error = %err, "Skipping undecodable node entry"),
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cpu_parsing_covers_all_suffixes() {
        assert!((parse_cpu("2").unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((parse_cpu("0.5").unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((parse_cpu("1500m").unwrap() - 1.5).abs() < f64::EPSILON);
        assert!((parse_cpu("250000000n").unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn memory_parsing_covers_all_suffixes() {
        assert!((parse_memory("512Mi").unwrap() - 512.0).abs() < f64::EPSILON);
        assert!((parse_memory("2048Ki").unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((parse_memory("2Gi").unwrap() - 2048.0).abs() < f64::EPSILON);
        assert!((parse_memory("1Ti").unwrap() - 1_048_576.0).abs() < f64::EPSILON);
        // bare bytes
        assert!((parse_memory("1048576").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_suffixes_fail_the_field() {
        assert!(parse_cpu("5Ki").is_err());
        assert!(parse_cpu("3cores").is_err());
        assert!(parse_memory("5q").is_err());
        assert!(parse_memory("").is_err());
    }

    #[test]
    fn canonical_forms_round_trip() {
        for cores in [0.0, 0.25, 1.0, 2.5, 16.0] {
            assert!((parse_cpu(&format_cpu(cores)).unwrap() - cores).abs() < f64::EPSILON);
        }
        for mib in [0.0, 128.0, 512.5, 4096.0] {
            assert!((parse_memory(&format_memory(mib)).unwrap() - mib).abs() < f64::EPSILON);
        }
    }

    fn node_from(value: Value) -> Node {
        serde_json::from_value(value).expect("node decodes")
    }

    #[test]
    fn node_decodes_from_platform_shape() {
        let node = node_from(json!({
            "name": "worker-1",
            "id": "node-abc",
            "usage": {"cpu": "250m", "memory": "1Gi"},
            "capacity": {"cpu": "4", "memory": "8Gi"},
            "allocatable": {"cpu": "4", "memory": "7Gi"},
            "zone": "edge-a"
        }));

        assert!((node.usage.cpu - 0.25).abs() < f64::EPSILON);
        assert!((node.usage.memory - 1024.0).abs() < f64::EPSILON);
        assert_eq!(node.id.as_deref(), Some("node-abc"));
        assert!(node.extra.contains_key("zone"));
        assert!(node.slack.is_none());
        assert!(node.check_invariants());
    }

    #[test]
    fn available_is_clamped_at_zero() {
        let node = node_from(json!({
            "name": "worker-1",
            "usage": {"cpu": "6", "memory": "1Gi"},
            "capacity": {"cpu": "4", "memory": "8Gi"},
            "allocatable": {"cpu": "4", "memory": "7Gi"}
        }));

        assert!(!node.check_invariants());
        let available = node.available();
        assert!((available.cpu - 0.0).abs() < f64::EPSILON);
        assert!((available.memory - 6144.0).abs() < f64::EPSILON);
    }

    #[test]
    fn slack_entries_skip_malformed_values() {
        let node = node_from(json!({
            "name": "worker-1",
            "usage": {"cpu": "0", "memory": "0"},
            "capacity": {"cpu": "4", "memory": "8Gi"},
            "allocatable": {"cpu": "4", "memory": "8Gi"},
            "slack": {
                "default;db-0": {"cpu": 1.5, "memory": 2048},
                "default;web-1": {"cpu": "500m", "memory": "1Gi"},
                "default;broken": {"cpu": "wat"}
            }
        }));

        let mut entries = node.slack_entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "default;db-0");
        assert_eq!(entries[0].1, ResourceVec::new(1.5, 2048.0));
        assert_eq!(entries[1].1, ResourceVec::new(0.5, 1024.0));
    }

    #[test]
    fn node_array_parsing_drops_bad_elements() {
        let nodes = nodes_from_json(vec![
            json!({
                "name": "ok",
                "usage": {"cpu": "0", "memory": "0"},
                "capacity": {"cpu": "1", "memory": "1Gi"},
                "allocatable": {"cpu": "1", "memory": "1Gi"}
            }),
            json!({"name": "missing-everything"}),
        ]);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "ok");
    }
}
