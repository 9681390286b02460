//! Hardware-exporter output parsing.
//!
//! The exporter is a co-located pod whose latest log line is one JSON
//! document describing the node's CPU name, free/total scalar resources
//! and GPU inventory. Its output is untrusted: malformed lines and lines
//! carrying the error marker are skipped, never fatal.

use serde::Deserialize;

use cpnet_common::{parse_quantity, GpuStatus};

/// Marker the exporter writes when its own collection failed.
pub const ERROR_MARKER: &str = "ERROR::";

/// Label selector of the exporter pods.
pub const EXPORTER_LABEL: &str = "app=resource-exporter";

/// Namespace the exporter daemonset runs in.
pub const EXPORTER_NAMESPACE: &str = "kube-system";

#[derive(Debug, Clone, Deserialize)]
pub struct ScalarUsage {
    pub free: String,
    pub total: String,
}

impl ScalarUsage {
    /// Free amount in bytes; malformed values read as zero free.
    pub fn free_bytes(&self) -> u64 {
        parse_quantity(&self.free).unwrap_or(0)
    }

    pub fn total_bytes(&self) -> u64 {
        parse_quantity(&self.total).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuDetail {
    pub product_name: String,
    pub status: GpuStatus,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GpuReport {
    #[serde(default)]
    pub driver_version: String,
    #[serde(default)]
    pub cuda_version: String,
    #[serde(default)]
    pub attached_gpus: u32,
    #[serde(default)]
    pub details: Vec<GpuDetail>,
}

/// One exporter report, i.e. one parsed log line.
#[derive(Debug, Clone, Deserialize)]
pub struct HardwareReport {
    pub cpu_name: String,
    pub cpu: ScalarUsage,
    pub memory: ScalarUsage,
    pub storage: ScalarUsage,
    #[serde(default)]
    pub gpu: GpuReport,
}

impl HardwareReport {
    /// Free CPU as whole cores; the exporter reports a bare count.
    pub fn free_cpu_cores(&self) -> u64 {
        self.cpu.free.trim().parse().unwrap_or(0)
    }

    pub fn total_cpu_cores(&self) -> u64 {
        self.cpu.total.trim().parse().unwrap_or(0)
    }
}

/// Parse the last non-empty line of an exporter log.
///
/// Returns `None` for empty logs, errored collections and anything that
/// is not the expected JSON document.
pub fn parse_last_line(log: &str) -> Option<HardwareReport> {
    let line = log.lines().rev().find(|l| !l.trim().is_empty())?;
    if line.contains(ERROR_MARKER) {
        return None;
    }
    serde_json::from_str(line.trim()).ok()
}
