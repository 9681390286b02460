//! Resource quantities, requirements and GPU inventory types.
//!
//! Quantities arrive from callers and from the hardware exporter as
//! strings ("16Gi", "20.0 GiB", "100"); everything past the parsing
//! boundary works in whole cores and bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

const KI: u64 = 1024;
const MI: u64 = KI * 1024;
const GI: u64 = MI * 1024;
const TI: u64 = GI * 1024;

/// Parse a byte quantity string.
///
/// Accepts the exporter/caller forms: a bare number (bytes), binary
/// suffixes with or without a trailing `B` ("8Gi", "8GiB", "512 MiB"),
/// and decimal values ("20.5 GiB"). Returns `None` on anything else;
/// exporter output is untrusted and malformed values are skipped by the
/// caller.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let unit = unit.trim().trim_end_matches(['B', 'b']);
    let scale = match unit {
        "" => 1,
        "Ki" | "K" | "k" => KI,
        "Mi" | "M" => MI,
        "Gi" | "G" => GI,
        "Ti" | "T" => TI,
        _ => return None,
    };
    Some((value * scale as f64) as u64)
}

/// Render a byte count in the largest exact binary unit.
pub fn format_quantity(bytes: u64) -> String {
    for (scale, suffix) in [(TI, "Ti"), (GI, "Gi"), (MI, "Mi"), (KI, "Ki")] {
        if bytes >= scale && bytes % scale == 0 {
            return format!("{}{}", bytes / scale, suffix);
        }
    }
    bytes.to_string()
}

/// CPU architecture class of a node, derived from the exporter-reported
/// CPU name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CpuArch {
    Amd,
    Intel,
    Other,
}

impl CpuArch {
    /// Classify an exporter-reported CPU product name.
    pub fn from_cpu_name(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.contains("AMD") {
            CpuArch::Amd
        } else if upper.contains("INTEL") {
            CpuArch::Intel
        } else {
            CpuArch::Other
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArch::Amd => f.write_str("AMD"),
            CpuArch::Intel => f.write_str("INTEL"),
            CpuArch::Other => f.write_str("OTHER"),
        }
    }
}

/// Whether a task needs a GPU at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    CpuOnly,
    Gpu,
}

impl ResourceClass {
    /// Wire encoding used by the admission API: 0 = CPU, 1 = GPU.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResourceClass::CpuOnly),
            1 => Some(ResourceClass::Gpu),
            _ => None,
        }
    }
}

/// Availability of a single GPU unit as recomputed by the snapshot
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuStatus {
    Available,
    Occupied,
}

/// One GPU unit in a node's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUnit {
    pub product_name: String,
    pub status: GpuStatus,
    pub driver_version: String,
    pub cuda_version: String,
}

/// Scalar cpu/memory/storage amounts, in cores and bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAmounts {
    pub cpu_cores: u64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

impl ResourceAmounts {
    pub fn new(cpu_cores: u64, memory_bytes: u64, storage_bytes: u64) -> Self {
        Self { cpu_cores, memory_bytes, storage_bytes }
    }

    /// Component-wise `self <= other`.
    pub fn fits_within(&self, other: &ResourceAmounts) -> bool {
        self.cpu_cores <= other.cpu_cores
            && self.memory_bytes <= other.memory_bytes
            && self.storage_bytes <= other.storage_bytes
    }

    /// Component-wise saturating subtraction.
    pub fn saturating_sub(&self, other: &ResourceAmounts) -> ResourceAmounts {
        ResourceAmounts {
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            storage_bytes: self.storage_bytes.saturating_sub(other.storage_bytes),
        }
    }

    /// Component-wise saturating addition.
    pub fn saturating_add(&self, other: &ResourceAmounts) -> ResourceAmounts {
        ResourceAmounts {
            cpu_cores: self.cpu_cores.saturating_add(other.cpu_cores),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            storage_bytes: self.storage_bytes.saturating_add(other.storage_bytes),
        }
    }

    /// Scale every component, saturating on overflow.
    pub fn scaled(&self, factor: u64) -> ResourceAmounts {
        ResourceAmounts {
            cpu_cores: self.cpu_cores.saturating_mul(factor),
            memory_bytes: self.memory_bytes.saturating_mul(factor),
            storage_bytes: self.storage_bytes.saturating_mul(factor),
        }
    }
}

/// A task's declared resource requirement, as handed to the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub amounts: ResourceAmounts,
    pub class: ResourceClass,
    /// Pinned GPU product name. `None` for an unpinned GPU requirement
    /// (any node satisfying the scalar constraints is accepted).
    pub gpu_model: Option<String>,
    /// Number of GPU units requested. Zero for CPU-only tasks.
    pub gpu_count: u64,
}

impl ResourceRequirement {
    pub fn cpu_only(amounts: ResourceAmounts) -> Self {
        Self { amounts, class: ResourceClass::CpuOnly, gpu_model: None, gpu_count: 0 }
    }

    pub fn gpu(amounts: ResourceAmounts, model: Option<String>, count: u64) -> Self {
        Self { amounts, class: ResourceClass::Gpu, gpu_model: model, gpu_count: count }
    }
}

/// Normalize a GPU product name for comparison: uppercase, spaces
/// collapsed to dashes. The exporter, the scheduler labels and the
/// caller-pinned model all pass through this before being compared.
pub fn normalize_gpu_name(name: &str) -> String {
    name.trim().to_uppercase().replace(' ', "-")
}
