//! First-fit resource matcher.
//!
//! Given a task's declared requirement and a freshly collected snapshot,
//! pick the first node that satisfies it. No priorities, no bin-packing:
//! this is a single-provider cluster, first fit is the contract.
//!
//! Occupancy is recomputed from running workloads on every call, with no
//! reservation between the match decision and the actual placement;
//! under heavy concurrent admission two tasks can race onto the same
//! "free" GPU unit. Acceptable for the admission volumes this agent
//! sees.

use thiserror::Error;

use cpnet_common::{
    normalize_gpu_name, CpuArch, ResourceAmounts, ResourceClass, ResourceRequirement,
};

use crate::snapshot::NodeSnapshot;

/// Workload limits are this multiple of requests, to absorb burst usage
/// without starving co-located workloads. GPUs get no burst multiplier.
const LIMIT_MULTIPLIER: u64 = 2;

/// Task images per architecture and resource class.
pub const TASK_IMAGE_AMD_CPU: &str = "cpnet/ubi-bench-cpu-amd:v1.0";
pub const TASK_IMAGE_AMD_GPU: &str = "cpnet/ubi-bench-gpu-amd:v1.0";
pub const TASK_IMAGE_INTEL_CPU: &str = "cpnet/ubi-bench-cpu-intel:v1.0";
pub const TASK_IMAGE_INTEL_GPU: &str = "cpnet/ubi-bench-gpu-intel:v1.0";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    /// No node satisfies the requirement. The caller marks the task
    /// ResourceCheckFailed and must not retry against the same snapshot.
    #[error("no node satisfies the resource requirement")]
    NoFit,
}

/// A successful match: where to place and what quantities to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub node_name: String,
    pub architecture: CpuArch,
    pub requests: ResourceAmounts,
    pub limits: ResourceAmounts,
    pub gpu_request: u64,
    pub gpu_limit: u64,
    /// Node-selector label for pinned-GPU placements.
    pub gpu_selector: Option<String>,
}

/// Select the first node satisfying `requirement`.
pub fn match_task(
    snapshot: &[NodeSnapshot],
    requirement: &ResourceRequirement,
) -> Result<Placement, MatchError> {
    let pinned = requirement.gpu_model.as_deref().map(normalize_gpu_name);

    for node in snapshot {
        if !requirement.amounts.fits_within(&node.free) {
            continue;
        }
        if requirement.class == ResourceClass::Gpu {
            match &pinned {
                Some(product) => {
                    if node.available_gpu_count(product) == 0 {
                        continue;
                    }
                }
                // Unpinned GPU requirements accept any node that
                // satisfies the scalar constraints.
                None => {}
            }
        }

        let gpu_request = match requirement.class {
            ResourceClass::CpuOnly => 0,
            ResourceClass::Gpu => requirement.gpu_count.max(1),
        };
        return Ok(Placement {
            node_name: node.name.clone(),
            architecture: node.architecture,
            requests: requirement.amounts,
            limits: requirement.amounts.scaled(LIMIT_MULTIPLIER),
            gpu_request,
            gpu_limit: gpu_request,
            gpu_selector: pinned.clone(),
        });
    }
    Err(MatchError::NoFit)
}

/// Task container image for an architecture/class pair.
pub fn task_image(architecture: CpuArch, class: ResourceClass) -> &'static str {
    match (architecture, class) {
        (CpuArch::Intel, ResourceClass::CpuOnly) => TASK_IMAGE_INTEL_CPU,
        (CpuArch::Intel, ResourceClass::Gpu) => TASK_IMAGE_INTEL_GPU,
        (_, ResourceClass::CpuOnly) => TASK_IMAGE_AMD_CPU,
        (_, ResourceClass::Gpu) => TASK_IMAGE_AMD_GPU,
    }
}
