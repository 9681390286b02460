//! Shared types for the cpnet computing-provider agent.
//!
//! | Module      | Description                                              |
//! |-------------|----------------------------------------------------------|
//! | `config`    | Typed TOML configuration with environment overrides      |
//! | `status`    | Closed task/job/reward status enumerations               |
//! | `resources` | Resource quantities, requirements and GPU inventory      |
//! | `error`     | Admission error codes surfaced to callers                |

pub mod config;
pub mod error;
pub mod resources;
pub mod status;

pub use config::{AgentConfig, ChainConfig, HubConfig, LoopIntervals};
pub use error::AdmissionError;
pub use resources::{
    format_quantity, normalize_gpu_name, parse_quantity, CpuArch, GpuStatus, GpuUnit,
    ResourceAmounts, ResourceClass, ResourceRequirement,
};
pub use status::{JobStatus, RewardState, TaskStatus};

/// Name prefixes for orchestration objects created by this agent.
///
/// Every object the agent creates is prefixed so that the reconciliation
/// loops can tell agent-owned resources from foreign ones.
pub mod prefix {
    /// Namespace owned by a tenant wallet.
    pub const NAMESPACE: &str = "ns-";
    /// Namespace owned by a one-shot proof task.
    pub const TASK_NAMESPACE: &str = "ubi-task-";
    /// Workload (deployment) objects.
    pub const DEPLOY: &str = "deploy-";
    /// Exposed service objects.
    pub const SERVICE: &str = "svc-";
    /// Container names.
    pub const CONTAINER: &str = "pod-";
    /// Metadata key-value store records, one per placed job.
    pub const META_SPACE: &str = "cp:space:";
}
