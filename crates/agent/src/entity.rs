//! Persisted task and job entities.

use serde::{Deserialize, Serialize};

use cpnet_common::{JobStatus, ResourceClass, RewardState, TaskStatus};

/// A verifiable-compute proof task.
///
/// The id is caller-assigned and stable; exactly one active placement
/// exists per id at a time. Entities are never physically deleted, they
/// only reach a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: i64,
    pub name: String,
    /// zk-proof type tag, e.g. "fil-c2-512M".
    pub zk_type: String,
    /// Target settlement contract address (hex).
    pub contract_address: String,
    pub class: ResourceClass,
    /// Opaque input parameter URI handed to the workload.
    pub input_param: String,
    pub status: TaskStatus,
    /// Proof-submission transaction hash, possibly empty.
    pub tx_hash: String,
    pub reward_state: RewardState,
    pub reward_tx: String,
    pub challenge_tx: String,
    pub slash_tx: String,
    /// Decimal token amount, e.g. "5.0".
    pub reward_amount: String,
    pub create_time: i64,
    /// Stamped when the task reaches a terminal status.
    pub end_time: Option<i64>,
}

impl TaskEntity {
    pub fn new(
        id: i64,
        name: String,
        zk_type: String,
        contract_address: String,
        class: ResourceClass,
        input_param: String,
        create_time: i64,
    ) -> Self {
        Self {
            id,
            name,
            zk_type,
            contract_address,
            class,
            input_param,
            status: TaskStatus::Received,
            tx_hash: String::new(),
            reward_state: RewardState::Unclaimed,
            reward_tx: String::new(),
            challenge_tx: String::new(),
            slash_tx: String::new(),
            reward_amount: "0.0".to_string(),
            create_time,
            end_time: None,
        }
    }
}

/// A long-running workload deployment.
///
/// Soft-deleted (flag plus terminal status) rather than removed, to
/// preserve audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntity {
    /// Derived identifier: the caller-supplied uuid, lower-cased.
    pub job_uuid: String,
    /// The uuid exactly as the caller supplied it; status reports to the
    /// hub use this form.
    pub original_uuid: String,
    pub owner_address: String,
    pub status: JobStatus,
    /// Absolute unix timestamp after which the reaper tears the job
    /// down.
    pub expire_time: i64,
    pub image: String,
    /// Orchestration resource kind, e.g. "deployment".
    pub resource_kind: String,
    pub result_url: String,
    pub reward_amount: String,
    /// Reward-polling block cursor.
    pub scanned_block: u64,
    pub deleted: bool,
    pub create_time: i64,
}

impl JobEntity {
    pub fn new(
        original_uuid: &str,
        owner_address: String,
        image: String,
        expire_time: i64,
        create_time: i64,
    ) -> Self {
        Self {
            job_uuid: original_uuid.to_lowercase(),
            original_uuid: original_uuid.to_string(),
            owner_address,
            status: JobStatus::Received,
            expire_time,
            image,
            resource_kind: "deployment".to_string(),
            result_url: String::new(),
            reward_amount: String::new(),
            scanned_block: 0,
            deleted: false,
            create_time,
        }
    }
}

/// Per-job record kept in the metadata key-value store, consumed by the
/// expiry reaper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub wallet_address: String,
    /// External task uuid at the hub; empty if the hub never assigned
    /// one.
    pub task_uuid: String,
    /// Deployment uuid the orchestration objects are named after.
    pub space_uuid: String,
    pub expire_time: i64,
}
