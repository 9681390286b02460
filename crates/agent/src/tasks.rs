//! Proof-task lifecycle.
//!
//! Admission validates the request and the engine signature, persists
//! the task, asks the matcher for a target and instantiates the
//! workload; the proof callback submits on-chain and drives the task to
//! its terminal status. Every transition persists the entity. At most
//! one placement attempt per admitted request: any backend failure marks
//! the task Failed, the hub re-submits if it wants a retry.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Signature};
use serde::Deserialize;
use tracing::{info, warn};

use cpnet_common::{
    parse_quantity, prefix, AdmissionError, ResourceClass, ResourceRequirement, TaskStatus,
};
use cpnet_settlement::SettlementClient;

use crate::entity::TaskEntity;
use crate::matcher::{self, MatchError, Placement};
use crate::orchestrator::{Orchestrator, WorkloadSpec};
use crate::snapshot::SnapshotProvider;
use crate::store::TaskStore;

/// Declared resources of an inbound task request.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResource {
    /// Whole cores.
    pub cpu: u64,
    /// Quantity string, e.g. "16Gi" or "16.0 GiB".
    pub memory: String,
    pub storage: String,
    #[serde(default)]
    pub gpu_model: String,
    #[serde(default)]
    pub gpu: u64,
}

/// Inbound proof-task admission request.
#[derive(Debug, Clone, Deserialize)]
pub struct UbiTaskRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zk_type: String,
    #[serde(default)]
    pub input_param: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub contract_addr: String,
    #[serde(default)]
    pub resource_type: u8,
    pub resource: TaskResource,
}

#[derive(Debug, Clone)]
pub struct TaskServiceConfig {
    /// This agent's node id; the admission signature covers it.
    pub node_id: String,
    /// Address whose personal-sign signature authorizes admission.
    pub engine_address: Option<Address>,
    /// Externally reachable base URL for the proof callback.
    pub public_url: String,
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    orchestrator: Arc<dyn Orchestrator>,
    snapshots: Arc<SnapshotProvider>,
    settlement: Arc<SettlementClient>,
    config: TaskServiceConfig,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        orchestrator: Arc<dyn Orchestrator>,
        snapshots: Arc<SnapshotProvider>,
        settlement: Arc<SettlementClient>,
        config: TaskServiceConfig,
    ) -> Self {
        Self { store, orchestrator, snapshots, settlement, config }
    }

    /// Namespace a task's backend resources live in.
    pub fn task_namespace(task_id: i64) -> String {
        format!("{}{}", prefix::TASK_NAMESPACE, task_id)
    }

    /// Admit a proof task: validate, persist, match, place.
    ///
    /// Validation and signature failures reject synchronously before
    /// anything is persisted. A NoFit persists the task as
    /// ResourceCheckFailed; placement failures persist it as Failed.
    pub async fn admit(&self, req: &UbiTaskRequest) -> Result<TaskEntity, AdmissionError> {
        validate_request(req)?;
        self.verify_signature(req)?;

        let class = ResourceClass::from_wire(req.resource_type)
            .ok_or(AdmissionError::InvalidField {
                field: "resource_type",
                reason: "the value of resource_type is 0 or 1".to_string(),
            })?;
        let now = chrono::Utc::now().timestamp();
        let mut task = TaskEntity::new(
            req.id,
            req.name.clone(),
            req.zk_type.clone(),
            req.contract_addr.clone(),
            class,
            req.input_param.clone(),
            now,
        );
        self.save(&task);

        let requirement = match build_requirement(&req.resource, class) {
            Ok(requirement) => requirement,
            Err(err) => {
                self.fail(&mut task, TaskStatus::Failed);
                return Err(err);
            }
        };

        let snapshot = match self.snapshots.collect().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(task_id = task.id, %err, "snapshot collection failed");
                self.fail(&mut task, TaskStatus::Failed);
                return Err(AdmissionError::Internal(err.to_string()));
            }
        };

        let placement = match matcher::match_task(&snapshot, &requirement) {
            Ok(placement) => placement,
            Err(MatchError::NoFit) => {
                warn!(task_id = task.id, "no node satisfies the task requirement");
                self.fail(&mut task, TaskStatus::ResourceCheckFailed);
                return Err(AdmissionError::ResourcesUnavailable);
            }
        };

        info!(
            task_id = task.id,
            node = %placement.node_name,
            arch = %placement.architecture,
            "task matched"
        );
        self.place(&mut task, &placement).await?;
        Ok(task)
    }

    /// Proof callback: drive the task through Success to Submitted,
    /// attempting on-chain submission along the way. The task is
    /// persisted with whatever transaction hash (possibly empty)
    /// resulted, and its namespace is torn down.
    pub async fn receive_proof(
        &self,
        task_id: i64,
        proof: &str,
    ) -> Result<TaskEntity, AdmissionError> {
        let mut task = self
            .store
            .get(task_id)
            .map_err(|e| AdmissionError::Internal(e.to_string()))?
            .ok_or(AdmissionError::InvalidField {
                field: "task_id",
                reason: format!("unknown task {task_id}"),
            })?;

        if !task.status.can_transition_to(TaskStatus::Success) {
            return Err(AdmissionError::Internal(format!(
                "task {} is {}, not expecting a proof",
                task.id, task.status
            )));
        }
        task.status = TaskStatus::Success;
        self.save(&task);

        match Address::from_str(&task.contract_address) {
            Ok(contract) => match self.settlement.submit_proof(contract, proof).await {
                Ok(tx_hash) => {
                    task.tx_hash = tx_hash.to_string();
                    info!(task_id = task.id, tx_hash = %task.tx_hash, "proof submitted");
                }
                Err(err) => {
                    warn!(task_id = task.id, %err, "proof submission failed");
                }
            },
            Err(err) => {
                warn!(task_id = task.id, %err, "bad settlement contract address");
            }
        }

        task.status = TaskStatus::Submitted;
        task.end_time = Some(chrono::Utc::now().timestamp());
        self.save(&task);

        let namespace = Self::task_namespace(task.id);
        if let Err(err) = self.orchestrator.delete_namespace(&namespace).await {
            warn!(task_id = task.id, %err, "task namespace teardown failed");
        }
        Ok(task)
    }

    /// Task listing for the inspection API.
    pub fn list(
        &self,
        statuses: &[TaskStatus],
        limit: Option<usize>,
    ) -> Vec<TaskEntity> {
        self.store.list(statuses, limit).unwrap_or_default()
    }

    async fn place(
        &self,
        task: &mut TaskEntity,
        placement: &Placement,
    ) -> Result<(), AdmissionError> {
        let namespace = Self::task_namespace(task.id);
        if let Err(err) = self.orchestrator.ensure_namespace(&namespace).await {
            warn!(task_id = task.id, %err, "namespace creation failed");
            self.fail(task, TaskStatus::Failed);
            return Err(AdmissionError::Internal(err.to_string()));
        }

        let workload_name = format!("{}-{}", task.zk_type.to_lowercase(), task.id);
        let receive_url =
            format!("{}/api/v1/computing/cp/receive/ubi", self.config.public_url);
        let spec = WorkloadSpec {
            namespace: namespace.clone(),
            name: workload_name,
            image: matcher::task_image(placement.architecture, task.class).to_string(),
            node_name: placement.node_name.clone(),
            node_selector: placement.gpu_selector.clone(),
            command: vec!["ubi-bench".to_string(), "c2".to_string()],
            env: vec![
                ("RECEIVE_PROOF_URL".to_string(), receive_url),
                ("TASKID".to_string(), task.id.to_string()),
                ("NAME_SPACE".to_string(), namespace.clone()),
                ("PARAM_URL".to_string(), task.input_param.clone()),
            ],
            requests: placement.requests,
            limits: placement.limits,
            gpu_request: placement.gpu_request,
            gpu_limit: placement.gpu_limit,
            label: ("ubi-task".to_string(), task.id.to_string()),
        };

        match self.orchestrator.create_workload(&spec).await {
            Ok(()) => {
                task.status = TaskStatus::Running;
                self.save(task);
                Ok(())
            }
            Err(err) => {
                warn!(task_id = task.id, %err, "workload creation failed");
                self.fail(task, TaskStatus::Failed);
                if let Err(cleanup_err) = self.orchestrator.delete_namespace(&namespace).await {
                    warn!(task_id = task.id, %cleanup_err, "namespace cleanup failed");
                }
                Err(AdmissionError::Internal(err.to_string()))
            }
        }
    }

    fn verify_signature(&self, req: &UbiTaskRequest) -> Result<(), AdmissionError> {
        let engine = self
            .config
            .engine_address
            .ok_or_else(|| AdmissionError::Internal("engine address not configured".into()))?;
        let message = format!("{}{}", self.config.node_id, req.contract_addr);
        let verified = verify_personal_signature(engine, &message, &req.signature)?;
        if !verified {
            return Err(AdmissionError::SignatureVerification);
        }
        Ok(())
    }

    fn fail(&self, task: &mut TaskEntity, status: TaskStatus) {
        task.status = status;
        task.end_time = Some(chrono::Utc::now().timestamp());
        self.save(task);
    }

    fn save(&self, task: &TaskEntity) {
        if let Err(err) = self.store.save(task.clone()) {
            warn!(task_id = task.id, %err, "task persistence failed");
        }
    }
}

fn validate_request(req: &UbiTaskRequest) -> Result<(), AdmissionError> {
    if req.id == 0 {
        return Err(AdmissionError::MissingField("id"));
    }
    if req.name.trim().is_empty() {
        return Err(AdmissionError::MissingField("name"));
    }
    if req.zk_type.trim().is_empty() {
        return Err(AdmissionError::MissingField("zk_type"));
    }
    if req.input_param.trim().is_empty() {
        return Err(AdmissionError::MissingField("input_param"));
    }
    if req.signature.trim().is_empty() {
        return Err(AdmissionError::MissingField("signature"));
    }
    if req.contract_addr.trim().is_empty() {
        return Err(AdmissionError::MissingField("contract_addr"));
    }
    Ok(())
}

fn build_requirement(
    resource: &TaskResource,
    class: ResourceClass,
) -> Result<ResourceRequirement, AdmissionError> {
    let memory = parse_quantity(&resource.memory).ok_or(AdmissionError::InvalidField {
        field: "resource.memory",
        reason: format!("unparseable quantity {:?}", resource.memory),
    })?;
    let storage = parse_quantity(&resource.storage).ok_or(AdmissionError::InvalidField {
        field: "resource.storage",
        reason: format!("unparseable quantity {:?}", resource.storage),
    })?;
    let amounts = cpnet_common::ResourceAmounts::new(resource.cpu, memory, storage);
    Ok(match class {
        ResourceClass::CpuOnly => ResourceRequirement::cpu_only(amounts),
        ResourceClass::Gpu => {
            let model = if resource.gpu_model.trim().is_empty() {
                None
            } else {
                Some(resource.gpu_model.clone())
            };
            ResourceRequirement::gpu(amounts, model, resource.gpu.max(1))
        }
    })
}

/// Recover the EIP-191 personal-sign address of `signature` over
/// `message` and compare it to `expected`.
fn verify_personal_signature(
    expected: Address,
    message: &str,
    signature_hex: &str,
) -> Result<bool, AdmissionError> {
    let raw = hex::decode(signature_hex.trim_start_matches("0x")).map_err(|_| {
        AdmissionError::InvalidField {
            field: "signature",
            reason: "not valid hex".to_string(),
        }
    })?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|e| AdmissionError::InvalidField {
            field: "signature",
            reason: e.to_string(),
        })?;
    let recovered = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|_| AdmissionError::SignatureVerification)?;
    Ok(recovered == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use cpnet_common::RewardState;
    use cpnet_settlement::{MockTaskChain, SettlementIdentity};

    use crate::orchestrator::{MockOrchestrator, PodPhase};
    use crate::store::MemTaskStore;

    const GI: u64 = 1024 * 1024 * 1024;
    const NODE_ID: &str = "node-0xid";

    const EXPORTER_REPORT: &str = r#"{"cpu_name":"AMD EPYC 7543","cpu":{"free":"30","total":"32"},"memory":{"free":"200Gi","total":"256Gi"},"storage":{"free":"900Gi","total":"1000Gi"},"gpu":{"driver_version":"535","cuda_version":"12.2","attached_gpus":1,"details":[{"product_name":"NVIDIA GeForce RTX 3080","status":"Available"}]}}"#;

    struct Fixture {
        service: TaskService,
        orchestrator: Arc<MockOrchestrator>,
        store: Arc<MemTaskStore>,
        chain: Arc<MockTaskChain>,
        signer: PrivateKeySigner,
    }

    fn fixture() -> Fixture {
        let orchestrator = Arc::new(MockOrchestrator::new());
        orchestrator.add_node("node-a", cpnet_common::ResourceAmounts::new(32, 256 * GI, 1000 * GI));
        orchestrator.add_pod(
            "kube-system",
            "exporter-a",
            "node-a",
            PodPhase::Running,
            &[("app", "resource-exporter")],
            EXPORTER_REPORT,
        );

        let store = Arc::new(MemTaskStore::new());
        let chain = Arc::new(MockTaskChain::new());
        let signer = PrivateKeySigner::random();
        let settlement = Arc::new(SettlementClient::new(
            chain.clone(),
            Arc::new(SettlementIdentity::new(Address::repeat_byte(0x33))),
        ));
        let service = TaskService::new(
            store.clone(),
            orchestrator.clone(),
            Arc::new(SnapshotProvider::new(orchestrator.clone())),
            settlement,
            TaskServiceConfig {
                node_id: NODE_ID.to_string(),
                engine_address: Some(signer.address()),
                public_url: "http://10.0.0.5:8085".to_string(),
            },
        );
        Fixture { service, orchestrator, store, chain, signer }
    }

    fn signed_request(fx: &Fixture, id: i64) -> UbiTaskRequest {
        let contract = format!("{}", Address::repeat_byte(0xCE));
        let message = format!("{NODE_ID}{contract}");
        let signature = fx.signer.sign_message_sync(message.as_bytes()).expect("sign");
        UbiTaskRequest {
            id,
            name: format!("task-{id}"),
            zk_type: "fil-c2-512M".to_string(),
            input_param: "https://params.example/input".to_string(),
            signature: hex::encode(signature.as_bytes()),
            contract_addr: contract,
            resource_type: 0,
            resource: TaskResource {
                cpu: 4,
                memory: "8Gi".to_string(),
                storage: "20Gi".to_string(),
                gpu_model: String::new(),
                gpu: 0,
            },
        }
    }

    #[tokio::test]
    async fn admission_places_the_workload_and_runs() {
        let fx = fixture();
        let req = signed_request(&fx, 7);

        let task = fx.service.admit(&req).await.expect("admit");
        assert_eq!(task.status, TaskStatus::Running);

        let spec = fx
            .orchestrator
            .workload("ubi-task-7", "fil-c2-512m-7")
            .expect("workload created");
        assert_eq!(spec.image, matcher::TASK_IMAGE_AMD_CPU);
        assert_eq!(spec.node_name, "node-a");
        assert_eq!(spec.limits, cpnet_common::ResourceAmounts::new(8, 16 * GI, 40 * GI));
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "RECEIVE_PROOF_URL" && v.contains("/cp/receive/ubi")));
        assert!(spec.env.iter().any(|(k, v)| k == "TASKID" && v == "7"));
    }

    #[tokio::test]
    async fn proof_receipt_submits_and_finishes() {
        let fx = fixture();
        fx.chain.push_submit_outcome(Ok(B256::repeat_byte(0xAB)));
        fx.service.admit(&signed_request(&fx, 9)).await.expect("admit");

        let task = fx.service.receive_proof(9, "proof-bytes").await.expect("proof");
        assert_eq!(task.status, TaskStatus::Submitted);
        assert!(!task.tx_hash.is_empty());
        assert!(task.end_time.is_some());
        assert_eq!(task.reward_state, RewardState::Unclaimed);
        assert!(fx
            .orchestrator
            .deleted_namespaces()
            .contains(&"ubi-task-9".to_string()));
    }

    #[tokio::test]
    async fn submission_failure_still_reaches_submitted_with_empty_hash() {
        let fx = fixture();
        // No scripted outcome: the mock chain errors.
        fx.service.admit(&signed_request(&fx, 10)).await.expect("admit");

        let task = fx.service.receive_proof(10, "proof").await.expect("proof");
        assert_eq!(task.status, TaskStatus::Submitted);
        assert!(task.tx_hash.is_empty());
    }

    #[tokio::test]
    async fn a_second_proof_is_rejected_and_nothing_changes() {
        let fx = fixture();
        fx.chain.push_submit_outcome(Ok(B256::repeat_byte(1)));
        fx.service.admit(&signed_request(&fx, 11)).await.expect("admit");
        let first = fx.service.receive_proof(11, "proof").await.expect("proof");

        let err = fx.service.receive_proof(11, "proof-again").await.unwrap_err();
        assert!(matches!(err, AdmissionError::Internal(_)));
        let stored = fx.store.get(11).unwrap().expect("task");
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn no_fit_marks_resource_check_failed() {
        let fx = fixture();
        let mut req = signed_request(&fx, 12);
        req.resource.cpu = 512;

        let err = fx.service.admit(&req).await.unwrap_err();
        assert_eq!(err, AdmissionError::ResourcesUnavailable);

        let task = fx.store.get(12).unwrap().expect("persisted");
        assert_eq!(task.status, TaskStatus::ResourceCheckFailed);
        assert!(task.end_time.is_some());
    }

    #[tokio::test]
    async fn gpu_task_without_available_model_is_unschedulable() {
        let fx = fixture();
        let mut req = signed_request(&fx, 13);
        req.resource_type = 1;
        req.resource.gpu_model = "NVIDIA A100 80GB".to_string();
        req.resource.gpu = 1;

        let err = fx.service.admit(&req).await.unwrap_err();
        assert_eq!(err, AdmissionError::ResourcesUnavailable);
    }

    #[tokio::test]
    async fn bad_signature_rejects_before_persistence() {
        let fx = fixture();
        let mut req = signed_request(&fx, 14);
        let other = PrivateKeySigner::random();
        let message = format!("{NODE_ID}{}", req.contract_addr);
        req.signature = hex::encode(
            other.sign_message_sync(message.as_bytes()).unwrap().as_bytes(),
        );

        let err = fx.service.admit(&req).await.unwrap_err();
        assert_eq!(err, AdmissionError::SignatureVerification);
        assert!(fx.store.get(14).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_fields_reject_synchronously() {
        let fx = fixture();
        let mut req = signed_request(&fx, 15);
        req.name = String::new();
        assert_eq!(
            fx.service.admit(&req).await.unwrap_err(),
            AdmissionError::MissingField("name")
        );

        let mut req = signed_request(&fx, 0);
        req.id = 0;
        assert_eq!(
            fx.service.admit(&req).await.unwrap_err(),
            AdmissionError::MissingField("id")
        );
    }

    #[tokio::test]
    async fn backend_failure_marks_failed_and_cleans_up() {
        let fx = fixture();
        fx.orchestrator.fail_next_create();
        let err = fx.service.admit(&signed_request(&fx, 16)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Internal(_)));

        let task = fx.store.get(16).unwrap().expect("persisted");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(fx
            .orchestrator
            .deleted_namespaces()
            .contains(&"ubi-task-16".to_string()));
    }

    #[test]
    fn personal_signature_round_trip() {
        let signer = PrivateKeySigner::random();
        let signature = signer.sign_message_sync(b"node-1-0xcontract").unwrap();
        let hex_sig = hex::encode(signature.as_bytes());

        assert!(verify_personal_signature(signer.address(), "node-1-0xcontract", &hex_sig)
            .unwrap());
        assert!(!verify_personal_signature(
            Address::repeat_byte(9),
            "node-1-0xcontract",
            &hex_sig
        )
        .unwrap());
        assert!(verify_personal_signature(signer.address(), "tampered", &hex_sig)
            .map(|ok| !ok)
            .unwrap_or(true));
    }
}
