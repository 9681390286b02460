//! Deployment-job lifecycle.
//!
//! A job is a long-running workload: admission matches it onto a node,
//! creates the namespace/workload/service, records an expiry metadata
//! key for the reaper, and tracks the placement in the in-flight map so
//! the status-flush loop reports each forward transition to the hub.
//!
//! Teardown is idempotent at every step: deleting an already-absent
//! resource is success, so the reaper, cancellation and failure cleanup
//! can all race without harm.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use cpnet_common::{parse_quantity, prefix, AdmissionError, JobStatus, ResourceRequirement};

use crate::entity::{JobEntity, JobMetadata};
use crate::flight::FlightTracker;
use crate::matcher::{self, MatchError};
use crate::orchestrator::{Orchestrator, PodPhase, WorkloadSpec};
use crate::snapshot::SnapshotProvider;
use crate::store::{JobStore, MetaStore};

/// Inbound deployment request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub uuid: String,
    /// External task uuid at the hub, if the hub assigned one.
    #[serde(default)]
    pub task_uuid: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub image: String,
    /// Job lifetime in seconds; expiry is absolute from admission time.
    #[serde(default)]
    pub duration: i64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub storage: String,
    #[serde(default)]
    pub gpu_model: String,
    #[serde(default)]
    pub gpu: u64,
}

fn default_port() -> u16 {
    80
}

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    meta: Arc<dyn MetaStore>,
    orchestrator: Arc<dyn Orchestrator>,
    snapshots: Arc<SnapshotProvider>,
    flight: Arc<FlightTracker>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        meta: Arc<dyn MetaStore>,
        orchestrator: Arc<dyn Orchestrator>,
        snapshots: Arc<SnapshotProvider>,
        flight: Arc<FlightTracker>,
    ) -> Self {
        Self { jobs, meta, orchestrator, snapshots, flight }
    }

    /// Namespace a tenant wallet's jobs live in.
    pub fn wallet_namespace(wallet_address: &str) -> String {
        format!("{}{}", prefix::NAMESPACE, wallet_address.to_lowercase())
    }

    fn meta_key(job_uuid: &str) -> String {
        format!("{}{}", prefix::META_SPACE, job_uuid)
    }

    /// Admit a deployment: validate, persist, match, place, record
    /// expiry metadata. One placement attempt; any backend failure
    /// tears down and terminates the job.
    pub async fn admit(&self, req: &DeployRequest) -> Result<JobEntity, AdmissionError> {
        let requirement = validate_request(req)?;

        let now = chrono::Utc::now().timestamp();
        let mut job = JobEntity::new(
            &req.uuid,
            req.wallet_address.clone(),
            req.image.clone(),
            now + req.duration,
            now,
        );
        self.save(&job);
        self.flight.admit(&job.original_uuid, job.status);

        let snapshot = match self.snapshots.collect().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(job_uuid = %job.job_uuid, %err, "snapshot collection failed");
                self.abandon(&mut job).await;
                return Err(AdmissionError::Internal(err.to_string()));
            }
        };
        let placement = match matcher::match_task(&snapshot, &requirement) {
            Ok(placement) => placement,
            Err(MatchError::NoFit) => {
                warn!(job_uuid = %job.job_uuid, "no node satisfies the job requirement");
                self.abandon(&mut job).await;
                return Err(AdmissionError::ResourcesUnavailable);
            }
        };

        let namespace = Self::wallet_namespace(&job.owner_address);
        if let Err(err) = self.orchestrator.ensure_namespace(&namespace).await {
            warn!(job_uuid = %job.job_uuid, %err, "namespace creation failed");
            self.abandon(&mut job).await;
            return Err(AdmissionError::Internal(err.to_string()));
        }

        let spec = WorkloadSpec {
            namespace: namespace.clone(),
            name: format!("{}{}", prefix::DEPLOY, job.job_uuid),
            image: job.image.clone(),
            node_name: placement.node_name.clone(),
            node_selector: placement.gpu_selector.clone(),
            command: vec![],
            env: vec![
                ("wallet_address".to_string(), job.owner_address.clone()),
                ("job_uuid".to_string(), job.job_uuid.clone()),
            ],
            requests: placement.requests,
            limits: placement.limits,
            gpu_request: placement.gpu_request,
            gpu_limit: placement.gpu_limit,
            label: ("lad_app".to_string(), job.job_uuid.clone()),
        };
        if let Err(err) = self.orchestrator.create_workload(&spec).await {
            warn!(job_uuid = %job.job_uuid, %err, "workload creation failed");
            self.abandon(&mut job).await;
            return Err(AdmissionError::Internal(err.to_string()));
        }
        self.transition(&mut job, JobStatus::PullingImage);

        let service_name = format!("{}{}", prefix::SERVICE, job.job_uuid);
        match self
            .orchestrator
            .create_service(&namespace, &service_name, req.port)
            .await
        {
            Ok(endpoint) => {
                job.result_url = endpoint;
                self.transition(&mut job, JobStatus::DeployedToOrchestrator);
            }
            Err(err) => {
                warn!(job_uuid = %job.job_uuid, %err, "service creation failed");
                self.abandon(&mut job).await;
                return Err(AdmissionError::Internal(err.to_string()));
            }
        }

        let metadata = JobMetadata {
            wallet_address: job.owner_address.clone(),
            task_uuid: req.task_uuid.clone(),
            space_uuid: job.job_uuid.clone(),
            expire_time: job.expire_time,
        };
        if let Err(err) = self.meta.put(&Self::meta_key(&job.job_uuid), metadata) {
            warn!(job_uuid = %job.job_uuid, %err, "metadata record failed");
        }

        info!(job_uuid = %job.job_uuid, endpoint = %job.result_url, "job deployed");
        Ok(job)
    }

    /// Explicit cancellation: tear down, soft delete, stop reporting.
    pub async fn cancel(&self, job_uuid: &str) -> Result<(), AdmissionError> {
        let key = job_uuid.to_lowercase();
        let job = self
            .jobs
            .get(&key)
            .map_err(|e| AdmissionError::Internal(e.to_string()))?
            .ok_or(AdmissionError::InvalidField {
                field: "job_uuid",
                reason: format!("unknown job {job_uuid}"),
            })?;

        self.teardown(&job.owner_address, &job.job_uuid).await;
        if let Err(err) = self.meta.delete_many(&[Self::meta_key(&job.job_uuid)]) {
            warn!(job_uuid = %job.job_uuid, %err, "metadata delete failed");
        }
        if let Err(err) = self.jobs.soft_delete(&job.job_uuid, JobStatus::Terminated) {
            warn!(job_uuid = %job.job_uuid, %err, "job soft delete failed");
        }
        self.flight.remove(&job.original_uuid);
        info!(job_uuid = %job.job_uuid, "job cancelled");
        Ok(())
    }

    /// Reaper entry point: tear down by metadata record and soft-delete
    /// the entity if it is still around. Idempotent.
    pub async fn terminate(&self, wallet_address: &str, space_uuid: &str) {
        self.teardown(wallet_address, space_uuid).await;
        if let Ok(Some(job)) = self.jobs.get(space_uuid) {
            if let Err(err) = self.jobs.soft_delete(space_uuid, JobStatus::Terminated) {
                warn!(job_uuid = %space_uuid, %err, "job soft delete failed");
            }
            self.flight.remove(&job.original_uuid);
        }
    }

    /// Advance a deployed job from the backend-reported pod phase.
    pub async fn sync_phase(&self, job_uuid: &str) -> Option<JobEntity> {
        let key = job_uuid.to_lowercase();
        let mut job = self.jobs.get(&key).ok().flatten()?;
        if job.deleted || job.status != JobStatus::DeployedToOrchestrator {
            return Some(job);
        }
        let namespace = Self::wallet_namespace(&job.owner_address);
        let selector = format!("lad_app={}", job.job_uuid);
        match self.orchestrator.workload_phase(&namespace, &selector).await {
            Ok(Some(PodPhase::Running)) => self.transition(&mut job, JobStatus::Running),
            Ok(Some(PodPhase::Succeeded)) => self.transition(&mut job, JobStatus::Completed),
            Ok(_) => {}
            Err(err) => warn!(job_uuid = %job.job_uuid, %err, "phase query failed"),
        }
        Some(job)
    }

    /// Non-deleted jobs, newest first.
    pub fn list(&self) -> Vec<JobEntity> {
        self.jobs.list().unwrap_or_default()
    }

    /// Delete the job's backend resources: workload, exposed service,
    /// and the namespace once nothing is left in it. Every step treats
    /// absence as success.
    pub async fn teardown(&self, wallet_address: &str, job_uuid: &str) {
        let namespace = Self::wallet_namespace(wallet_address);
        let deploy = format!("{}{}", prefix::DEPLOY, job_uuid);
        let service = format!("{}{}", prefix::SERVICE, job_uuid);

        if let Err(err) = self.orchestrator.delete_workload(&namespace, &deploy).await {
            warn!(job_uuid, %err, "workload delete failed");
        }
        if let Err(err) = self.orchestrator.delete_service(&namespace, &service).await {
            warn!(job_uuid, %err, "service delete failed");
        }
        match self.orchestrator.has_active_workloads(&namespace).await {
            Ok(false) => {
                if let Err(err) = self.orchestrator.delete_namespace(&namespace).await {
                    warn!(job_uuid, %err, "namespace delete failed");
                }
            }
            Ok(true) => {}
            Err(err) => warn!(job_uuid, %err, "namespace activity query failed"),
        }
    }

    /// Terminate a job that never finished deploying: best-effort
    /// teardown, terminal status, soft delete, stop reporting.
    async fn abandon(&self, job: &mut JobEntity) {
        self.teardown(&job.owner_address, &job.job_uuid).await;
        job.status = JobStatus::Terminated;
        job.deleted = true;
        self.save(job);
        self.flight.remove(&job.original_uuid);
    }

    fn transition(&self, job: &mut JobEntity, next: JobStatus) {
        if !job.status.can_transition_to(next) {
            warn!(job_uuid = %job.job_uuid, from = %job.status, to = %next, "illegal job transition dropped");
            return;
        }
        job.status = next;
        self.save(job);
        self.flight.update(&job.original_uuid, next);
    }

    fn save(&self, job: &JobEntity) {
        if let Err(err) = self.jobs.save(job.clone()) {
            warn!(job_uuid = %job.job_uuid, %err, "job persistence failed");
        }
    }
}

fn validate_request(req: &DeployRequest) -> Result<ResourceRequirement, AdmissionError> {
    if req.uuid.trim().is_empty() {
        return Err(AdmissionError::MissingField("uuid"));
    }
    if req.wallet_address.trim().is_empty() {
        return Err(AdmissionError::MissingField("wallet_address"));
    }
    if req.image.trim().is_empty() {
        return Err(AdmissionError::MissingField("image"));
    }
    if req.duration <= 0 {
        return Err(AdmissionError::InvalidField {
            field: "duration",
            reason: "must be positive".to_string(),
        });
    }
    let memory = parse_quantity(&req.memory).ok_or(AdmissionError::InvalidField {
        field: "memory",
        reason: format!("unparseable quantity {:?}", req.memory),
    })?;
    let storage = parse_quantity(&req.storage).ok_or(AdmissionError::InvalidField {
        field: "storage",
        reason: format!("unparseable quantity {:?}", req.storage),
    })?;
    let amounts = cpnet_common::ResourceAmounts::new(req.cpu, memory, storage);
    if req.gpu > 0 || !req.gpu_model.trim().is_empty() {
        let model = if req.gpu_model.trim().is_empty() {
            None
        } else {
            Some(req.gpu_model.clone())
        };
        Ok(ResourceRequirement::gpu(amounts, model, req.gpu.max(1)))
    } else {
        Ok(ResourceRequirement::cpu_only(amounts))
    }
}
