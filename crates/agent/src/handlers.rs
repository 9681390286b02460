//! HTTP surface of the agent.
//!
//! Admission entry points plus read-only inspection endpoints, all
//! sharing one [`AppState`]. Admission-path failures map onto the
//! structured error envelope; background failures are only visible
//! through the task/job listings.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use cpnet_common::AdmissionError;

use crate::entity::{JobEntity, TaskEntity};
use crate::jobs::{DeployRequest, JobService};
use crate::snapshot::{NodeSnapshot, SnapshotProvider};
use crate::tasks::{TaskService, UbiTaskRequest};

pub struct AppState {
    pub node_id: String,
    pub region: String,
    pub wallet_address: String,
    pub tasks: Arc<TaskService>,
    pub jobs: Arc<JobService>,
    pub snapshots: Arc<SnapshotProvider>,
    pub started_at: i64,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/computing/host/info", get(host_info))
        .route("/api/v1/computing/cp", get(cluster_resource))
        .route("/api/v1/computing/cp/tasks", get(list_tasks))
        .route("/api/v1/computing/cp/ubi", post(admit_task))
        .route("/api/v1/computing/cp/receive/ubi", post(receive_proof))
        .route("/api/v1/computing/jobs", post(admit_job).get(list_jobs))
        .route(
            "/api/v1/computing/jobs/{job_uuid}",
            get(get_job).delete(cancel_job),
        )
        .with_state(state)
}

// ════════════════════════════════════════════════════════════════════════════
// ENVELOPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct SuccessBody<T: Serialize> {
    status: &'static str,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<SuccessBody<T>> {
    Json(SuccessBody { status: "success", data })
}

#[derive(Debug, Serialize)]
struct FailureBody {
    status: &'static str,
    code: &'static str,
    message: String,
}

/// Wrapper turning [`AdmissionError`] into a structured HTTP response.
#[derive(Debug)]
pub struct ApiFailure(pub AdmissionError);

impl From<AdmissionError> for ApiFailure {
    fn from(err: AdmissionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AdmissionError::MissingField(_) | AdmissionError::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            AdmissionError::SignatureVerification => StatusCode::UNAUTHORIZED,
            AdmissionError::ResourcesUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = FailureBody {
            status: "failed",
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK ENDPOINTS
// ════════════════════════════════════════════════════════════════════════════

async fn admit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UbiTaskRequest>,
) -> Result<Json<SuccessBody<TaskEntity>>, ApiFailure> {
    let task = state.tasks.admit(&req).await?;
    Ok(success(task))
}

/// Proof callback payload; the worker reports its task id as a string.
#[derive(Debug, Deserialize)]
struct ProofPayload {
    task_id: String,
    proof: String,
}

async fn receive_proof(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProofPayload>,
) -> Result<Json<SuccessBody<TaskEntity>>, ApiFailure> {
    let task_id: i64 = payload.task_id.parse().map_err(|_| {
        ApiFailure(AdmissionError::InvalidField {
            field: "task_id",
            reason: format!("not a task id: {:?}", payload.task_id),
        })
    })?;
    let task = state.tasks.receive_proof(task_id, &payload.proof).await?;
    Ok(success(task))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Json<SuccessBody<Vec<TaskEntity>>> {
    success(state.tasks.list(&[], Some(100)))
}

// ════════════════════════════════════════════════════════════════════════════
// JOB ENDPOINTS
// ════════════════════════════════════════════════════════════════════════════

async fn admit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<SuccessBody<JobEntity>>, ApiFailure> {
    let job = state.jobs.admit(&req).await?;
    Ok(success(job))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<SuccessBody<Vec<JobEntity>>> {
    success(state.jobs.list())
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_uuid): Path<String>,
) -> Result<Json<SuccessBody<JobEntity>>, ApiFailure> {
    match state.jobs.sync_phase(&job_uuid).await {
        Some(job) => Ok(success(job)),
        None => Err(ApiFailure(AdmissionError::InvalidField {
            field: "job_uuid",
            reason: format!("unknown job {job_uuid}"),
        })),
    }
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_uuid): Path<String>,
) -> Result<Json<SuccessBody<&'static str>>, ApiFailure> {
    state.jobs.cancel(&job_uuid).await?;
    Ok(success("terminated"))
}

// ════════════════════════════════════════════════════════════════════════════
// OBSERVABILITY
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct HostInfo {
    node_id: String,
    region: String,
    version: &'static str,
    uptime_secs: i64,
}

async fn host_info(State(state): State<Arc<AppState>>) -> Json<SuccessBody<HostInfo>> {
    success(HostInfo {
        node_id: state.node_id.clone(),
        region: state.region.clone(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: chrono::Utc::now().timestamp() - state.started_at,
    })
}

#[derive(Debug, Serialize)]
struct ClusterResource {
    node_id: String,
    region: String,
    public_address: String,
    cluster_info: Vec<NodeSnapshot>,
}

async fn cluster_resource(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessBody<ClusterResource>>, ApiFailure> {
    let cluster_info = state
        .snapshots
        .collect()
        .await
        .map_err(|e| ApiFailure(AdmissionError::Internal(e.to_string())))?;
    Ok(success(ClusterResource {
        node_id: state.node_id.clone(),
        region: state.region.clone(),
        public_address: state.wallet_address.clone(),
        cluster_info,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use cpnet_common::ResourceAmounts;
    use cpnet_settlement::{MockTaskChain, SettlementClient, SettlementIdentity};

    use crate::flight::FlightTracker;
    use crate::orchestrator::MockOrchestrator;
    use crate::store::{MemJobStore, MemMetaStore, MemTaskStore};
    use crate::tasks::TaskServiceConfig;

    fn app_state() -> Arc<AppState> {
        let orchestrator = Arc::new(MockOrchestrator::new());
        orchestrator.add_node("node-a", ResourceAmounts::new(16, 1 << 36, 1 << 38));
        let snapshots = Arc::new(SnapshotProvider::new(orchestrator.clone()));
        let settlement = Arc::new(SettlementClient::new(
            Arc::new(MockTaskChain::new()),
            Arc::new(SettlementIdentity::new(Address::repeat_byte(1))),
        ));
        let tasks = Arc::new(TaskService::new(
            Arc::new(MemTaskStore::new()),
            orchestrator.clone(),
            snapshots.clone(),
            settlement,
            TaskServiceConfig {
                node_id: "node-1".to_string(),
                engine_address: None,
                public_url: "http://localhost:8085".to_string(),
            },
        ));
        let jobs = Arc::new(JobService::new(
            Arc::new(MemJobStore::new()),
            Arc::new(MemMetaStore::new()),
            orchestrator.clone(),
            snapshots.clone(),
            Arc::new(FlightTracker::new()),
        ));
        Arc::new(AppState {
            node_id: "node-1".to_string(),
            region: "eu-west".to_string(),
            wallet_address: "0xwallet".to_string(),
            tasks,
            jobs,
            snapshots,
            started_at: chrono::Utc::now().timestamp(),
        })
    }

    #[tokio::test]
    async fn job_round_trip_through_handlers() {
        let state = app_state();
        let req = DeployRequest {
            uuid: "Job-H1".to_string(),
            task_uuid: String::new(),
            wallet_address: "0xW".to_string(),
            image: "img:v1".to_string(),
            duration: 600,
            port: 80,
            cpu: 1,
            memory: "1Gi".to_string(),
            storage: "1Gi".to_string(),
            gpu_model: String::new(),
            gpu: 0,
        };
        let admitted = admit_job(State(state.clone()), Json(req)).await.expect("admit");
        assert_eq!(admitted.0.data.job_uuid, "job-h1");

        let listed = list_jobs(State(state.clone())).await;
        assert_eq!(listed.0.data.len(), 1);

        cancel_job(State(state.clone()), Path("Job-H1".to_string()))
            .await
            .expect("cancel");
        assert!(list_jobs(State(state)).await.0.data.is_empty());
    }

    #[tokio::test]
    async fn bad_proof_payload_is_a_param_error() {
        let state = app_state();
        let err = receive_proof(
            State(state),
            Json(ProofPayload { task_id: "not-a-number".to_string(), proof: "p".to_string() }),
        )
        .await
        .err()
        .expect("error");
        assert_eq!(err.0.code(), "param_error");
    }

    #[tokio::test]
    async fn unsigned_task_admission_is_rejected() {
        // engine_address is unset in the fixture, so task admission
        // cannot be authorized.
        let state = app_state();
        let req = UbiTaskRequest {
            id: 1,
            name: "t".to_string(),
            zk_type: "zk".to_string(),
            input_param: "u".to_string(),
            signature: "00".to_string(),
            contract_addr: format!("{}", Address::repeat_byte(2)),
            resource_type: 0,
            resource: crate::tasks::TaskResource {
                cpu: 1,
                memory: "1Gi".to_string(),
                storage: "1Gi".to_string(),
                gpu_model: String::new(),
                gpu: 0,
            },
        };
        let err = admit_task(State(state), Json(req)).await.err().expect("error");
        assert_eq!(err.0.code(), "internal_error");
    }

    #[tokio::test]
    async fn host_info_reports_identity() {
        let state = app_state();
        let info = host_info(State(state)).await;
        assert_eq!(info.0.data.node_id, "node-1");
        assert_eq!(info.0.data.region, "eu-west");
    }
}
