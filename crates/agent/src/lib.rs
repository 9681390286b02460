//! # cpnet computing-provider agent
//!
//! Node agent for the cpnet decentralized compute network: admits proof
//! tasks and deployment jobs, matches them against observed hardware
//! capacity, places them on the orchestration backend, reconciles their
//! lifecycle in the background and settles proofs on-chain.
//!
//! ## Data flow
//!
//! ```text
//!  admission (HTTP)                     reconciliation (periodic)
//!       │                                        │
//!       ▼                                        ▼
//!  validate ─► snapshot ─► matcher ─► place   flush / reap / gc /
//!       │          ▲                    │     heal / poll rewards
//!       ▼          │                    ▼          │
//!   stores ◄───────┴──── orchestrator ◄────────────┤
//!       ▲                                          │
//!       └───────────── settlement (chain) ◄────────┘
//! ```
//!
//! ## Modules
//!
//! | Module          | Description                                         |
//! |-----------------|-----------------------------------------------------|
//! | `entity`        | Persisted task/job entities and job metadata        |
//! | `orchestrator`  | Backend trait, spec types, shipped mock             |
//! | `exporter`      | Hardware-exporter log parsing                       |
//! | `snapshot`      | Per-node capacity/availability snapshots            |
//! | `matcher`       | First-fit resource matcher                          |
//! | `store`         | Task/job/metadata store traits + in-memory impls    |
//! | `hub`           | Remote coordinator client (trait, HTTP, mock)       |
//! | `flight`        | In-flight placement map + status-flush loop         |
//! | `tasks`         | Proof-task lifecycle service                        |
//! | `jobs`          | Deployment-job lifecycle service                    |
//! | `supervisor`    | Panic-isolated periodic-loop supervisor             |
//! | `reaper`        | Expiry reaper loop                                  |
//! | `gc`            | Namespace garbage collection loop                   |
//! | `exporter_heal` | Exporter self-healing loop                          |
//! | `reward_poller` | Reward classification loop                          |
//! | `summary`       | Cluster summary reporting loop                      |
//! | `handlers`      | Axum HTTP surface                                   |

pub mod entity;
pub mod exporter;
pub mod exporter_heal;
pub mod flight;
pub mod gc;
pub mod handlers;
pub mod hub;
pub mod jobs;
pub mod matcher;
pub mod orchestrator;
pub mod reaper;
pub mod reward_poller;
pub mod snapshot;
pub mod store;
pub mod summary;
pub mod supervisor;
pub mod tasks;

pub use entity::{JobEntity, JobMetadata, TaskEntity};
pub use exporter_heal::ExporterHeal;
pub use flight::{FlightTracker, StatusFlush};
pub use gc::NamespaceGc;
pub use handlers::{build_router, AppState};
pub use hub::{ClusterSummary, HubApi, HubClient, MockHub};
pub use jobs::{DeployRequest, JobService};
pub use matcher::{match_task, task_image, MatchError, Placement};
pub use orchestrator::{
    MockOrchestrator, NodeCapacity, Orchestrator, OrchestratorError, PodInfo, PodPhase,
    WorkloadReservation, WorkloadSpec,
};
pub use reaper::ExpiryReaper;
pub use reward_poller::RewardPoller;
pub use snapshot::{NodeSnapshot, SnapshotProvider};
pub use store::{
    JobStore, MemJobStore, MemMetaStore, MemTaskStore, MetaStore, StoreError, TaskStore,
};
pub use summary::SummaryReporter;
pub use supervisor::Supervisor;
pub use tasks::{TaskService, TaskServiceConfig, UbiTaskRequest};
