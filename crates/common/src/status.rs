//! Task, job and reward status enumerations.
//!
//! Statuses are closed enums so that an invalid status string can never
//! propagate; every consumer matches exhaustively. Transition legality is
//! centralized in `can_transition_to` and enforced by the lifecycle
//! services before any persistence happens.
//!
//! ## Task state machine
//!
//! ```text
//! Received ──► ResourceCheckFailed          (no node fits)
//!    │
//!    ├───────► Failed                       (validation / backend error)
//!    │
//!    └───────► Running ──► Failed           (execution error)
//!                 │
//!                 └──────► Success ──► Submitted
//! ```
//!
//! Reward classification (Rewarded/Challenged/Slashed) is tracked in a
//! separate [`RewardState`] field and never rewrites the primary status.
//!
//! ## Job state machine
//!
//! ```text
//! Received ──► PullingImage ──► DeployedToOrchestrator ──► Running
//!                                         │                   │
//!                                         └──► Terminated ◄───┼── Completed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a proof task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and persisted, no placement decision yet.
    Received,
    /// The resource matcher found no node satisfying the requirement.
    ResourceCheckFailed,
    /// A workload has been instantiated on the backend.
    Running,
    /// Validation, placement or execution failed.
    Failed,
    /// The proof callback was received.
    Success,
    /// Proof submission was attempted; the task carries whatever tx hash
    /// (possibly empty) resulted.
    Submitted,
}

impl TaskStatus {
    /// Terminal statuses admit no further primary-status transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::ResourceCheckFailed | TaskStatus::Failed | TaskStatus::Submitted
        )
    }

    /// Failure-class terminal statuses.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, TaskStatus::ResourceCheckFailed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Received, ResourceCheckFailed)
                | (Received, Running)
                | (Received, Failed)
                | (Running, Success)
                | (Running, Failed)
                | (Success, Submitted)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Received => "received",
            TaskStatus::ResourceCheckFailed => "resource_check_failed",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Success => "success",
            TaskStatus::Submitted => "submitted",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a long-running deployment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, nothing placed yet.
    Received,
    /// Backend workload created, image pull in progress.
    PullingImage,
    /// Workload and its exposed endpoint exist on the orchestrator.
    DeployedToOrchestrator,
    /// The workload reports a running phase.
    Running,
    /// The workload finished on its own.
    Completed,
    /// Torn down by cancellation, expiry or backend confirmation of
    /// absence.
    Terminated,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Terminated)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `Terminated` is reachable from every non-terminal status: the
    /// reaper may tear a job down at any point of its deployment.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Terminated {
            return true;
        }
        matches!(
            (self, next),
            (Received, PullingImage)
                | (PullingImage, DeployedToOrchestrator)
                | (DeployedToOrchestrator, Running)
                | (DeployedToOrchestrator, Completed)
                | (Running, Completed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Received => "received",
            JobStatus::PullingImage => "pulling_image",
            JobStatus::DeployedToOrchestrator => "deployed_to_orchestrator",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Settlement outcome of a submitted proof.
///
/// `Unclaimed` means "poll again later": the ledger has not yet recorded
/// a challenge, slash or reward for the task. It is never a terminal
/// outcome on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardState {
    Unclaimed,
    Challenged,
    Slashed,
    Rewarded,
}

impl RewardState {
    /// Whether the ledger has recorded a final outcome.
    pub fn is_final(self) -> bool {
        !matches!(self, RewardState::Unclaimed)
    }
}

impl fmt::Display for RewardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RewardState::Unclaimed => "unclaimed",
            RewardState::Challenged => "challenged",
            RewardState::Slashed => "slashed",
            RewardState::Rewarded => "rewarded",
        };
        f.write_str(s)
    }
}
