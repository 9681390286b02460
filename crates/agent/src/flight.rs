//! In-flight placement tracking and the status-flush loop.
//!
//! [`FlightTracker`] is the explicit concurrent map that holds every
//! placement the hub has not yet acknowledged as deployed, keyed by job
//! uuid. Lifecycle code inserts and updates entries directly; the flush
//! loop is the only evictor (cancellation and reaping supersede an entry
//! by removing it).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use cpnet_common::JobStatus;

use crate::hub::HubApi;

/// Concurrent map of job uuid to its last known status.
#[derive(Default)]
pub struct FlightTracker {
    entries: RwLock<HashMap<String, JobStatus>>,
}

impl FlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a placement (or overwrite its status).
    pub fn admit(&self, job_uuid: &str, status: JobStatus) {
        self.entries.write().insert(job_uuid.to_string(), status);
    }

    /// Update the status of a tracked placement; ignored if untracked.
    pub fn update(&self, job_uuid: &str, status: JobStatus) {
        if let Some(entry) = self.entries.write().get_mut(job_uuid) {
            *entry = status;
        }
    }

    /// Remove a placement (cancellation/reaping supersedes reporting).
    pub fn remove(&self, job_uuid: &str) {
        self.entries.write().remove(job_uuid);
    }

    pub fn contains(&self, job_uuid: &str) -> bool {
        self.entries.read().contains_key(job_uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stable copy of the current entries.
    pub fn snapshot(&self) -> Vec<(String, JobStatus)> {
        let mut entries: Vec<(String, JobStatus)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// The status-flush loop body.
///
/// Each tick reports every in-flight entry to the hub. An entry is
/// evicted only after a successful report whose reported status is the
/// forward-progress milestone (deployed); failed reports leave the
/// entry for the next tick, indefinitely.
pub struct StatusFlush {
    flight: Arc<FlightTracker>,
    hub: Arc<dyn HubApi>,
}

impl StatusFlush {
    pub fn new(flight: Arc<FlightTracker>, hub: Arc<dyn HubApi>) -> Self {
        Self { flight, hub }
    }

    pub async fn run_once(&self) -> Result<()> {
        for (job_uuid, status) in self.flight.snapshot() {
            let reported = self.hub.report_job_status(&job_uuid, status).await;
            if reported && status == JobStatus::DeployedToOrchestrator {
                self.flight.remove(&job_uuid);
            }
        }
        Ok(())
    }
}
