//! Expiry reaper.
//!
//! Walks every job metadata record and tears down jobs that the hub has
//! abandoned, that have passed their expiry, or whose backend workload
//! no longer exists. Keys are collected during the pass and
//! batch-deleted afterwards; only the exact keys collected this pass are
//! deleted, so records added concurrently are simply visited next time.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use cpnet_common::prefix;

use crate::hub::HubApi;
use crate::jobs::JobService;
use crate::orchestrator::Orchestrator;
use crate::store::MetaStore;

/// Hub-side statuses that mean the job is gone for good.
const TERMINAL_HUB_STATUSES: [&str; 3] = ["Terminated", "Cancelled", "Failed"];

pub struct ExpiryReaper {
    meta: Arc<dyn MetaStore>,
    jobs: Arc<JobService>,
    orchestrator: Arc<dyn Orchestrator>,
    hub: Arc<dyn HubApi>,
    node_id: String,
}

impl ExpiryReaper {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        jobs: Arc<JobService>,
        orchestrator: Arc<dyn Orchestrator>,
        hub: Arc<dyn HubApi>,
        node_id: String,
    ) -> Self {
        Self { meta, jobs, orchestrator, hub, node_id }
    }

    pub async fn run_once(&self) -> Result<()> {
        let keys = self.meta.keys_with_prefix(prefix::META_SPACE)?;
        let now = chrono::Utc::now().timestamp();
        let mut delete_keys: Vec<String> = Vec::new();

        for key in keys {
            let Some(md) = self.meta.get(&key)? else {
                // The record vanished between enumeration and read;
                // nothing to do for this key.
                continue;
            };

            if !md.task_uuid.trim().is_empty() {
                match self.hub.check_task_status(&md.task_uuid, &self.node_id).await {
                    Ok(status) => {
                        if status.contains("Task not found") {
                            info!(task_uuid = %md.task_uuid, "hub no longer knows the task, reaping");
                            self.jobs.terminate(&md.wallet_address, &md.space_uuid).await;
                            delete_keys.push(key);
                            continue;
                        }
                        if TERMINAL_HUB_STATUSES.iter().any(|s| status.contains(s)) {
                            info!(task_uuid = %md.task_uuid, %status, "hub reports terminal status, reaping");
                            self.jobs.terminate(&md.wallet_address, &md.space_uuid).await;
                            delete_keys.push(key);
                            continue;
                        }
                    }
                    Err(err) => {
                        // Transient hub failure: leave the record for
                        // the next pass.
                        warn!(task_uuid = %md.task_uuid, %err, "hub status check failed");
                        continue;
                    }
                }
            }

            if now > md.expire_time {
                info!(space_uuid = %md.space_uuid, expire_time = md.expire_time, "job expired, reaping");
                self.jobs.terminate(&md.wallet_address, &md.space_uuid).await;
                delete_keys.push(key);
                continue;
            }

            let namespace = JobService::wallet_namespace(&md.wallet_address);
            let deploy = format!("{}{}", prefix::DEPLOY, md.space_uuid);
            match self.orchestrator.workload_exists(&namespace, &deploy).await {
                Ok(false) => {
                    info!(space_uuid = %md.space_uuid, "backend workload is gone, dropping record");
                    self.jobs.terminate(&md.wallet_address, &md.space_uuid).await;
                    delete_keys.push(key);
                }
                Ok(true) => {}
                Err(err) => warn!(space_uuid = %md.space_uuid, %err, "workload lookup failed"),
            }
        }

        if !delete_keys.is_empty() {
            self.meta.delete_many(&delete_keys)?;
            info!(count = delete_keys.len(), "reaped metadata records");
        }
        Ok(())
    }
}
