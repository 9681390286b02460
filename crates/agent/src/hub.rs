//! Remote coordinator (hub) client.
//!
//! The hub assigns work and receives status; every request carries the
//! bearer token. A non-200 response is a report failure for the calling
//! loop to retry on its next tick, never a fatal error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use cpnet_common::JobStatus;

use crate::snapshot::NodeSnapshot;

/// Cluster summary pushed to the hub.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub node_id: String,
    pub region: String,
    pub cluster_info: Vec<NodeSnapshot>,
    pub public_address: String,
}

/// Hub operations the reconciliation loops consume.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Report one job's current status. `true` only on a 200 response.
    async fn report_job_status(&self, job_uuid: &str, status: JobStatus) -> bool;

    /// The hub-side status string of an external task, e.g. "Running",
    /// "Terminated", or a "Task not found" message.
    async fn check_task_status(&self, task_uuid: &str, node_id: &str) -> Result<String>;

    /// Push the cluster resource summary.
    async fn report_summary(&self, summary: &ClusterSummary) -> Result<()>;
}

/// HTTP implementation bound to one hub endpoint.
pub struct HubClient {
    base: String,
    access_token: String,
    wallet_address: String,
    client: Client,
}

impl HubClient {
    pub fn new(base: impl Into<String>, access_token: String, wallet_address: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base: base.into(), access_token, wallet_address, client }
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn report_job_status(&self, job_uuid: &str, status: JobStatus) -> bool {
        let url = format!("{}/job/status", self.base);
        let body = serde_json::json!({
            "job_uuid": job_uuid,
            "status": status,
            "public_address": self.wallet_address,
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await;
        match resp {
            Ok(resp) if resp.status().is_success() => {
                debug!(job_uuid, %status, "job status reported");
                true
            }
            Ok(resp) => {
                warn!(job_uuid, code = %resp.status(), "job status report rejected");
                false
            }
            Err(err) => {
                warn!(job_uuid, %err, "job status report failed");
                false
            }
        }
    }

    async fn check_task_status(&self, task_uuid: &str, node_id: &str) -> Result<String> {
        let url = format!(
            "{}/check_task_status_with_node_id/{}/{}",
            self.base, task_uuid, node_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        #[derive(serde::Deserialize)]
        struct TaskStatusResp {
            #[serde(default)]
            status: String,
            #[serde(default)]
            message: String,
        }
        let body: TaskStatusResp = resp.json().await?;
        if body.status == "failed" {
            // "Task not found" arrives as a failed lookup with the
            // detail in the message.
            return Ok(body.message);
        }
        Ok(body.status)
    }

    async fn report_summary(&self, summary: &ClusterSummary) -> Result<()> {
        let url = format!("{}/cp/summary", self.base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(summary)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("summary report failed {status} {text}"))
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK
// ════════════════════════════════════════════════════════════════════════════

/// Scripted hub for tests.
#[derive(Default)]
pub struct MockHub {
    /// When false, every status report fails.
    report_ok: Mutex<bool>,
    reported: Mutex<Vec<(String, JobStatus)>>,
    task_statuses: Mutex<HashMap<String, String>>,
    summaries: Mutex<u64>,
}

impl MockHub {
    pub fn new() -> Self {
        let hub = Self::default();
        if let Ok(mut ok) = hub.report_ok.lock() {
            *ok = true;
        }
        hub
    }

    pub fn set_report_ok(&self, ok: bool) {
        if let Ok(mut flag) = self.report_ok.lock() {
            *flag = ok;
        }
    }

    pub fn set_task_status(&self, task_uuid: &str, status: &str) {
        if let Ok(mut map) = self.task_statuses.lock() {
            map.insert(task_uuid.to_string(), status.to_string());
        }
    }

    pub fn reported(&self) -> Vec<(String, JobStatus)> {
        self.reported.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> u64 {
        self.summaries.lock().map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl HubApi for MockHub {
    async fn report_job_status(&self, job_uuid: &str, status: JobStatus) -> bool {
        if let Ok(mut reported) = self.reported.lock() {
            reported.push((job_uuid.to_string(), status));
        }
        self.report_ok.lock().map(|ok| *ok).unwrap_or(false)
    }

    async fn check_task_status(&self, task_uuid: &str, _node_id: &str) -> Result<String> {
        let map = self
            .task_statuses
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {e}"))?;
        Ok(map
            .get(task_uuid)
            .cloned()
            .unwrap_or_else(|| "Task not found".to_string()))
    }

    async fn report_summary(&self, _summary: &ClusterSummary) -> Result<()> {
        if let Ok(mut count) = self.summaries.lock() {
            *count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_reports_and_honours_flag() {
        let hub = MockHub::new();
        assert!(hub.report_job_status("j1", JobStatus::Received).await);

        hub.set_report_ok(false);
        assert!(!hub.report_job_status("j1", JobStatus::PullingImage).await);

        let reported = hub.reported();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0], ("j1".to_string(), JobStatus::Received));
    }

    #[tokio::test]
    async fn mock_unknown_task_reads_as_not_found() {
        let hub = MockHub::new();
        let status = hub.check_task_status("missing", "n1").await.unwrap();
        assert!(status.contains("Task not found"));

        hub.set_task_status("t1", "Running");
        assert_eq!(hub.check_task_status("t1", "n1").await.unwrap(), "Running");
    }
}
