//! Hardware-exporter self-healing.
//!
//! Exporter pods that are not running are deleted so the backend
//! reschedules them. Pods whose latest log line carries the error
//! marker accumulate a consecutive-error count and are deleted on the
//! third consecutive observation; a clean observation resets the count.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::exporter::{ERROR_MARKER, EXPORTER_LABEL, EXPORTER_NAMESPACE};
use crate::orchestrator::{Orchestrator, PodPhase};

/// Consecutive errored observations that trigger deletion.
const ERROR_THRESHOLD: u32 = 3;

pub struct ExporterHeal {
    orchestrator: Arc<dyn Orchestrator>,
    error_counts: Mutex<HashMap<String, u32>>,
}

impl ExporterHeal {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator, error_counts: Mutex::new(HashMap::new()) }
    }

    pub async fn run_once(&self) -> Result<()> {
        let pods = self
            .orchestrator
            .list_pods(EXPORTER_NAMESPACE, EXPORTER_LABEL)
            .await?;

        for pod in pods {
            if pod.phase != PodPhase::Running {
                info!(pod = %pod.name, phase = %pod.phase, "exporter pod not running, deleting");
                self.delete(&pod.name).await;
                continue;
            }

            let log = match self
                .orchestrator
                .pod_last_log_line(EXPORTER_NAMESPACE, &pod.name)
                .await
            {
                Ok(log) => log,
                Err(err) => {
                    warn!(pod = %pod.name, %err, "exporter log unavailable");
                    continue;
                }
            };

            if log.contains(ERROR_MARKER) {
                let count = {
                    let mut counts = self.error_counts.lock();
                    let count = counts.entry(pod.name.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if count >= ERROR_THRESHOLD {
                    info!(pod = %pod.name, count, "exporter errored repeatedly, deleting");
                    self.delete(&pod.name).await;
                }
            } else {
                // Recovery resets the streak.
                self.error_counts.lock().remove(&pod.name);
            }
        }
        Ok(())
    }

    async fn delete(&self, pod: &str) {
        if let Err(err) = self.orchestrator.delete_pod(EXPORTER_NAMESPACE, pod).await {
            warn!(pod, %err, "exporter pod delete failed");
        }
        self.error_counts.lock().remove(pod);
    }
}
