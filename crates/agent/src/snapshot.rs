//! Node resource snapshots.
//!
//! A snapshot is rebuilt on every scheduling decision from three
//! sources: orchestrator-reported allocatable capacity, the requests of
//! currently running workloads, and the hardware exporter's GPU
//! inventory. Nothing here is persisted; a snapshot is only "as of the
//! last successful collection".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use cpnet_common::{normalize_gpu_name, CpuArch, GpuStatus, GpuUnit, ResourceAmounts};

use crate::exporter::{self, HardwareReport, EXPORTER_LABEL, EXPORTER_NAMESPACE};
use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Capacity and availability of one node at collection time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub architecture: CpuArch,
    pub cpu_name: String,
    pub allocatable: ResourceAmounts,
    /// Allocatable minus the requests of running workloads.
    pub free: ResourceAmounts,
    /// GPU inventory with availability recomputed from occupancy.
    pub gpus: Vec<GpuUnit>,
}

impl NodeSnapshot {
    /// Number of currently available units of a normalized GPU product.
    pub fn available_gpu_count(&self, normalized_product: &str) -> u64 {
        self.gpus
            .iter()
            .filter(|g| {
                g.status == GpuStatus::Available
                    && normalize_gpu_name(&g.product_name) == normalized_product
            })
            .count() as u64
    }

    /// Whether any GPU unit is currently available.
    pub fn any_gpu_available(&self) -> bool {
        self.gpus.iter().any(|g| g.status == GpuStatus::Available)
    }
}

/// Collects per-node snapshots from the orchestrator and the exporter.
pub struct SnapshotProvider {
    orchestrator: Arc<dyn Orchestrator>,
}

impl SnapshotProvider {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Collect a fresh snapshot of every node.
    pub async fn collect(&self) -> Result<Vec<NodeSnapshot>, OrchestratorError> {
        let nodes = self.orchestrator.list_nodes().await?;
        let running = self.orchestrator.list_running().await?;
        let reports = self.exporter_reports().await?;

        let mut snapshots = Vec::with_capacity(nodes.len());
        for node in nodes {
            // Scalar free capacity is derived, never stored: declared
            // allocatable minus the sum of running requests.
            let mut reserved = ResourceAmounts::default();
            for r in running.iter().filter(|r| r.node_name == node.name) {
                reserved = reserved.saturating_add(&r.requests);
            }
            let free = node.allocatable.saturating_sub(&reserved);

            let report = reports.get(&node.name);
            let cpu_name = report.map(|r| r.cpu_name.clone()).unwrap_or_default();
            let gpus = report
                .map(|r| rebuild_gpu_inventory(r, &running, &node.name))
                .unwrap_or_default();

            snapshots.push(NodeSnapshot {
                architecture: CpuArch::from_cpu_name(&cpu_name),
                cpu_name,
                allocatable: node.allocatable,
                free,
                gpus,
                name: node.name,
            });
        }
        Ok(snapshots)
    }

    /// Latest exporter report per node. Pods with unreadable or
    /// malformed logs are skipped.
    async fn exporter_reports(
        &self,
    ) -> Result<HashMap<String, HardwareReport>, OrchestratorError> {
        let pods = self
            .orchestrator
            .list_pods(EXPORTER_NAMESPACE, EXPORTER_LABEL)
            .await?;

        let mut reports = HashMap::new();
        for pod in pods {
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
            match exporter::parse_last_line(&log) {
                Some(report) => {
                    reports.insert(pod.node_name.clone(), report);
                }
                None => {
                    warn!(pod = %pod.name, node = %pod.node_name, "exporter output unusable");
                }
            }
        }
        Ok(reports)
    }
}

/// Recompute GPU availability from workload occupancy.
///
/// For each product, the number of available units is the
/// exporter-reported count minus the count of running workloads
/// scheduled against that product on this node (floored at zero); the
/// first `available` units of each product are marked Available, the
/// rest Occupied.
fn rebuild_gpu_inventory(
    report: &HardwareReport,
    running: &[crate::orchestrator::WorkloadReservation],
    node_name: &str,
) -> Vec<GpuUnit> {
    let mut totals: HashMap<String, u64> = HashMap::new();
    for detail in &report.gpu.details {
        *totals.entry(normalize_gpu_name(&detail.product_name)).or_default() += 1;
    }

    let mut occupied: HashMap<String, u64> = HashMap::new();
    for r in running.iter().filter(|r| r.node_name == node_name) {
        if let Some(product) = &r.gpu_product {
            *occupied.entry(product.clone()).or_default() += r.gpu_count;
        }
    }

    let mut remaining: HashMap<String, u64> = totals
        .iter()
        .map(|(product, total)| {
            let used = occupied.get(product).copied().unwrap_or(0);
            (product.clone(), total.saturating_sub(used))
        })
        .collect();

    report
        .gpu
        .details
        .iter()
        .map(|detail| {
            let key = normalize_gpu_name(&detail.product_name);
            let left = remaining.entry(key).or_default();
            let status = if *left > 0 {
                *left -= 1;
                GpuStatus::Available
            } else {
                GpuStatus::Occupied
            };
            GpuUnit {
                product_name: detail.product_name.clone(),
                status,
                driver_version: report.gpu.driver_version.clone(),
                cuda_version: report.gpu.cuda_version.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{MockOrchestrator, PodPhase, WorkloadReservation};

    const GI: u64 = 1024 * 1024 * 1024;

    const REPORT: &str = r#"{"cpu_name":"AMD EPYC 7543","cpu":{"free":"26","total":"32"},"memory":{"free":"180Gi","total":"256Gi"},"storage":{"free":"800Gi","total":"1000Gi"},"gpu":{"driver_version":"535","cuda_version":"12.2","attached_gpus":2,"details":[{"product_name":"NVIDIA GeForce RTX 3080","status":"Available"},{"product_name":"NVIDIA GeForce RTX 3080","status":"Available"}]}}"#;

    fn orchestrator_with_node() -> MockOrchestrator {
        let orch = MockOrchestrator::new();
        orch.add_node("node-a", ResourceAmounts::new(32, 256 * GI, 1000 * GI));
        orch.add_pod(
            EXPORTER_NAMESPACE,
            "exporter-a",
            "node-a",
            PodPhase::Running,
            &[("app", "resource-exporter")],
            REPORT,
        );
        orch
    }

    #[tokio::test]
    async fn free_capacity_is_allocatable_minus_requests() {
        let orch = orchestrator_with_node();
        orch.add_reservation(WorkloadReservation {
            node_name: "node-a".into(),
            namespace: "ns-x".into(),
            name: "deploy-x".into(),
            requests: ResourceAmounts::new(8, 64 * GI, 100 * GI),
            gpu_product: None,
            gpu_count: 0,
        });

        let provider = SnapshotProvider::new(Arc::new(orch));
        let snapshots = provider.collect().await.expect("collect");
        assert_eq!(snapshots.len(), 1);
        let node = &snapshots[0];
        assert_eq!(node.free, ResourceAmounts::new(24, 192 * GI, 900 * GI));
        assert_eq!(node.architecture, CpuArch::Amd);
    }

    #[tokio::test]
    async fn gpu_availability_reflects_occupancy() {
        let orch = orchestrator_with_node();
        orch.add_reservation(WorkloadReservation {
            node_name: "node-a".into(),
            namespace: "ns-x".into(),
            name: "deploy-gpu".into(),
            requests: ResourceAmounts::new(4, 16 * GI, 50 * GI),
            gpu_product: Some("NVIDIA-GEFORCE-RTX-3080".into()),
            gpu_count: 1,
        });

        let provider = SnapshotProvider::new(Arc::new(orch));
        let snapshots = provider.collect().await.expect("collect");
        let node = &snapshots[0];
        assert_eq!(node.available_gpu_count("NVIDIA-GEFORCE-RTX-3080"), 1);
        assert_eq!(
            node.gpus.iter().filter(|g| g.status == GpuStatus::Occupied).count(),
            1
        );
    }

    #[tokio::test]
    async fn full_occupancy_leaves_no_available_units() {
        let orch = orchestrator_with_node();
        orch.add_reservation(WorkloadReservation {
            node_name: "node-a".into(),
            namespace: "ns-x".into(),
            name: "deploy-gpu".into(),
            requests: ResourceAmounts::default(),
            gpu_product: Some("NVIDIA-GEFORCE-RTX-3080".into()),
            gpu_count: 2,
        });

        let provider = SnapshotProvider::new(Arc::new(orch));
        let snapshots = provider.collect().await.expect("collect");
        assert_eq!(snapshots[0].available_gpu_count("NVIDIA-GEFORCE-RTX-3080"), 0);
        assert!(!snapshots[0].any_gpu_available());
    }

    #[tokio::test]
    async fn node_without_exporter_report_has_no_gpus() {
        let orch = MockOrchestrator::new();
        orch.add_node("node-b", ResourceAmounts::new(8, 32 * GI, 100 * GI));

        let provider = SnapshotProvider::new(Arc::new(orch));
        let snapshots = provider.collect().await.expect("collect");
        assert!(snapshots[0].gpus.is_empty());
        assert_eq!(snapshots[0].architecture, CpuArch::Other);
    }

    #[tokio::test]
    async fn malformed_exporter_output_is_skipped() {
        let orch = MockOrchestrator::new();
        orch.add_node("node-a", ResourceAmounts::new(8, 32 * GI, 100 * GI));
        orch.add_pod(
            EXPORTER_NAMESPACE,
            "exporter-a",
            "node-a",
            PodPhase::Running,
            &[("app", "resource-exporter")],
            "ERROR:: nvml init failed",
        );

        let provider = SnapshotProvider::new(Arc::new(orch));
        let snapshots = provider.collect().await.expect("collect");
        // Scalar capacity still derives from the orchestrator view.
        assert_eq!(snapshots[0].free, ResourceAmounts::new(8, 32 * GI, 100 * GI));
        assert!(snapshots[0].gpus.is_empty());
    }
}
