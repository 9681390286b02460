//! Orchestration backend abstraction.
//!
//! [`Orchestrator`] is the async trait the scheduling core talks
//! through. Construction of real backend objects (deployment specs,
//! services, ingresses) belongs to the backend integration, not here;
//! the trait captures only the operations the core consumes. A
//! [`MockOrchestrator`] ships with the crate for tests and for running
//! the agent without a cluster.
//!
//! ## Contract
//!
//! - Deletes are idempotent: deleting an absent resource is `Ok`.
//! - Implementations MUST NOT retry internally.
//! - `list_running` reports the *requests* of currently running
//!   workloads; free capacity is derived, never stored.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use cpnet_common::ResourceAmounts;

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// Pod lifecycle phase as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Declared allocatable capacity of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCapacity {
    pub name: String,
    pub allocatable: ResourceAmounts,
}

/// The reservation held by one currently running workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReservation {
    pub node_name: String,
    pub namespace: String,
    pub name: String,
    pub requests: ResourceAmounts,
    /// Normalized GPU product name the workload is scheduled against.
    pub gpu_product: Option<String>,
    pub gpu_count: u64,
}

/// Everything needed to instantiate one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub image: String,
    /// Target node chosen by the matcher; empty lets the backend pick.
    pub node_name: String,
    /// Node-selector label, the normalized GPU product name.
    pub node_selector: Option<String>,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub requests: ResourceAmounts,
    pub limits: ResourceAmounts,
    pub gpu_request: u64,
    pub gpu_limit: u64,
    /// Label `(key, value)` stamped on the workload's pods for
    /// selection.
    pub label: (String, String),
}

/// One pod, as listed by label or namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub node_name: String,
    pub phase: PodPhase,
}

// ════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), OrchestratorError>;

    /// Delete a namespace and everything in it. Absent is `Ok`.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), OrchestratorError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, OrchestratorError>;

    /// Whether any workload or pod still lives in the namespace.
    async fn has_active_workloads(&self, namespace: &str) -> Result<bool, OrchestratorError>;

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError>;

    /// Delete a workload object. Absent is `Ok`.
    async fn delete_workload(&self, namespace: &str, name: &str)
        -> Result<(), OrchestratorError>;

    async fn workload_exists(&self, namespace: &str, name: &str)
        -> Result<bool, OrchestratorError>;

    /// Phase of the first pod matching `label_selector` ("key=value"),
    /// `None` when nothing matches.
    async fn workload_phase(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Option<PodPhase>, OrchestratorError>;

    /// Expose a workload's port. Returns the reachable endpoint.
    async fn create_service(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<String, OrchestratorError>;

    /// Delete an exposed service. Absent is `Ok`.
    async fn delete_service(&self, namespace: &str, name: &str)
        -> Result<(), OrchestratorError>;

    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, OrchestratorError>;

    /// Reservations of all currently running workloads, cluster-wide.
    async fn list_running(&self) -> Result<Vec<WorkloadReservation>, OrchestratorError>;

    /// Pods matching `label_selector` ("key=value") in a namespace.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, OrchestratorError>;

    /// Last line of a pod's log stream.
    async fn pod_last_log_line(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<String, OrchestratorError>;

    /// Delete a pod (the backend reschedules it). Absent is `Ok`.
    async fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), OrchestratorError>;

    /// Generic backend cleanup pass (dangling images, stopped
    /// containers).
    async fn cleanup(&self) -> Result<(), OrchestratorError>;
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct MockPod {
    namespace: String,
    name: String,
    node_name: String,
    phase: PodPhase,
    labels: Vec<(String, String)>,
    last_log: String,
}

#[derive(Default)]
struct MockState {
    namespaces: BTreeSet<String>,
    workloads: HashMap<(String, String), WorkloadSpec>,
    services: BTreeSet<(String, String)>,
    nodes: Vec<NodeCapacity>,
    running: Vec<WorkloadReservation>,
    pods: Vec<MockPod>,
    deleted_namespaces: Vec<String>,
    deleted_pods: Vec<String>,
    cleanup_calls: u64,
    /// When set, the next create_workload call fails once.
    fail_next_create: bool,
}

/// In-memory orchestrator for tests and cluster-less runs.
#[derive(Default)]
pub struct MockOrchestrator {
    state: Mutex<MockState>,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, allocatable: ResourceAmounts) {
        self.state.lock().nodes.push(NodeCapacity { name: name.to_string(), allocatable });
    }

    pub fn add_reservation(&self, reservation: WorkloadReservation) {
        self.state.lock().running.push(reservation);
    }

    pub fn add_pod(
        &self,
        namespace: &str,
        name: &str,
        node_name: &str,
        phase: PodPhase,
        labels: &[(&str, &str)],
        last_log: &str,
    ) {
        self.state.lock().pods.push(MockPod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            node_name: node_name.to_string(),
            phase,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            last_log: last_log.to_string(),
        });
    }

    pub fn set_pod_log(&self, namespace: &str, pod: &str, last_log: &str) {
        let mut state = self.state.lock();
        if let Some(p) = state
            .pods
            .iter_mut()
            .find(|p| p.namespace == namespace && p.name == pod)
        {
            p.last_log = last_log.to_string();
        }
    }

    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadSpec> {
        self.state
            .lock()
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.iter().cloned().collect()
    }

    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state.lock().deleted_namespaces.clone()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().deleted_pods.clone()
    }

    pub fn cleanup_calls(&self) -> u64 {
        self.state.lock().cleanup_calls
    }

    fn selector_matches(pod: &MockPod, selector: &str) -> bool {
        match selector.split_once('=') {
            Some((k, v)) => pod.labels.iter().any(|(lk, lv)| lk == k && lv == v),
            None => pod.labels.iter().any(|(lk, _)| lk == selector),
        }
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), OrchestratorError> {
        self.state.lock().namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.namespaces.remove(namespace);
        state.workloads.retain(|(ns, _), _| ns != namespace);
        state.services.retain(|(ns, _)| ns != namespace);
        state.pods.retain(|p| p.namespace != namespace);
        state.deleted_namespaces.push(namespace.to_string());
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.state.lock().namespaces.iter().cloned().collect())
    }

    async fn has_active_workloads(&self, namespace: &str) -> Result<bool, OrchestratorError> {
        let state = self.state.lock();
        let has_workload = state.workloads.keys().any(|(ns, _)| ns == namespace);
        let has_pod = state.pods.iter().any(|p| p.namespace == namespace);
        Ok(has_workload || has_pod)
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        if state.fail_next_create {
            state.fail_next_create = false;
            return Err(OrchestratorError::Backend("injected create failure".into()));
        }
        if !state.namespaces.contains(&spec.namespace) {
            return Err(OrchestratorError::Backend(format!(
                "namespace {} does not exist",
                spec.namespace
            )));
        }
        state
            .workloads
            .insert((spec.namespace.clone(), spec.name.clone()), spec.clone());
        Ok(())
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.state
            .lock()
            .workloads
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn workload_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, OrchestratorError> {
        Ok(self
            .state
            .lock()
            .workloads
            .contains_key(&(namespace.to_string(), name.to_string())))
    }

    async fn workload_phase(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Option<PodPhase>, OrchestratorError> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .find(|p| p.namespace == namespace && Self::selector_matches(p, label_selector))
            .map(|p| p.phase))
    }

    async fn create_service(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<String, OrchestratorError> {
        self.state
            .lock()
            .services
            .insert((namespace.to_string(), name.to_string()));
        Ok(format!("http://{name}.{namespace}.svc:{port}"))
    }

    async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.state
            .lock()
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, OrchestratorError> {
        Ok(self.state.lock().nodes.clone())
    }

    async fn list_running(&self) -> Result<Vec<WorkloadReservation>, OrchestratorError> {
        Ok(self.state.lock().running.clone())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, OrchestratorError> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace == namespace && Self::selector_matches(p, label_selector))
            .map(|p| PodInfo {
                name: p.name.clone(),
                node_name: p.node_name.clone(),
                phase: p.phase,
            })
            .collect())
    }

    async fn pod_last_log_line(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<String, OrchestratorError> {
        let state = self.state.lock();
        state
            .pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == pod)
            .map(|p| p.last_log.clone())
            .ok_or_else(|| OrchestratorError::Backend(format!("pod {pod} not found")))
    }

    async fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.pods.retain(|p| !(p.namespace == namespace && p.name == pod));
        state.deleted_pods.push(pod.to_string());
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        self.state.lock().cleanup_calls += 1;
        Ok(())
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<MockOrchestrator>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ns: &str, name: &str) -> WorkloadSpec {
        WorkloadSpec {
            namespace: ns.to_string(),
            name: name.to_string(),
            image: "img:v1".to_string(),
            node_name: "node-a".to_string(),
            node_selector: None,
            command: vec![],
            env: vec![],
            requests: ResourceAmounts::default(),
            limits: ResourceAmounts::default(),
            gpu_request: 0,
            gpu_limit: 0,
            label: ("lad_app".to_string(), name.to_string()),
        }
    }

    #[tokio::test]
    async fn workload_requires_namespace() {
        let orch = MockOrchestrator::new();
        assert!(orch.create_workload(&spec("ns-a", "deploy-1")).await.is_err());

        orch.ensure_namespace("ns-a").await.unwrap();
        orch.create_workload(&spec("ns-a", "deploy-1")).await.unwrap();
        assert!(orch.workload_exists("ns-a", "deploy-1").await.unwrap());
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let orch = MockOrchestrator::new();
        orch.delete_workload("ns-a", "gone").await.unwrap();
        orch.delete_service("ns-a", "gone").await.unwrap();
        orch.delete_namespace("ns-a").await.unwrap();
        orch.delete_pod("ns-a", "gone").await.unwrap();
    }

    #[tokio::test]
    async fn namespace_activity_tracks_workloads_and_pods() {
        let orch = MockOrchestrator::new();
        orch.ensure_namespace("ns-a").await.unwrap();
        assert!(!orch.has_active_workloads("ns-a").await.unwrap());

        orch.create_workload(&spec("ns-a", "deploy-1")).await.unwrap();
        assert!(orch.has_active_workloads("ns-a").await.unwrap());

        orch.delete_workload("ns-a", "deploy-1").await.unwrap();
        assert!(!orch.has_active_workloads("ns-a").await.unwrap());
    }

    #[tokio::test]
    async fn pod_selection_by_label() {
        let orch = MockOrchestrator::new();
        orch.add_pod(
            "kube-system",
            "exporter-1",
            "node-a",
            PodPhase::Running,
            &[("app", "resource-exporter")],
            "{}",
        );
        orch.add_pod("kube-system", "other", "node-a", PodPhase::Running, &[], "");

        let pods = orch
            .list_pods("kube-system", "app=resource-exporter")
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "exporter-1");
    }
}
