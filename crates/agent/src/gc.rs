//! Namespace garbage collection.
//!
//! Agent-created namespaces with nothing running in them are deleted;
//! foreign namespaces are never touched. Each pass ends with a generic
//! backend cleanup.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use cpnet_common::prefix;

use crate::orchestrator::Orchestrator;

pub struct NamespaceGc {
    orchestrator: Arc<dyn Orchestrator>,
}

impl NamespaceGc {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn run_once(&self) -> Result<()> {
        let namespaces = self.orchestrator.list_namespaces().await?;
        for namespace in namespaces {
            let agent_owned = namespace.starts_with(prefix::NAMESPACE)
                || namespace.starts_with(prefix::TASK_NAMESPACE);
            if !agent_owned {
                continue;
            }
            match self.orchestrator.has_active_workloads(&namespace).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(%namespace, "empty namespace collected");
                    if let Err(err) = self.orchestrator.delete_namespace(&namespace).await {
                        warn!(%namespace, %err, "namespace delete failed");
                    }
                }
                Err(err) => warn!(%namespace, %err, "namespace activity query failed"),
            }
        }
        self.orchestrator.cleanup().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{MockOrchestrator, PodPhase, WorkloadSpec};
    use cpnet_common::ResourceAmounts;

    fn spec(ns: &str, name: &str) -> WorkloadSpec {
        WorkloadSpec {
            namespace: ns.to_string(),
            name: name.to_string(),
            image: "img".to_string(),
            node_name: String::new(),
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
    async fn collects_only_empty_agent_namespaces() {
        let orch = Arc::new(MockOrchestrator::new());
        orch.ensure_namespace("ns-0xempty").await.unwrap();
        orch.ensure_namespace("ubi-task-9").await.unwrap();
        orch.ensure_namespace("ns-0xbusy").await.unwrap();
        orch.create_workload(&spec("ns-0xbusy", "deploy-x")).await.unwrap();
        orch.ensure_namespace("kube-system").await.unwrap();
        orch.add_pod("kube-system", "core-dns", "node-a", PodPhase::Running, &[], "");

        let gc = NamespaceGc::new(orch.clone());
        gc.run_once().await.expect("pass");

        let remaining = orch.namespaces();
        assert!(remaining.contains(&"ns-0xbusy".to_string()));
        assert!(remaining.contains(&"kube-system".to_string()));
        assert!(!remaining.contains(&"ns-0xempty".to_string()));
        assert!(!remaining.contains(&"ubi-task-9".to_string()));
        assert_eq!(orch.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn foreign_empty_namespaces_are_left_alone() {
        let orch = Arc::new(MockOrchestrator::new());
        orch.ensure_namespace("default").await.unwrap();

        let gc = NamespaceGc::new(orch.clone());
        gc.run_once().await.expect("pass");
        assert!(orch.namespaces().contains(&"default".to_string()));
    }
}
