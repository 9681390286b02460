//! Cluster summary reporting.
//!
//! Pushes the current node snapshot to the hub so the coordinator can
//! route work at this provider. Failures are left to the next tick.

use std::sync::Arc;

use anyhow::Result;

use crate::hub::{ClusterSummary, HubApi};
use crate::snapshot::SnapshotProvider;

pub struct SummaryReporter {
    snapshots: Arc<SnapshotProvider>,
    hub: Arc<dyn HubApi>,
    node_id: String,
    region: String,
    wallet_address: String,
}

impl SummaryReporter {
    pub fn new(
        snapshots: Arc<SnapshotProvider>,
        hub: Arc<dyn HubApi>,
        node_id: String,
        region: String,
        wallet_address: String,
    ) -> Self {
        Self { snapshots, hub, node_id, region, wallet_address }
    }

    pub async fn run_once(&self) -> Result<()> {
        let cluster_info = self.snapshots.collect().await?;
        let summary = ClusterSummary {
            node_id: self.node_id.clone(),
            region: self.region.clone(),
            cluster_info,
            public_address: self.wallet_address.clone(),
        };
        self.hub.report_summary(&summary).await
    }
}
