//! Reward poller.
//!
//! Periodically classifies the settlement outcome of every submitted
//! task still awaiting one. Only this loop writes the settlement
//! sub-fields; the primary task status is never touched. An Unclaimed
//! classification leaves the task unchanged for the next pass.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Result;
use tracing::{info, warn};

use cpnet_settlement::SettlementClient;

use crate::store::TaskStore;

pub struct RewardPoller {
    tasks: Arc<dyn TaskStore>,
    settlement: Arc<SettlementClient>,
}

impl RewardPoller {
    pub fn new(tasks: Arc<dyn TaskStore>, settlement: Arc<SettlementClient>) -> Self {
        Self { tasks, settlement }
    }

    pub async fn run_once(&self) -> Result<()> {
        let pending = self.tasks.list_unrewarded()?;
        for mut task in pending {
            let contract = match Address::from_str(&task.contract_address) {
                Ok(contract) => contract,
                Err(err) => {
                    warn!(task_id = task.id, %err, "bad settlement contract address");
                    continue;
                }
            };
            let report = match self.settlement.reward_status(contract).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(task_id = task.id, %err, "reward classification failed");
                    continue;
                }
            };
            if !report.state.is_final() {
                // Still unclaimed: poll again next pass.
                continue;
            }

            info!(task_id = task.id, state = %report.state, amount = %report.amount, "task settled");
            task.reward_state = report.state;
            task.reward_tx = report.reward_tx;
            task.challenge_tx = report.challenge_tx;
            task.slash_tx = report.slash_tx;
            task.reward_amount = report.amount;
            self.tasks.save(task)?;
        }
        Ok(())
    }
}
