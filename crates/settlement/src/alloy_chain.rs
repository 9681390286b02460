//! JSON-RPC [`TaskChain`] implementation over `alloy`.
//!
//! Error classification happens here, at the transport boundary: the
//! node's RPC error text is mapped onto [`ChainErrorKind`] once, so the
//! settlement client only ever branches on the typed kind.

use std::fmt;
use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;

use crate::transport::{ChainError, ReceiptLog, TaskChain, TaskInfo};

sol! {
    #[sol(rpc)]
    contract ECPTask {
        struct TaskDetail {
            string rewardTx;
            string challengeTx;
            string slashTx;
        }

        function submitProof(string proof) external;
        function getTaskInfo() external view returns (TaskDetail detail);
    }
}

/// Map an RPC/contract failure onto a typed [`ChainError`].
///
/// Node implementations disagree on exact wording; the two nonce cases
/// cover the common geth/erigon phrasings.
fn classify(err: impl fmt::Display) -> ChainError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("replacement transaction underpriced")
        || lowered.contains("transaction underpriced")
    {
        ChainError::price_conflict(message)
    } else if lowered.contains("nonce too low")
        || lowered.contains("nonce too high")
        || lowered.contains("next nonce")
        || lowered.contains("invalid nonce")
    {
        ChainError::nonce_stale(message)
    } else {
        ChainError::rpc(message)
    }
}

/// Production transport bound to one RPC endpoint and one signing key.
pub struct AlloyTaskChain {
    url: Url,
    signer: PrivateKeySigner,
}

impl AlloyTaskChain {
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self, ChainError> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| ChainError::rpc(format!("invalid rpc url: {e}")))?;
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| ChainError::rpc(format!("invalid private key: {e}")))?;
        Ok(Self { url, signer })
    }

    /// Address of the signing identity.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn provider(&self) -> impl Provider + Clone {
        let wallet = EthereumWallet::from(self.signer.clone());
        ProviderBuilder::new().wallet(wallet).connect_http(self.url.clone())
    }
}

#[async_trait]
impl TaskChain for AlloyTaskChain {
    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        self.provider().get_gas_price().await.map_err(classify)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider().get_chain_id().await.map_err(classify)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.provider()
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(classify)
    }

    async fn submit_proof(
        &self,
        contract: Address,
        proof: &str,
        nonce: u64,
        fee_cap: u128,
    ) -> Result<B256, ChainError> {
        let provider = self.provider();
        let task = ECPTask::new(contract, provider);
        let pending = task
            .submitProof(proof.to_string())
            .nonce(nonce)
            .max_fee_per_gas(fee_cap)
            .send()
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn task_info(&self, contract: Address) -> Result<TaskInfo, ChainError> {
        let provider = self.provider();
        let task = ECPTask::new(contract, provider);
        let detail = task.getTaskInfo().call().await.map_err(classify)?;
        Ok(TaskInfo {
            reward_tx: detail.rewardTx,
            challenge_tx: detail.challengeTx,
            slash_tx: detail.slashTx,
        })
    }

    async fn receipt_logs(&self, tx: B256) -> Result<Vec<ReceiptLog>, ChainError> {
        let receipt = self
            .provider()
            .get_transaction_receipt(tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| ChainError::rpc(format!("no receipt for {tx}")))?;
        Ok(receipt
            .inner
            .logs()
            .iter()
            .map(|log| ReceiptLog {
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.to_vec(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChainErrorKind;

    #[test]
    fn classifies_price_conflicts() {
        let err = classify("replacement transaction underpriced");
        assert_eq!(err.kind, ChainErrorKind::PriceConflict);
    }

    #[test]
    fn classifies_stale_nonces() {
        for text in ["nonce too low", "expected next nonce 7", "invalid nonce"] {
            assert_eq!(classify(text).kind, ChainErrorKind::NonceStale, "{text}");
        }
    }

    #[test]
    fn classifies_everything_else_as_rpc() {
        assert_eq!(classify("connection refused").kind, ChainErrorKind::Rpc);
        assert_eq!(classify("execution reverted").kind, ChainErrorKind::Rpc);
    }

    #[test]
    fn rejects_bad_construction_input() {
        assert!(AlloyTaskChain::new("not a url", "00").is_err());
        assert!(AlloyTaskChain::new(
            "http://localhost:8545",
            "not-a-key"
        )
        .is_err());
    }

    #[test]
    fn accepts_valid_construction_input() {
        let chain = AlloyTaskChain::new(
            "http://localhost:8545",
            "4c0883a69102937d6231471b5dbb6204fe51296170827936ea5cce4b76994b0f",
        )
        .expect("valid inputs");
        assert_ne!(chain.address(), Address::ZERO);
    }
}
