//! Settlement client: nonce-safe proof submission and reward
//! classification.
//!
//! ## Nonce discipline
//!
//! One [`SettlementIdentity`] caches one nonce behind a
//! `tokio::sync::Mutex`. The lock is held for the whole of a submission,
//! so no two submissions from the same identity are ever in flight
//! concurrently and submissions are strictly nonce-ordered. The cached
//! value is advanced only when the chain confirms the previous value was
//! consumed: a successful send, or a price conflict (someone else holds
//! that nonce at a higher fee). A stale-nonce report refreshes the cache
//! from the chain and bubbles up for the caller to retry from scratch.

use std::sync::Arc;

use alloy::primitives::{utils::format_ether, Address, B256, U256};
use alloy::sol_types::SolEvent;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cpnet_common::RewardState;

use crate::transport::{ChainError, ChainErrorKind, TaskChain, TaskInfo};

alloy::sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Upper bound on same-call submission attempts under price conflicts.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Fee cap multiplier over the suggested gas price: 3/2.
const FEE_CAP_NUM: u128 = 3;
const FEE_CAP_DEN: u128 = 2;

// ════════════════════════════════════════════════════════════════════════════
// IDENTITY
// ════════════════════════════════════════════════════════════════════════════

/// A chain-facing identity with a locally cached nonce.
pub struct SettlementIdentity {
    address: Address,
    /// `None` until refreshed from the chain on first use.
    nonce: Mutex<Option<u64>>,
}

impl SettlementIdentity {
    pub fn new(address: Address) -> Self {
        Self { address, nonce: Mutex::new(None) }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The chain reported the cached nonce out of sequence. The cache
    /// has been refreshed; the caller retries the submission from
    /// scratch.
    #[error("cached nonce was stale; refreshed from chain, retry the submission")]
    NonceRefreshed,

    /// Every allowed attempt hit a price conflict.
    #[error("proof submission gave up after {attempts} price-conflict attempts")]
    AttemptsExhausted { attempts: u32 },

    /// Any other chain failure, surfaced unretried.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

// ════════════════════════════════════════════════════════════════════════════
// REWARD REPORT
// ════════════════════════════════════════════════════════════════════════════

/// Outcome of a reward-classification pass for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardReport {
    pub state: RewardState,
    pub reward_tx: String,
    pub challenge_tx: String,
    pub slash_tx: String,
    /// Decimal token amount, e.g. "5.0". "0.0" unless `Rewarded`.
    pub amount: String,
}

impl RewardReport {
    fn unclaimed() -> Self {
        Self {
            state: RewardState::Unclaimed,
            reward_tx: String::new(),
            challenge_tx: String::new(),
            slash_tx: String::new(),
            amount: "0.0".to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// Settlement policy over a pluggable [`TaskChain`] transport.
pub struct SettlementClient {
    chain: Arc<dyn TaskChain>,
    identity: Arc<SettlementIdentity>,
}

impl SettlementClient {
    pub fn new(chain: Arc<dyn TaskChain>, identity: Arc<SettlementIdentity>) -> Self {
        Self { chain, identity }
    }

    pub fn identity(&self) -> &SettlementIdentity {
        &self.identity
    }

    /// Submit a proof to `contract`, returning the transaction hash.
    ///
    /// Holds the identity's nonce lock for the whole call. Price
    /// conflicts advance the nonce and retry, bounded by
    /// [`MAX_SUBMIT_ATTEMPTS`]; a stale nonce refreshes the cache and
    /// returns [`SubmitError::NonceRefreshed`]; other chain errors are
    /// surfaced unretried.
    pub async fn submit_proof(
        &self,
        contract: Address,
        proof: &str,
    ) -> Result<B256, SubmitError> {
        let mut cached = self.identity.nonce.lock().await;
        let mut nonce = match *cached {
            Some(n) => n,
            None => {
                let fetched = self.chain.pending_nonce(self.identity.address).await?;
                *cached = Some(fetched);
                fetched
            }
        };

        let gas_price = self.chain.suggest_gas_price().await?;
        let fee_cap = gas_price.saturating_mul(FEE_CAP_NUM) / FEE_CAP_DEN;

        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            match self.chain.submit_proof(contract, proof, nonce, fee_cap).await {
                Ok(tx_hash) => {
                    *cached = Some(nonce + 1);
                    debug!(%contract, nonce, %tx_hash, "proof submitted");
                    return Ok(tx_hash);
                }
                Err(err) => match err.kind {
                    ChainErrorKind::PriceConflict => {
                        warn!(
                            %contract, nonce, attempt,
                            "nonce consumed by a higher-fee transaction, advancing"
                        );
                        nonce += 1;
                        *cached = Some(nonce);
                    }
                    ChainErrorKind::NonceStale => {
                        let fresh = self.chain.pending_nonce(self.identity.address).await?;
                        warn!(%contract, stale = nonce, fresh, "nonce cache refreshed");
                        *cached = Some(fresh);
                        return Err(SubmitError::NonceRefreshed);
                    }
                    ChainErrorKind::Rpc => return Err(SubmitError::Chain(err)),
                },
            }
        }
        Err(SubmitError::AttemptsExhausted { attempts: MAX_SUBMIT_ATTEMPTS })
    }

    /// Classify the reward outcome of the task settled at `contract`.
    ///
    /// Precedence: challenge, then slash, then reward; none present is
    /// `Unclaimed` ("poll again later"). For a reward, the amount is the
    /// value carried by the token `Transfer` event in the reward
    /// transaction's receipt; log entries that do not match the event
    /// signature, carry a topic count other than three, or fail to
    /// decode are skipped.
    pub async fn reward_status(&self, contract: Address) -> Result<RewardReport, ChainError> {
        let info = self.chain.task_info(contract).await?;

        if !info.challenge_tx.is_empty() {
            return Ok(RewardReport {
                state: RewardState::Challenged,
                challenge_tx: info.challenge_tx,
                ..RewardReport::unclaimed()
            });
        }
        if !info.slash_tx.is_empty() {
            return Ok(RewardReport {
                state: RewardState::Slashed,
                slash_tx: info.slash_tx,
                ..RewardReport::unclaimed()
            });
        }
        if info.reward_tx.is_empty() {
            return Ok(RewardReport::unclaimed());
        }

        let amount = self.decode_reward_amount(&info).await?;
        Ok(RewardReport {
            state: RewardState::Rewarded,
            reward_tx: info.reward_tx,
            amount,
            ..RewardReport::unclaimed()
        })
    }

    async fn decode_reward_amount(&self, info: &TaskInfo) -> Result<String, ChainError> {
        let tx: B256 = info
            .reward_tx
            .parse()
            .map_err(|e| ChainError::rpc(format!("bad reward tx hash: {e}")))?;
        let logs = self.chain.receipt_logs(tx).await?;

        let mut amount = "0.0".to_string();
        for log in logs {
            if log.topics.len() != 3 || log.topics[0] != Transfer::SIGNATURE_HASH {
                continue;
            }
            if log.data.len() != 32 {
                continue;
            }
            let value = U256::from_be_slice(&log.data);
            amount = format_token_amount(value);
        }
        Ok(amount)
    }
}

/// Render an 18-decimals token amount as a short decimal string:
/// 5 * 10^18 becomes "5.0", 1.5 * 10^18 becomes "1.5".
fn format_token_amount(value: U256) -> String {
    let full = format_ether(value);
    let trimmed = full.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTaskChain, ReceiptLog};

    fn contract() -> Address {
        Address::repeat_byte(0xCE)
    }

    fn identity_addr() -> Address {
        Address::repeat_byte(0x11)
    }

    fn client_with(mock: Arc<MockTaskChain>) -> SettlementClient {
        SettlementClient::new(mock, Arc::new(SettlementIdentity::new(identity_addr())))
    }

    fn ether(units: u64) -> U256 {
        U256::from(units) * U256::from(10u64).pow(U256::from(18))
    }

    fn transfer_log(value: U256) -> ReceiptLog {
        ReceiptLog {
            topics: vec![
                Transfer::SIGNATURE_HASH,
                B256::left_padding_from(identity_addr().as_slice()),
                B256::left_padding_from(contract().as_slice()),
            ],
            data: value.to_be_bytes::<32>().to_vec(),
        }
    }

    // ── Submission ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_use_fetches_pending_nonce() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_pending_nonce(identity_addr(), 7);
        mock.push_submit_outcome(Ok(B256::repeat_byte(1)));

        let client = client_with(mock.clone());
        let hash = client.submit_proof(contract(), "proof").await.expect("submit");
        assert_eq!(hash, B256::repeat_byte(1));

        let calls = mock.submitted();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].nonce, 7);
        assert_eq!(calls[0].proof, "proof");
    }

    #[tokio::test]
    async fn fee_cap_is_one_and_a_half_times_gas_price() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_gas_price(2_000_000_000);
        mock.push_submit_outcome(Ok(B256::repeat_byte(1)));

        let client = client_with(mock.clone());
        client.submit_proof(contract(), "p").await.expect("submit");
        assert_eq!(mock.submitted()[0].fee_cap, 3_000_000_000);
    }

    #[tokio::test]
    async fn price_conflict_increments_nonce_and_retries() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_pending_nonce(identity_addr(), 4);
        mock.push_submit_outcome(Err(ChainError::price_conflict("underpriced")));
        mock.push_submit_outcome(Ok(B256::repeat_byte(2)));

        let client = client_with(mock.clone());
        let hash = client.submit_proof(contract(), "p").await.expect("submit");
        assert_eq!(hash, B256::repeat_byte(2));

        let calls = mock.submitted();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].nonce, 4);
        assert_eq!(calls[1].nonce, 5);
    }

    #[tokio::test]
    async fn retry_is_bounded() {
        let mock = Arc::new(MockTaskChain::new());
        for _ in 0..MAX_SUBMIT_ATTEMPTS {
            mock.push_submit_outcome(Err(ChainError::price_conflict("underpriced")));
        }

        let client = client_with(mock.clone());
        let err = client.submit_proof(contract(), "p").await.unwrap_err();
        assert!(matches!(err, SubmitError::AttemptsExhausted { attempts } if attempts == MAX_SUBMIT_ATTEMPTS));
        assert_eq!(mock.submitted().len() as u32, MAX_SUBMIT_ATTEMPTS);
    }

    #[tokio::test]
    async fn stale_nonce_refreshes_cache_and_surfaces() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_pending_nonce(identity_addr(), 3);
        mock.push_submit_outcome(Ok(B256::repeat_byte(1)));
        let client = client_with(mock.clone());

        // Prime the cache: first submission consumes nonce 3.
        client.submit_proof(contract(), "p").await.expect("first submit");

        // The chain moves past our cache (another sender used 4..8).
        mock.set_pending_nonce(identity_addr(), 9);
        mock.push_submit_outcome(Err(ChainError::nonce_stale("nonce too low")));
        let err = client.submit_proof(contract(), "p").await.unwrap_err();
        assert!(matches!(err, SubmitError::NonceRefreshed));
        assert_eq!(mock.submitted().last().unwrap().nonce, 4, "stale cache was used once");

        // The refreshed cache is used when the caller retries.
        mock.push_submit_outcome(Ok(B256::repeat_byte(3)));
        client.submit_proof(contract(), "p").await.expect("retry");
        assert_eq!(mock.submitted().last().unwrap().nonce, 9);
    }

    #[tokio::test]
    async fn other_chain_errors_are_not_retried() {
        let mock = Arc::new(MockTaskChain::new());
        mock.push_submit_outcome(Err(ChainError::rpc("connection refused")));

        let client = client_with(mock.clone());
        let err = client.submit_proof(contract(), "p").await.unwrap_err();
        assert!(matches!(err, SubmitError::Chain(_)));
        assert_eq!(mock.submitted().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_never_reuse_a_nonce() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_pending_nonce(identity_addr(), 10);
        mock.push_submit_outcome(Ok(B256::repeat_byte(1)));
        mock.push_submit_outcome(Ok(B256::repeat_byte(2)));

        let client = Arc::new(client_with(mock.clone()));
        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.submit_proof(contract(), "a").await })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.submit_proof(contract(), "b").await })
        };
        a.await.expect("join").expect("submit a");
        b.await.expect("join").expect("submit b");

        let calls = mock.submitted();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].nonce, calls[1].nonce);
        assert_eq!(calls[1].nonce, calls[0].nonce + 1);
    }

    // ── Classification ──────────────────────────────────────────────────

    #[tokio::test]
    async fn challenge_takes_precedence_over_everything() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_task_info(
            contract(),
            TaskInfo {
                reward_tx: format!("{}", B256::repeat_byte(5)),
                challenge_tx: "0xchallenge".to_string(),
                slash_tx: "0xslash".to_string(),
            },
        );

        let client = client_with(mock);
        let report = client.reward_status(contract()).await.expect("status");
        assert_eq!(report.state, RewardState::Challenged);
        assert_eq!(report.challenge_tx, "0xchallenge");
        assert_eq!(report.amount, "0.0");
    }

    #[tokio::test]
    async fn slash_beats_reward() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_task_info(
            contract(),
            TaskInfo {
                reward_tx: format!("{}", B256::repeat_byte(5)),
                slash_tx: "0xslash".to_string(),
                ..TaskInfo::default()
            },
        );

        let client = client_with(mock);
        let report = client.reward_status(contract()).await.expect("status");
        assert_eq!(report.state, RewardState::Slashed);
        assert_eq!(report.slash_tx, "0xslash");
    }

    #[tokio::test]
    async fn reward_decodes_transfer_amount() {
        let mock = Arc::new(MockTaskChain::new());
        let reward_tx = B256::repeat_byte(5);
        mock.set_task_info(
            contract(),
            TaskInfo { reward_tx: format!("{reward_tx}"), ..TaskInfo::default() },
        );
        mock.set_receipt_logs(reward_tx, vec![transfer_log(ether(5))]);

        let client = client_with(mock);
        let report = client.reward_status(contract()).await.expect("status");
        assert_eq!(report.state, RewardState::Rewarded);
        assert_eq!(report.amount, "5.0");
    }

    #[tokio::test]
    async fn malformed_logs_are_skipped() {
        let mock = Arc::new(MockTaskChain::new());
        let reward_tx = B256::repeat_byte(6);
        mock.set_task_info(
            contract(),
            TaskInfo { reward_tx: format!("{reward_tx}"), ..TaskInfo::default() },
        );
        let two_topics = ReceiptLog {
            topics: vec![Transfer::SIGNATURE_HASH, B256::repeat_byte(1)],
            data: ether(9).to_be_bytes::<32>().to_vec(),
        };
        let wrong_signature = ReceiptLog {
            topics: vec![B256::repeat_byte(7), B256::ZERO, B256::ZERO],
            data: ether(9).to_be_bytes::<32>().to_vec(),
        };
        let short_data = ReceiptLog {
            topics: vec![Transfer::SIGNATURE_HASH, B256::ZERO, B256::ZERO],
            data: vec![1, 2, 3],
        };
        mock.set_receipt_logs(
            reward_tx,
            vec![two_topics, wrong_signature, short_data, transfer_log(ether(2))],
        );

        let client = client_with(mock);
        let report = client.reward_status(contract()).await.expect("status");
        assert_eq!(report.state, RewardState::Rewarded);
        assert_eq!(report.amount, "2.0");
    }

    #[tokio::test]
    async fn nothing_present_is_unclaimed() {
        let mock = Arc::new(MockTaskChain::new());
        mock.set_task_info(contract(), TaskInfo::default());

        let client = client_with(mock);
        let report = client.reward_status(contract()).await.expect("status");
        assert_eq!(report.state, RewardState::Unclaimed);
        assert_eq!(report.amount, "0.0");
    }

    #[test]
    fn token_amount_formatting() {
        assert_eq!(format_token_amount(ether(5)), "5.0");
        assert_eq!(format_token_amount(U256::ZERO), "0.0");
        let one_and_a_half = ether(3) / U256::from(2);
        assert_eq!(format_token_amount(one_and_a_half), "1.5");
    }
}
