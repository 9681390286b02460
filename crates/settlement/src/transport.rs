//! Chain transport abstraction.
//!
//! [`TaskChain`] is the async trait the settlement client talks through.
//! Implementations provide the actual RPC mechanism; the trait contract
//! keeps retry policy out of the transport:
//!
//! - Implementations MUST NOT retry internally.
//! - Implementations MUST map their error conditions onto
//!   [`ChainErrorKind`] so the client never inspects raw error strings.
//! - Deleting/submitting against a consumed nonce must surface as
//!   `NonceStale`; a same-nonce fee conflict as `PriceConflict`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

// ════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════

/// Classification of a chain-side failure.
///
/// The two nonce-related kinds drive the client's retry policy; anything
/// else is surfaced unretried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    /// A transaction with this nonce already exists at a higher fee.
    /// The cached nonce was consumed: advance locally and retry.
    PriceConflict,
    /// The chain reports the nonce is out of sequence. The cache is
    /// wrong: refresh from the chain and retry from scratch.
    NonceStale,
    /// Any other RPC or contract failure.
    Rpc,
}

/// A typed chain-side error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainError {
    pub kind: ChainErrorKind,
    pub message: String,
}

impl ChainError {
    pub fn rpc(message: impl Into<String>) -> Self {
        Self { kind: ChainErrorKind::Rpc, message: message.into() }
    }

    pub fn price_conflict(message: impl Into<String>) -> Self {
        Self { kind: ChainErrorKind::PriceConflict, message: message.into() }
    }

    pub fn nonce_stale(message: impl Into<String>) -> Self {
        Self { kind: ChainErrorKind::NonceStale, message: message.into() }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChainErrorKind::PriceConflict => write!(f, "price conflict: {}", self.message),
            ChainErrorKind::NonceStale => write!(f, "stale nonce: {}", self.message),
            ChainErrorKind::Rpc => write!(f, "chain rpc error: {}", self.message),
        }
    }
}

impl std::error::Error for ChainError {}

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

/// On-chain task record, as read from the task contract.
///
/// Transaction hashes are hex strings as stored by the contract; an
/// empty string means "not present".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInfo {
    pub reward_tx: String,
    pub challenge_tx: String,
    pub slash_tx: String,
}

/// One log entry from a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Async transport for task settlement.
#[async_trait]
pub trait TaskChain: Send + Sync {
    /// Currently suggested gas price, wei.
    async fn suggest_gas_price(&self) -> Result<u128, ChainError>;

    /// Chain identifier.
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Pending-nonce of `address`.
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Submit a proof to the task contract with an explicit nonce and
    /// fee cap. Returns the transaction hash. One attempt, no retry.
    async fn submit_proof(
        &self,
        contract: Address,
        proof: &str,
        nonce: u64,
        fee_cap: u128,
    ) -> Result<B256, ChainError>;

    /// Read the task contract's settlement record.
    async fn task_info(&self, contract: Address) -> Result<TaskInfo, ChainError>;

    /// Logs of a mined transaction's receipt.
    async fn receipt_logs(&self, tx: B256) -> Result<Vec<ReceiptLog>, ChainError>;
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// A record of one `submit_proof` call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedProof {
    pub contract: Address,
    pub proof: String,
    pub nonce: u64,
    pub fee_cap: u128,
}

/// Scripted transport for tests. Submit outcomes are consumed FIFO;
/// everything else is keyed state.
#[derive(Default)]
pub struct MockTaskChain {
    gas_price: Mutex<u128>,
    chain_id: Mutex<u64>,
    nonces: Mutex<HashMap<Address, u64>>,
    submit_outcomes: Mutex<Vec<Result<B256, ChainError>>>,
    submitted: Mutex<Vec<SubmittedProof>>,
    task_infos: Mutex<HashMap<Address, TaskInfo>>,
    receipts: Mutex<HashMap<B256, Vec<ReceiptLog>>>,
}

impl MockTaskChain {
    pub fn new() -> Self {
        let mock = Self::default();
        if let Ok(mut price) = mock.gas_price.lock() {
            *price = 1_000_000_000;
        }
        if let Ok(mut id) = mock.chain_id.lock() {
            *id = 2024;
        }
        mock
    }

    pub fn set_gas_price(&self, wei: u128) {
        if let Ok(mut price) = self.gas_price.lock() {
            *price = wei;
        }
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        if let Ok(mut nonces) = self.nonces.lock() {
            nonces.insert(address, nonce);
        }
    }

    /// Queue the outcome of the next `submit_proof` call.
    pub fn push_submit_outcome(&self, outcome: Result<B256, ChainError>) {
        if let Ok(mut queue) = self.submit_outcomes.lock() {
            queue.push(outcome);
        }
    }

    pub fn set_task_info(&self, contract: Address, info: TaskInfo) {
        if let Ok(mut infos) = self.task_infos.lock() {
            infos.insert(contract, info);
        }
    }

    pub fn set_receipt_logs(&self, tx: B256, logs: Vec<ReceiptLog>) {
        if let Ok(mut receipts) = self.receipts.lock() {
            receipts.insert(tx, logs);
        }
    }

    /// Every `submit_proof` call observed so far, in order.
    pub fn submitted(&self) -> Vec<SubmittedProof> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TaskChain for MockTaskChain {
    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        self.gas_price
            .lock()
            .map(|p| *p)
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.chain_id
            .lock()
            .map(|id| *id)
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonces = self
            .nonces
            .lock()
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))?;
        Ok(nonces.get(&address).copied().unwrap_or(0))
    }

    async fn submit_proof(
        &self,
        contract: Address,
        proof: &str,
        nonce: u64,
        fee_cap: u128,
    ) -> Result<B256, ChainError> {
        if let Ok(mut calls) = self.submitted.lock() {
            calls.push(SubmittedProof {
                contract,
                proof: proof.to_string(),
                nonce,
                fee_cap,
            });
        }
        let mut queue = self
            .submit_outcomes
            .lock()
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))?;
        if queue.is_empty() {
            return Err(ChainError::rpc("no scripted submit outcome"));
        }
        queue.remove(0)
    }

    async fn task_info(&self, contract: Address) -> Result<TaskInfo, ChainError> {
        let infos = self
            .task_infos
            .lock()
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))?;
        infos
            .get(&contract)
            .cloned()
            .ok_or_else(|| ChainError::rpc("no scripted task info"))
    }

    async fn receipt_logs(&self, tx: B256) -> Result<Vec<ReceiptLog>, ChainError> {
        let receipts = self
            .receipts
            .lock()
            .map_err(|e| ChainError::rpc(format!("mutex poisoned: {e}")))?;
        receipts
            .get(&tx)
            .cloned()
            .ok_or_else(|| ChainError::rpc("receipt not found"))
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<MockTaskChain>();
    }
    let _ = check;
};
