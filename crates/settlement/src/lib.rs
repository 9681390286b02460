//! Blockchain settlement for proof tasks.
//!
//! The settlement path is split the way the node splits its chain
//! interaction elsewhere: a [`TaskChain`] transport trait decouples the
//! client from any specific RPC implementation, a [`MockTaskChain`] ships
//! for tests, and [`AlloyTaskChain`] is the JSON-RPC production
//! implementation.
//!
//! [`SettlementClient`] owns the policy: a per-identity cached nonce
//! guarded by a mutex, a bounded conflict-aware submit retry, and the
//! reward classification rules.

pub mod alloy_chain;
pub mod client;
pub mod transport;

pub use alloy_chain::AlloyTaskChain;
pub use client::{RewardReport, SettlementClient, SettlementIdentity, SubmitError,
    MAX_SUBMIT_ATTEMPTS};
pub use transport::{ChainError, ChainErrorKind, MockTaskChain, ReceiptLog, TaskChain, TaskInfo};
