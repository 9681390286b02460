//! Agent configuration: a typed TOML file with environment overrides.
//!
//! The file is the source of truth; a handful of deployment-sensitive
//! values (hub token, chain private key) can be overridden through
//! environment variables so they never have to live on disk.

use std::path::Path;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Remote coordinator (hub) endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Base URL, e.g. "https://hub.example.net/api".
    pub server_url: String,
    /// Bearer token presented on every request.
    #[serde(default)]
    pub access_token: String,
    /// Wallet address reported as `public_address` in status reports.
    pub wallet_address: String,
}

/// Blockchain settlement endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChainConfig {
    /// JSON-RPC URL. Empty disables on-chain settlement (a mock
    /// transport is used instead).
    #[serde(default)]
    pub rpc_url: String,
    /// Hex-encoded private key of the worker identity.
    #[serde(default)]
    pub private_key: String,
    /// Address whose personal-sign signature authorizes task admission.
    #[serde(default)]
    pub engine_address: String,
}

/// Reconciliation loop intervals, seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopIntervals {
    #[serde(default = "default_status_flush")]
    pub status_flush_secs: u64,
    #[serde(default = "default_expiry_reaper")]
    pub expiry_reaper_secs: u64,
    #[serde(default = "default_namespace_gc")]
    pub namespace_gc_secs: u64,
    #[serde(default = "default_exporter_heal")]
    pub exporter_heal_secs: u64,
    #[serde(default = "default_reward_poll")]
    pub reward_poll_secs: u64,
    #[serde(default = "default_summary_report")]
    pub summary_report_secs: u64,
}

fn default_status_flush() -> u64 {
    3
}
fn default_expiry_reaper() -> u64 {
    5 * 60
}
fn default_namespace_gc() -> u64 {
    30 * 60
}
fn default_exporter_heal() -> u64 {
    2 * 60
}
fn default_reward_poll() -> u64 {
    3 * 60
}
fn default_summary_report() -> u64 {
    10
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            status_flush_secs: default_status_flush(),
            expiry_reaper_secs: default_expiry_reaper(),
            namespace_gc_secs: default_namespace_gc(),
            exporter_heal_secs: default_exporter_heal(),
            reward_poll_secs: default_reward_poll(),
            summary_report_secs: default_summary_report(),
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Stable node identifier reported to the hub and covered by the
    /// admission signature.
    pub node_id: String,
    /// Geographic region label for cluster summaries.
    #[serde(default = "default_region")]
    pub region: String,
    /// HTTP bind port for the agent API.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used to build the proof callback
    /// URL injected into task workloads.
    #[serde(default)]
    pub public_url: String,
    /// Orchestration backend selector. Only "mock" ships with the core;
    /// real backends implement the `Orchestrator` trait out of tree.
    #[serde(default = "default_backend")]
    pub backend: String,
    pub hub: HubConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub intervals: LoopIntervals,
}

fn default_region() -> String {
    "unknown".to_string()
}
fn default_port() -> u16 {
    8085
}
fn default_backend() -> String {
    "mock".to_string()
}

impl AgentConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let mut cfg: AgentConfig = toml::from_str(&raw)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Secrets may arrive through the environment instead of the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = env::var("CP_HUB_ACCESS_TOKEN") {
            self.hub.access_token = token;
        }
        if let Ok(key) = env::var("CP_CHAIN_PRIVATE_KEY") {
            self.chain.private_key = key;
        }
        if let Ok(rpc) = env::var("CP_CHAIN_RPC_URL") {
            self.chain.rpc_url = rpc;
        }
    }
}
