//! Agent entry point.
//!
//! Bootstraps configuration, wires the service graph, starts the
//! reconciliation supervisor and serves the HTTP API until interrupted.
//!
//! ```text
//! cpnet-agent [config.toml]       # or CP_CONFIG=/path/to/config.toml
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cpnet_common::AgentConfig;
use cpnet_settlement::{
    AlloyTaskChain, MockTaskChain, SettlementClient, SettlementIdentity, TaskChain,
};

use cpnet_agent::{
    build_router, AppState, ExpiryReaper, ExporterHeal, FlightTracker, HubApi, HubClient,
    JobService, MemJobStore, MemMetaStore, MemTaskStore, MockOrchestrator, NamespaceGc,
    Orchestrator, RewardPoller, SnapshotProvider, StatusFlush, SummaryReporter, Supervisor,
    TaskService, TaskServiceConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CP_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;
    info!(node_id = %config.node_id, region = %config.region, "computing-provider agent starting");

    // Orchestration backend. Only the mock ships with the core; a real
    // backend implements the Orchestrator trait and is wired here.
    let orchestrator: Arc<dyn Orchestrator> = match config.backend.as_str() {
        "mock" => Arc::new(MockOrchestrator::new()),
        other => anyhow::bail!("unsupported orchestration backend {other:?}"),
    };

    // Settlement transport: real JSON-RPC when configured, mock
    // otherwise.
    let (chain, identity_address): (Arc<dyn TaskChain>, Address) =
        if config.chain.rpc_url.is_empty() {
            warn!("no chain rpc configured, settlement runs against the mock transport");
            (Arc::new(MockTaskChain::new()), Address::ZERO)
        } else {
            let alloy_chain = AlloyTaskChain::new(&config.chain.rpc_url, &config.chain.private_key)
                .map_err(|e| anyhow::anyhow!("chain transport setup failed: {e}"))?;
            let address = alloy_chain.address();
            info!(%address, "settlement identity ready");
            (Arc::new(alloy_chain), address)
        };
    let settlement = Arc::new(SettlementClient::new(
        chain,
        Arc::new(SettlementIdentity::new(identity_address)),
    ));

    let engine_address = if config.chain.engine_address.is_empty() {
        None
    } else {
        Some(
            Address::from_str(&config.chain.engine_address)
                .context("parsing chain.engine_address")?,
        )
    };

    let hub: Arc<dyn HubApi> = Arc::new(HubClient::new(
        config.hub.server_url.clone(),
        config.hub.access_token.clone(),
        config.hub.wallet_address.clone(),
    ));

    let task_store = Arc::new(MemTaskStore::new());
    let job_store = Arc::new(MemJobStore::new());
    let meta_store = Arc::new(MemMetaStore::new());
    let snapshots = Arc::new(SnapshotProvider::new(orchestrator.clone()));
    let flight = Arc::new(FlightTracker::new());

    let public_url = if config.public_url.is_empty() {
        format!("http://127.0.0.1:{}", config.port)
    } else {
        config.public_url.clone()
    };
    let tasks = Arc::new(TaskService::new(
        task_store.clone(),
        orchestrator.clone(),
        snapshots.clone(),
        settlement.clone(),
        TaskServiceConfig {
            node_id: config.node_id.clone(),
            engine_address,
            public_url,
        },
    ));
    let jobs = Arc::new(JobService::new(
        job_store.clone(),
        meta_store.clone(),
        orchestrator.clone(),
        snapshots.clone(),
        flight.clone(),
    ));

    // The six reconciliation loops, individually scheduled and
    // panic-isolated.
    let mut supervisor = Supervisor::new();
    let intervals = &config.intervals;

    let flush = Arc::new(StatusFlush::new(flight.clone(), hub.clone()));
    supervisor.spawn_periodic(
        "status-flush",
        Duration::from_secs(intervals.status_flush_secs),
        move || {
            let flush = flush.clone();
            async move { flush.run_once().await }
        },
    );

    let reaper = Arc::new(ExpiryReaper::new(
        meta_store.clone(),
        jobs.clone(),
        orchestrator.clone(),
        hub.clone(),
        config.node_id.clone(),
    ));
    supervisor.spawn_periodic(
        "expiry-reaper",
        Duration::from_secs(intervals.expiry_reaper_secs),
        move || {
            let reaper = reaper.clone();
            async move { reaper.run_once().await }
        },
    );

    let gc = Arc::new(NamespaceGc::new(orchestrator.clone()));
    supervisor.spawn_periodic(
        "namespace-gc",
        Duration::from_secs(intervals.namespace_gc_secs),
        move || {
            let gc = gc.clone();
            async move { gc.run_once().await }
        },
    );

    let heal = Arc::new(ExporterHeal::new(orchestrator.clone()));
    supervisor.spawn_periodic(
        "exporter-heal",
        Duration::from_secs(intervals.exporter_heal_secs),
        move || {
            let heal = heal.clone();
            async move { heal.run_once().await }
        },
    );

    let poller = Arc::new(RewardPoller::new(task_store.clone(), settlement.clone()));
    supervisor.spawn_periodic(
        "reward-poller",
        Duration::from_secs(intervals.reward_poll_secs),
        move || {
            let poller = poller.clone();
            async move { poller.run_once().await }
        },
    );

    let summary = Arc::new(SummaryReporter::new(
        snapshots.clone(),
        hub.clone(),
        config.node_id.clone(),
        config.region.clone(),
        config.hub.wallet_address.clone(),
    ));
    supervisor.spawn_periodic(
        "summary-report",
        Duration::from_secs(intervals.summary_report_secs),
        move || {
            let summary = summary.clone();
            async move { summary.run_once().await }
        },
    );

    let state = Arc::new(AppState {
        node_id: config.node_id.clone(),
        region: config.region.clone(),
        wallet_address: config.hub.wallet_address.clone(),
        tasks,
        jobs,
        snapshots,
        started_at: chrono::Utc::now().timestamp(),
    });
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "agent api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down");
        })
        .await?;

    supervisor.begin_shutdown();
    supervisor.join().await;
    info!("agent stopped");
    Ok(())
}
