//! Shard distributor demo binary
//!
//! Runs the whole system in one process: in-memory store, heartbeat
//! handler, namespace processor behind a standalone leadership gate, and a
//! simulated executor fleet, with Prometheus metrics on an HTTP endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use keel_core::clock::{SystemClock, TimeSource};
use keel_core::coordinator::{LeaderElection, NamespaceProcessor, ProcessorConfig};
use keel_core::executor::{
    EphemeralLoadConfig, EphemeralProcessorFactory, ExecutorClient, ExecutorClientConfig,
    ShardProcessorFactory, SimulatedProcessorFactory, SyntheticLoadConfig,
};
use keel_core::handler::ExecutorHandler;
use keel_core::store::{MemoryStore, Store};

#[derive(Envconfig)]
struct DemoConfig {
    #[envconfig(from = "NAMESPACE", default = "default")]
    namespace: String,
    #[envconfig(from = "SHARD_COUNT", default = "32")]
    shard_count: u32,
    #[envconfig(from = "EXECUTOR_COUNT", default = "4")]
    executor_count: u32,
    #[envconfig(from = "EPHEMERAL_SHARDS", default = "false")]
    ephemeral_shards: bool,
    #[envconfig(from = "METRICS_ADDR", default = "0.0.0.0:9100")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    info!("Starting keel distributor");

    let config = DemoConfig::init_from_env()?;

    let store = Arc::new(MemoryStore::new());
    let storage: Arc<dyn Store> = store.clone();
    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);

    let shard_ids: Vec<String> = (0..config.shard_count)
        .map(|i| format!("shard-{i:04}"))
        .collect();
    store.register_shards(&config.namespace, shard_ids).await;
    info!(
        "registered {} shards in namespace {}",
        config.shard_count, config.namespace
    );

    let handler = Arc::new(ExecutorHandler::new(storage.clone(), clock.clone()));

    // Metrics endpoint
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(|| async { keel_core::metrics::gather_system_metrics() }))
            .layer(CorsLayer::permissive());

        info!("Metrics endpoint listening on {}", metrics_addr);
        if let Err(e) = axum::serve(
            tokio::net::TcpListener::bind(metrics_addr).await.unwrap(),
            app,
        )
        .await
        {
            warn!("Metrics server error: {}", e);
        }
    });

    // Single process, so leadership is held unconditionally. A real
    // deployment plugs its elector into this gate instead.
    let (election, gate) = LeaderElection::standalone();
    let processor = NamespaceProcessor::new(
        config.namespace.clone(),
        storage.clone(),
        clock.clone(),
        ProcessorConfig::default(),
    );
    tokio::spawn(async move { processor.run(gate).await });

    // Simulated executor fleet
    let factory: Arc<dyn ShardProcessorFactory> = if config.ephemeral_shards {
        let load = EphemeralLoadConfig::init_from_env()?;
        Arc::new(EphemeralProcessorFactory::new(clock.clone(), load))
    } else {
        let load = SyntheticLoadConfig::init_from_env()?;
        Arc::new(SimulatedProcessorFactory::new(clock.clone(), load))
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    for i in 0..config.executor_count {
        let client = ExecutorClient::new(
            ExecutorClientConfig::new(config.namespace.clone(), format!("executor-{i}")),
            handler.clone(),
            factory.clone(),
        );
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { client.run(shutdown).await });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(());
    election.resign();
    drop(election);

    Ok(())
}
