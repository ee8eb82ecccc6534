use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use common::{
    Ack, ChunkId, ClusterStatus, FileId, FileMetadata, FileSummary, HealthStatus, HeartbeatRequest,
    HeartbeatResponse, NodeDescriptor, NodeId, RebalanceListing, RegisterNodeRequest,
    ReportChunkStoredRequest, ReportChunkStoredResponse, SweepReport, UploadPlanRequest,
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod background;
mod config;
mod error;
mod heartbeat;
mod metadata;
mod metrics;
mod placement;
mod registry;
mod scheduler;
mod service;
mod snapshot;

use config::MasterConfig;
use error::MasterError;
use metrics::Metrics;
use service::{MasterService, unix_ts};
use snapshot::SnapshotStore;

#[derive(Clone)]
struct ServerState {
    service: Arc<MasterService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = MasterConfig::from_env()?;
    let service = Arc::new(MasterService::new(&config, Metrics::new()));

    let snapshots = match config.snapshot_path() {
        Some(path) => {
            let store = SnapshotStore::init(path).await?;
            if let Some(snapshot) = store.load().await? {
                service
                    .restore_snapshot(snapshot, unix_ts())
                    .with_context(|| {
                        format!("refusing to start from {}", store.path().display())
                    })?;
            }
            Some(Arc::new(store))
        }
        None => {
            info!("no data directory configured; master state lives in memory only");
            None
        }
    };

    let tasks = background::spawn_background_tasks(service.clone(), snapshots.clone(), &config);
    let app = build_router(ServerState {
        service: service.clone(),
    });

    info!(
        bind_addr = %config.bind_addr,
        chunk_size_bytes = config.chunk_size_bytes,
        replication_factor = config.replication_factor,
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        "master listening"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in tasks {
        task.abort();
    }
    if let Some(store) = &snapshots {
        background::persist(&service, store).await?;
    }

    info!("master stopped");
    Ok(())
}

fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route("/cluster/status", get(api::cluster_status))
        .route("/nodes", post(api::register_node))
        .route("/nodes/{node_id}/heartbeat", post(api::heartbeat))
        .route("/files", post(api::create_file).get(api::list_files))
        .route("/files/{file_id}", get(api::get_file).delete(api::delete_file))
        .route("/chunks/{chunk_id}/replicas", post(api::report_chunk_stored))
        .route("/admin/nodes", get(api::list_nodes))
        .route("/admin/nodes/{node_id}", delete(api::remove_node))
        .route("/admin/nodes/{node_id}/fail", post(api::fail_node))
        .route("/admin/nodes/{node_id}/restore", post(api::restore_node))
        .route("/admin/rebalances", get(api::list_rebalances))
        .route("/admin/rebalances/sweep", post(api::trigger_sweep))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
