use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::SweepReport;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::service::{MasterService, unix_ts};
use crate::snapshot::SnapshotStore;

/// Starts the periodic timeout sweep, replication sweep and snapshot writer.
/// The returned handles are aborted on shutdown.
pub fn spawn_background_tasks(
    service: Arc<MasterService>,
    snapshots: Option<Arc<SnapshotStore>>,
    config: &MasterConfig,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    let timeout_every = Duration::from_secs(config.timeout_sweep_interval_secs());
    let svc = service.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeout_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            svc.sweep_timeouts(unix_ts());
        }
    }));

    let rebalance_every = Duration::from_secs(config.rebalance_interval_secs);
    let svc = service.clone();
    let store = snapshots.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rebalance_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; give nodes one period to report in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match replication_sweep(svc.clone(), unix_ts()).await {
                Ok(_) => {}
                Err(MasterError::SweepInProgress) => {
                    debug!("replication sweep skipped; another sweep is running")
                }
                Err(err) => warn!(error = %err, "replication sweep failed"),
            }
            if let Some(store) = &store {
                persist_if_dirty(&svc, store).await;
            }
        }
    }));

    if let Some(store) = snapshots {
        let snapshot_every = Duration::from_secs(config.snapshot_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(snapshot_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                persist_if_dirty(&service, &store).await;
            }
        }));
    }

    tasks
}

/// Runs a replication sweep on the blocking pool so the scan never occupies
/// an async worker.
pub async fn replication_sweep(service: Arc<MasterService>, now: u64) -> MasterResult<SweepReport> {
    tokio::task::spawn_blocking(move || service.run_replication_sweep(now))
        .await
        .map_err(|err| MasterError::Internal(format!("replication sweep task failed: {err}")))?
}

pub async fn persist(service: &MasterService, store: &SnapshotStore) -> Result<()> {
    let snapshot = service.export_snapshot(unix_ts());
    store.save(&snapshot).await?;

    info!(
        path = %store.path().display(),
        nodes = snapshot.nodes.len(),
        files = snapshot.files.len(),
        chunks = snapshot.chunks.len(),
        "master snapshot saved"
    );
    Ok(())
}

pub async fn persist_if_dirty(service: &MasterService, store: &SnapshotStore) {
    if !service.take_dirty() {
        return;
    }

    if let Err(err) = persist(service, store).await {
        error!(error = %err, path = %store.path().display(), "failed to save master snapshot");
        service.mark_dirty();
    }
}
