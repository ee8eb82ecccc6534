use common::NodeId;
use tracing::{debug, info, warn};

use crate::error::MasterResult;
use crate::registry::NodeRegistry;

/// Drives the per-node health state machine:
/// `Healthy --timeout--> Unhealthy --heartbeat--> Healthy`.
/// Timeouts are the only automatic transition; nodes are never removed here.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout_secs: u64,
}

impl HeartbeatMonitor {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    /// Returns `true` when the heartbeat brought the node back from Unhealthy.
    pub fn on_heartbeat(
        &self,
        registry: &NodeRegistry,
        node_id: &str,
        free_bytes: u64,
        now: u64,
    ) -> MasterResult<bool> {
        let recovered = registry.record_heartbeat(node_id, free_bytes, now)?;

        if recovered {
            info!(node_id = %node_id, free_bytes, "node recovered after heartbeat");
        } else {
            debug!(node_id = %node_id, free_bytes, "heartbeat");
        }

        Ok(recovered)
    }

    pub fn sweep_timeouts(&self, registry: &NodeRegistry, now: u64) -> Vec<NodeId> {
        let demoted = registry.demote_stale(now, self.timeout_secs);

        for node_id in &demoted {
            warn!(
                node_id = %node_id,
                timeout_secs = self.timeout_secs,
                "node missed heartbeat deadline; marked unhealthy"
            );
        }

        demoted
    }

    /// Administrative restore: healthy again, with a fresh deadline so the next
    /// timeout sweep does not immediately demote it.
    pub fn restore(&self, registry: &NodeRegistry, node_id: &str, now: u64) -> MasterResult<bool> {
        registry.touch(node_id, now)?;
        let changed = registry.mark_healthy(node_id)?;
        if changed {
            info!(node_id = %node_id, "node restored by operator");
        }
        Ok(changed)
    }

    pub fn fail(&self, registry: &NodeRegistry, node_id: &str) -> MasterResult<bool> {
        let changed = registry.mark_unhealthy(node_id)?;
        if changed {
            warn!(node_id = %node_id, "node marked failed by operator");
        }
        Ok(changed)
    }
}
