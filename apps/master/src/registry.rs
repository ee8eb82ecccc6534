use std::collections::BTreeMap;

use common::{NodeDescriptor, NodeHealth, NodeId};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    pub removed_nodes: usize,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
}

/// Owner of every node record. Removed nodes stay behind as tombstones so their
/// id can be re-registered with a fresh record.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<NodeId, NodeDescriptor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(
        &self,
        node_id: NodeId,
        host: String,
        port: u16,
        capacity_bytes: u64,
        now: u64,
    ) -> MasterResult<NodeDescriptor> {
        let mut nodes = self.nodes.write();

        if let Some(existing) = nodes.get(&node_id)
            && existing.health != NodeHealth::Removed
        {
            return Err(MasterError::DuplicateNodeId(node_id));
        }

        let descriptor = NodeDescriptor {
            node_id: node_id.clone(),
            host,
            port,
            capacity_bytes,
            free_bytes: capacity_bytes,
            health: NodeHealth::Healthy,
            last_heartbeat_unix: now,
            registered_at_unix: now,
        };
        nodes.insert(node_id, descriptor.clone());

        Ok(descriptor)
    }

    pub fn mark_healthy(&self, node_id: &str) -> MasterResult<bool> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;
        Ok(transition(node, NodeHealth::Healthy))
    }

    pub fn mark_unhealthy(&self, node_id: &str) -> MasterResult<bool> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;
        Ok(transition(node, NodeHealth::Unhealthy))
    }

    /// Applies a heartbeat atomically: timestamp, reported free space and health.
    /// Returns `true` when the node came back from Unhealthy.
    pub fn record_heartbeat(&self, node_id: &str, free_bytes: u64, now: u64) -> MasterResult<bool> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;
        node.last_heartbeat_unix = now;
        node.free_bytes = free_bytes.min(node.capacity_bytes);
        Ok(transition(node, NodeHealth::Healthy))
    }

    pub fn touch(&self, node_id: &str, now: u64) -> MasterResult<()> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;
        node.last_heartbeat_unix = now;
        Ok(())
    }

    /// Flips every Healthy node whose last heartbeat is older than `timeout_secs`
    /// to Unhealthy. Check and transition happen under one write lock so a
    /// heartbeat can never be overwritten by a stale verdict.
    pub fn demote_stale(&self, now: u64, timeout_secs: u64) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let mut demoted = Vec::new();

        for node in nodes.values_mut() {
            if node.health != NodeHealth::Healthy {
                continue;
            }

            let stale = now.saturating_sub(node.last_heartbeat_unix) > timeout_secs;
            if stale && transition(node, NodeHealth::Unhealthy) {
                demoted.push(node.node_id.clone());
            }
        }

        demoted
    }

    /// Tombstones a node. `referencing_chunks` is the number of chunks still
    /// listing the node as a replica; callers accept data loss with `force`.
    pub fn remove(&self, node_id: &str, force: bool, referencing_chunks: usize) -> MasterResult<()> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;

        if referencing_chunks > 0 && !force {
            return Err(MasterError::NodeInUse {
                node_id: node_id.to_string(),
                chunks: referencing_chunks,
            });
        }

        node.health = NodeHealth::Removed;
        Ok(())
    }

    /// Debits (negative delta) or credits (positive delta) a node's free space.
    /// Credits are clamped at capacity; over-debits are rejected untouched.
    pub fn adjust_free_bytes(&self, node_id: &str, delta: i64) -> MasterResult<u64> {
        let mut nodes = self.nodes.write();
        let node = live_node_mut(&mut nodes, node_id)?;

        if delta < 0 {
            let debit = delta.unsigned_abs();
            if debit > node.free_bytes {
                return Err(MasterError::InsufficientCapacity {
                    node_id: node_id.to_string(),
                    free_bytes: node.free_bytes,
                    requested: debit,
                });
            }
            node.free_bytes -= debit;
        } else {
            node.free_bytes = node
                .free_bytes
                .saturating_add(delta as u64)
                .min(node.capacity_bytes);
        }

        Ok(node.free_bytes)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeDescriptor> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn is_live(&self, node_id: &str) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|node| node.health != NodeHealth::Removed)
    }

    pub fn list_healthy(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .read()
            .values()
            .filter(|node| node.is_healthy())
            .cloned()
            .collect()
    }

    /// Every record, tombstones included, ordered by node id.
    pub fn list_all(&self) -> Vec<NodeDescriptor> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        let nodes = self.nodes.read();
        let mut summary = RegistrySummary::default();

        for node in nodes.values() {
            summary.total_nodes += 1;
            match node.health {
                NodeHealth::Healthy => summary.healthy_nodes += 1,
                NodeHealth::Unhealthy => summary.unhealthy_nodes += 1,
                NodeHealth::Removed => {
                    summary.removed_nodes += 1;
                    continue;
                }
            }
            summary.capacity_bytes += node.capacity_bytes;
            summary.free_bytes += node.free_bytes;
        }

        summary
    }

    /// Replaces the registry with persisted records. Healthy nodes get their
    /// heartbeat clock reset to `now` so a restart does not demote them before
    /// they had a chance to report in.
    pub fn restore(&self, records: Vec<NodeDescriptor>, now: u64) {
        let mut nodes = self.nodes.write();
        nodes.clear();

        for mut node in records {
            if node.is_healthy() {
                node.last_heartbeat_unix = now;
            }
            nodes.insert(node.node_id.clone(), node);
        }
    }
}

fn live_node_mut<'a>(
    nodes: &'a mut BTreeMap<NodeId, NodeDescriptor>,
    node_id: &str,
) -> MasterResult<&'a mut NodeDescriptor> {
    match nodes.get_mut(node_id) {
        Some(node) if node.health != NodeHealth::Removed => Ok(node),
        _ => Err(MasterError::UnknownNode(node_id.to_string())),
    }
}

fn transition(node: &mut NodeDescriptor, health: NodeHealth) -> bool {
    if node.health == health {
        return false;
    }
    node.health = health;
    true
}
