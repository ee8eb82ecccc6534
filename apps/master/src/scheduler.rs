use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use common::{ChunkId, ChunkRecord, NodeDescriptor, NodeId, RebalanceInstruction, SweepReport};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MasterError, MasterResult};
use crate::placement;

#[derive(Default)]
struct SchedulerState {
    pending: BTreeMap<(ChunkId, NodeId), RebalanceInstruction>,
    unrecoverable: BTreeSet<ChunkId>,
    last_sweep_unix: Option<u64>,
}

/// Compares desired and healthy replica counts and queues copy instructions.
///
/// The scheduler only reads snapshots and owns its instruction queue; it never
/// touches chunk or node records. Instructions are deduplicated per
/// `(chunk, target)` until they are acknowledged or outlive `instruction_ttl_secs`.
pub struct ReplicationScheduler {
    instruction_ttl_secs: u64,
    state: Mutex<SchedulerState>,
    sweep_guard: Mutex<()>,
}

impl ReplicationScheduler {
    pub fn new(instruction_ttl_secs: u64) -> Self {
        Self {
            instruction_ttl_secs,
            state: Mutex::new(SchedulerState::default()),
            sweep_guard: Mutex::new(()),
        }
    }

    /// Runs one sweep over the given snapshots. Fails with `SweepInProgress`
    /// instead of running twice at once.
    ///
    /// The queue is locked twice, briefly: once to copy it and once to merge the
    /// result. Heartbeats and reports reading the queue never wait for the scan.
    pub fn sweep(
        &self,
        chunks: &[ChunkRecord],
        nodes: &[NodeDescriptor],
        now: u64,
    ) -> MasterResult<SweepReport> {
        let Some(_guard) = self.sweep_guard.try_lock() else {
            return Err(MasterError::SweepInProgress);
        };

        let healthy: HashMap<&str, &NodeDescriptor> = nodes
            .iter()
            .filter(|node| node.is_healthy())
            .map(|node| (node.node_id.as_str(), node))
            .collect();
        let by_id: HashMap<ChunkId, &ChunkRecord> =
            chunks.iter().map(|chunk| (chunk.chunk_id, chunk)).collect();

        let mut ordered: Vec<&ChunkRecord> = chunks.iter().collect();
        ordered.sort_by_key(|chunk| (chunk.created_at_unix, chunk.file_id, chunk.index));

        // Projected free space, debited as targets are handed out during this sweep.
        let mut working: Vec<NodeDescriptor> = healthy.values().map(|node| (*node).clone()).collect();
        working.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut report = SweepReport {
            started_at_unix: now,
            ..SweepReport::default()
        };

        let queued = self.state.lock().pending.clone();

        let ttl = self.instruction_ttl_secs;
        let mut completed = Vec::new();
        let mut expired = Vec::new();
        let mut in_flight_by_chunk: HashMap<ChunkId, BTreeSet<NodeId>> = HashMap::new();
        for (key, instruction) in &queued {
            let (chunk_id, target) = key;
            match by_id.get(chunk_id) {
                Some(chunk) if chunk.replica_nodes.contains(target) => completed.push(key.clone()),
                Some(_)
                    if now.saturating_sub(instruction.issued_at_unix) < ttl
                        && healthy.contains_key(target.as_str()) =>
                {
                    in_flight_by_chunk
                        .entry(*chunk_id)
                        .or_default()
                        .insert(target.clone());
                }
                _ => expired.push(key.clone()),
            }
        }

        let mut unrecoverable = BTreeSet::new();
        let mut emitted = Vec::new();

        for chunk in ordered {
            let healthy_replicas: Vec<&NodeDescriptor> = chunk
                .replica_nodes
                .iter()
                .filter_map(|node_id| healthy.get(node_id.as_str()).copied())
                .collect();

            if healthy_replicas.len() >= chunk.desired_replicas {
                continue;
            }

            let mut in_flight = in_flight_by_chunk.remove(&chunk.chunk_id).unwrap_or_default();

            // Fresh uploads: the planned targets are still being written to.
            let uploading = now.saturating_sub(chunk.created_at_unix) < ttl;
            if uploading {
                in_flight.extend(
                    chunk
                        .expected_nodes
                        .iter()
                        .filter(|node_id| !chunk.replica_nodes.contains(*node_id))
                        .filter(|node_id| healthy.contains_key(node_id.as_str()))
                        .cloned(),
                );
            }

            let source = healthy_replicas
                .iter()
                .max_by(|a, b| {
                    a.free_bytes
                        .cmp(&b.free_bytes)
                        .then_with(|| b.node_id.cmp(&a.node_id))
                })
                .map(|node| node.node_id.clone());

            if source.is_none() && !(uploading && chunk.is_provisional()) {
                unrecoverable.insert(chunk.chunk_id);
                report.unrecoverable.push(chunk.chunk_id);
            }

            let needed = chunk
                .desired_replicas
                .saturating_sub(healthy_replicas.len())
                .saturating_sub(in_flight.len());
            if needed == 0 {
                continue;
            }

            let mut exclude = chunk.replica_nodes.clone();
            exclude.extend(in_flight);
            let targets = placement::choose_targets(&working, needed, &exclude, chunk.size_bytes);

            if targets.len() < needed {
                report.short_of_targets += 1;
                debug!(
                    chunk_id = %chunk.chunk_id,
                    needed,
                    found = targets.len(),
                    "not enough healthy targets; will retry next sweep"
                );
            }

            placement::debit(&mut working, &targets, chunk.size_bytes);

            for target in targets {
                emitted.push(RebalanceInstruction {
                    chunk_id: chunk.chunk_id,
                    file_id: chunk.file_id,
                    chunk_index: chunk.index,
                    size_bytes: chunk.size_bytes,
                    source_node_id: source.clone(),
                    target_node_id: target,
                    issued_at_unix: now,
                });
            }
        }

        let mut state = self.state.lock();

        // Entries acknowledged or forgotten since the copy are already gone.
        for key in &completed {
            if state.pending.remove(key).is_some() {
                report.completed += 1;
            }
        }
        for key in &expired {
            if state.pending.remove(key).is_some() {
                report.expired += 1;
            }
        }
        for instruction in emitted {
            let key = (instruction.chunk_id, instruction.target_node_id.clone());
            if state.pending.contains_key(&key) {
                continue;
            }
            state.pending.insert(key, instruction.clone());
            report.emitted.push(instruction);
        }
        state.unrecoverable = unrecoverable;
        state.last_sweep_unix = Some(now);
        let pending = state.pending.len();
        drop(state);

        for chunk_id in &report.unrecoverable {
            warn!(chunk_id = %chunk_id, "chunk has no healthy replica left");
        }
        if !report.emitted.is_empty() || report.expired > 0 || report.completed > 0 {
            info!(
                emitted = report.emitted.len(),
                completed = report.completed,
                expired = report.expired,
                unrecoverable = report.unrecoverable.len(),
                short_of_targets = report.short_of_targets,
                pending,
                "replication sweep finished"
            );
        }

        Ok(report)
    }

    /// Clears the instruction for a completed copy. Returns whether one existed.
    pub fn acknowledge(&self, chunk_id: ChunkId, node_id: &str) -> bool {
        self.state
            .lock()
            .pending
            .remove(&(chunk_id, node_id.to_string()))
            .is_some()
    }

    pub fn is_pending(&self, chunk_id: ChunkId, node_id: &str) -> bool {
        self.state
            .lock()
            .pending
            .contains_key(&(chunk_id, node_id.to_string()))
    }

    pub fn pending(&self) -> Vec<RebalanceInstruction> {
        self.state.lock().pending.values().cloned().collect()
    }

    pub fn pending_for(&self, target: &str) -> Vec<RebalanceInstruction> {
        self.state
            .lock()
            .pending
            .values()
            .filter(|instruction| instruction.target_node_id == target)
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn unrecoverable(&self) -> Vec<ChunkId> {
        self.state.lock().unrecoverable.iter().copied().collect()
    }

    pub fn last_sweep_unix(&self) -> Option<u64> {
        self.state.lock().last_sweep_unix
    }

    pub fn forget_chunks(&self, chunk_ids: &[ChunkId]) {
        let doomed: HashSet<&ChunkId> = chunk_ids.iter().collect();
        let mut state = self.state.lock();
        state
            .pending
            .retain(|(chunk_id, _), _| !doomed.contains(chunk_id));
        state
            .unrecoverable
            .retain(|chunk_id| !doomed.contains(chunk_id));
    }

    pub fn forget_target(&self, node_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|(_, target), _| target != node_id);
        before - state.pending.len()
    }
}
