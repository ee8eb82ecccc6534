use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use common::{
    ChunkId, ChunkPlacement, ChunkRecord, ChunkReplicas, ClusterStatus, FileId, FileMetadata,
    FileSummary, HeartbeatResponse, NodeDescriptor, NodeEndpoint, NodeHealth, NodeId,
    RebalanceListing, RegisterNodeRequest, ReportChunkStoredResponse, SweepReport, UploadPlan,
    UploadPlanRequest,
};
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::metadata::{DeletedFile, MetadataStore, NewFile};
use crate::metrics::Metrics;
use crate::registry::NodeRegistry;
use crate::scheduler::ReplicationScheduler;
use crate::snapshot::{MasterSnapshot, SNAPSHOT_VERSION};

/// The master's single owned state: node registry, file metadata, health
/// tracking and the replication queue, plus the defaults applied to uploads.
pub struct MasterService {
    registry: NodeRegistry,
    metadata: MetadataStore,
    heartbeat: HeartbeatMonitor,
    scheduler: ReplicationScheduler,
    chunk_size_bytes: u64,
    replication_factor: usize,
    metrics: Metrics,
    dirty: AtomicBool,
}

impl MasterService {
    pub fn new(config: &MasterConfig, metrics: Metrics) -> Self {
        Self {
            registry: NodeRegistry::new(),
            metadata: MetadataStore::new(),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_timeout_secs),
            scheduler: ReplicationScheduler::new(config.instruction_ttl_secs()),
            chunk_size_bytes: config.chunk_size_bytes,
            replication_factor: config.replication_factor,
            metrics,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn register_node(&self, request: RegisterNodeRequest) -> MasterResult<NodeDescriptor> {
        if request.node_id.trim().is_empty() {
            return Err(MasterError::InvalidRequest("node_id must not be empty".to_string()));
        }
        if request.host.trim().is_empty() {
            return Err(MasterError::InvalidRequest("host must not be empty".to_string()));
        }

        let node = self.registry.register_node(
            request.node_id,
            request.host,
            request.port,
            request.capacity_bytes,
            unix_ts(),
        )?;

        info!(
            node_id = %node.node_id,
            endpoint = %format!("{}:{}", node.host, node.port),
            capacity_bytes = node.capacity_bytes,
            "node registered"
        );
        self.mark_dirty();
        Ok(node)
    }

    /// Applies the heartbeat and hands back the copy instructions waiting for this node.
    pub fn heartbeat(&self, node_id: &str, free_bytes: u64) -> MasterResult<HeartbeatResponse> {
        let recovered = self
            .heartbeat
            .on_heartbeat(&self.registry, node_id, free_bytes, unix_ts())?;
        if recovered {
            self.metrics.record_transition(NodeHealth::Healthy, 1);
            self.mark_dirty();
        }

        Ok(HeartbeatResponse {
            ok: true,
            rebalances: self.scheduler.pending_for(node_id),
        })
    }

    pub fn get_upload_plan(&self, request: UploadPlanRequest) -> MasterResult<UploadPlan> {
        let result = self.plan_upload(request);
        match &result {
            Ok(_) => self.metrics.record_upload_plan("ok"),
            Err(err) => self.metrics.record_upload_plan(err.code()),
        }
        result
    }

    fn plan_upload(&self, request: UploadPlanRequest) -> MasterResult<UploadPlan> {
        if request.name.trim().is_empty() {
            return Err(MasterError::InvalidRequest("file name must not be empty".to_string()));
        }

        let new_file = NewFile {
            name: request.name,
            size_bytes: request.size_bytes,
            chunk_size_bytes: request.chunk_size_bytes.unwrap_or(self.chunk_size_bytes),
            replication_factor: request.replication_factor.unwrap_or(self.replication_factor),
        };
        let (file, chunks) = self
            .metadata
            .create_file(new_file, &self.registry, unix_ts())?;

        let endpoints = self.endpoints();
        let chunks = chunks
            .into_iter()
            .map(|chunk| ChunkPlacement {
                targets: resolve(&endpoints, chunk.expected_nodes.iter()),
                chunk_id: chunk.chunk_id,
                index: chunk.index,
                size_bytes: chunk.size_bytes,
            })
            .collect();

        info!(
            file_id = %file.file_id,
            name = %file.name,
            size_bytes = file.size_bytes,
            total_chunks = file.total_chunks,
            replication_factor = file.replication_factor,
            "upload planned"
        );
        self.mark_dirty();
        Ok(UploadPlan { file, chunks })
    }

    pub fn report_chunk_stored(
        &self,
        chunk_id: ChunkId,
        node_id: &str,
    ) -> MasterResult<ReportChunkStoredResponse> {
        // A repair copy may finish before the sweep recorded its target on the chunk.
        if self.scheduler.is_pending(chunk_id, node_id) {
            self.metadata
                .record_expected_targets(chunk_id, [node_id.to_string()], &self.registry);
        }

        let outcome = self
            .metadata
            .report_chunk_stored(chunk_id, node_id, &self.registry)?;

        if self.scheduler.acknowledge(chunk_id, node_id) {
            self.metrics.rebalances_completed.inc();
            info!(chunk_id = %chunk_id, node_id = %node_id, "rebalance completed");
        }
        if outcome.added {
            self.mark_dirty();
        }

        Ok(ReportChunkStoredResponse {
            added: outcome.added,
            replica_count: outcome.replica_count,
        })
    }

    pub fn get_file_metadata(&self, file_id: FileId) -> MasterResult<FileMetadata> {
        let (file, chunks) = self.metadata.get_file_metadata(file_id)?;
        let endpoints = self.endpoints();

        let chunks = chunks
            .into_iter()
            .map(|chunk| {
                let replicas = resolve(&endpoints, chunk.replica_nodes.iter());
                ChunkReplicas {
                    healthy_replicas: replicas
                        .iter()
                        .filter(|endpoint| endpoint.health == NodeHealth::Healthy)
                        .count(),
                    replicas,
                    chunk_id: chunk.chunk_id,
                    index: chunk.index,
                    size_bytes: chunk.size_bytes,
                    desired_replicas: chunk.desired_replicas,
                }
            })
            .collect();

        Ok(FileMetadata { file, chunks })
    }

    pub fn delete_file(&self, file_id: FileId) -> MasterResult<DeletedFile> {
        let deleted = self.metadata.delete_file(file_id, &self.registry)?;
        self.scheduler.forget_chunks(&deleted.chunk_ids);

        info!(
            file_id = %file_id,
            name = %deleted.file.name,
            chunks = deleted.chunk_ids.len(),
            released_bytes = deleted.released_bytes,
            "file deleted"
        );
        self.mark_dirty();
        Ok(deleted)
    }

    pub fn list_files(&self) -> Vec<FileSummary> {
        let healthy: HashSet<NodeId> = self
            .registry
            .list_healthy()
            .into_iter()
            .map(|node| node.node_id)
            .collect();

        self.metadata
            .list_files()
            .into_iter()
            .map(|(file, chunks)| FileSummary {
                under_replicated_chunks: chunks
                    .iter()
                    .filter(|chunk| healthy_count(chunk, &healthy) < chunk.desired_replicas)
                    .count(),
                file_id: file.file_id,
                name: file.name,
                size_bytes: file.size_bytes,
                chunk_size_bytes: file.chunk_size_bytes,
                total_chunks: file.total_chunks,
                replication_factor: file.replication_factor,
            })
            .collect()
    }

    pub fn list_nodes(&self) -> Vec<NodeDescriptor> {
        self.registry.list_all()
    }

    pub fn mark_node_failed(&self, node_id: &str) -> MasterResult<bool> {
        let changed = self.heartbeat.fail(&self.registry, node_id)?;
        if changed {
            self.metrics.record_transition(NodeHealth::Unhealthy, 1);
            self.mark_dirty();
        }
        Ok(changed)
    }

    pub fn restore_node(&self, node_id: &str) -> MasterResult<bool> {
        let changed = self.heartbeat.restore(&self.registry, node_id, unix_ts())?;
        if changed {
            self.metrics.record_transition(NodeHealth::Healthy, 1);
            self.mark_dirty();
        }
        Ok(changed)
    }

    /// Returns how many chunks lost this node as a replica.
    pub fn remove_node(&self, node_id: &str, force: bool) -> MasterResult<usize> {
        let stripped = self.metadata.retire_node(node_id, force, &self.registry)?;
        let dropped = self.scheduler.forget_target(node_id);

        if stripped > 0 {
            warn!(
                node_id = %node_id,
                chunks = stripped,
                dropped_instructions = dropped,
                "node force-removed while still holding replicas"
            );
        } else {
            info!(node_id = %node_id, dropped_instructions = dropped, "node removed");
        }
        self.metrics.record_transition(NodeHealth::Removed, 1);
        self.mark_dirty();
        Ok(stripped)
    }

    pub fn list_rebalances(&self) -> RebalanceListing {
        RebalanceListing {
            pending: self.scheduler.pending(),
            unrecoverable_chunks: self.scheduler.unrecoverable(),
            last_sweep_unix: self.scheduler.last_sweep_unix(),
        }
    }

    pub fn sweep_timeouts(&self, now: u64) -> Vec<NodeId> {
        let demoted = self.heartbeat.sweep_timeouts(&self.registry, now);
        if !demoted.is_empty() {
            self.metrics
                .record_transition(NodeHealth::Unhealthy, demoted.len());
            self.mark_dirty();
        }
        demoted
    }

    /// Blocking: scans every chunk. Async callers go through `spawn_blocking`.
    pub fn run_replication_sweep(&self, now: u64) -> MasterResult<SweepReport> {
        let chunks = self.metadata.snapshot_chunks();
        let nodes = self.registry.list_all();
        self.sweep_snapshot(&chunks, &nodes, now)
    }

    fn sweep_snapshot(
        &self,
        chunks: &[ChunkRecord],
        nodes: &[NodeDescriptor],
        now: u64,
    ) -> MasterResult<SweepReport> {
        let mut report = self.scheduler.sweep(chunks, nodes, now)?;

        let mut targets_by_chunk: BTreeMap<ChunkId, Vec<NodeId>> = BTreeMap::new();
        for instruction in &report.emitted {
            targets_by_chunk
                .entry(instruction.chunk_id)
                .or_default()
                .push(instruction.target_node_id.clone());
        }

        let mut gone_chunks = Vec::new();
        let mut gone_targets = BTreeSet::new();
        for (chunk_id, targets) in targets_by_chunk {
            match self
                .metadata
                .record_expected_targets(chunk_id, targets, &self.registry)
            {
                Some(skipped) => gone_targets.extend(skipped),
                // Deleted between snapshot and now.
                None => gone_chunks.push(chunk_id),
            }
        }

        if !gone_chunks.is_empty() || !gone_targets.is_empty() {
            self.scheduler.forget_chunks(&gone_chunks);
            for node_id in &gone_targets {
                self.scheduler.forget_target(node_id);
            }
            report.emitted.retain(|instruction| {
                !gone_chunks.contains(&instruction.chunk_id)
                    && !gone_targets.contains(&instruction.target_node_id)
            });
            debug!(
                chunks = gone_chunks.len(),
                targets = gone_targets.len(),
                "dropped instructions for records that vanished during the sweep"
            );
        }

        self.metrics
            .rebalances_emitted
            .inc_by(report.emitted.len() as u64);
        self.metrics
            .rebalances_completed
            .inc_by(report.completed as u64);
        self.metrics.rebalances_expired.inc_by(report.expired as u64);
        if !report.emitted.is_empty() {
            self.mark_dirty();
        }
        self.cluster_status();

        Ok(report)
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        let summary = self.registry.summary();
        let (files, chunks) = self.metadata.counts();

        let status = ClusterStatus {
            total_nodes: summary.total_nodes,
            healthy_nodes: summary.healthy_nodes,
            unhealthy_nodes: summary.unhealthy_nodes,
            removed_nodes: summary.removed_nodes,
            capacity_bytes: summary.capacity_bytes,
            free_bytes: summary.free_bytes,
            files,
            chunks,
            pending_rebalances: self.scheduler.pending_count(),
            unrecoverable_chunks: self.scheduler.unrecoverable().len(),
            replication_factor: self.replication_factor,
        };
        self.metrics.observe_status(&status);
        status
    }

    pub fn export_snapshot(&self, now: u64) -> MasterSnapshot {
        // Metadata first, then registry, same order as every combined operation.
        let (files, chunks) = self.metadata.export();
        let nodes = self.registry.list_all();

        MasterSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at_unix: now,
            nodes,
            files,
            chunks,
        }
    }

    pub fn restore_snapshot(&self, snapshot: MasterSnapshot, now: u64) -> MasterResult<()> {
        let node_count = snapshot.nodes.len();
        self.registry.restore(snapshot.nodes, now);
        self.metadata
            .restore(snapshot.files, snapshot.chunks, &self.registry)?;

        let (files, chunks) = self.metadata.counts();
        info!(nodes = node_count, files, chunks, "master state restored from snapshot");
        self.cluster_status();
        Ok(())
    }

    /// Clears and returns the "changed since last save" flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn endpoints(&self) -> HashMap<NodeId, NodeEndpoint> {
        self.registry
            .list_all()
            .into_iter()
            .map(|node| (node.node_id.clone(), node.endpoint()))
            .collect()
    }
}

fn resolve<'a>(
    endpoints: &HashMap<NodeId, NodeEndpoint>,
    node_ids: impl Iterator<Item = &'a NodeId>,
) -> Vec<NodeEndpoint> {
    node_ids
        .filter_map(|node_id| endpoints.get(node_id).cloned())
        .collect()
}

fn healthy_count(chunk: &ChunkRecord, healthy: &HashSet<NodeId>) -> usize {
    chunk
        .replica_nodes
        .iter()
        .filter(|node_id| healthy.contains(*node_id))
        .count()
}

pub fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> MasterService {
        let config = MasterConfig {
            chunk_size_bytes: 10,
            ..MasterConfig::default()
        };
        MasterService::new(&config, Metrics::new())
    }

    fn register(service: &MasterService, id: &str, capacity_bytes: u64) {
        service
            .register_node(RegisterNodeRequest {
                node_id: id.to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                capacity_bytes,
            })
            .unwrap();
    }

    fn upload(service: &MasterService, name: &str, size_bytes: u64) -> UploadPlan {
        service
            .get_upload_plan(UploadPlanRequest {
                name: name.to_string(),
                size_bytes,
                chunk_size_bytes: None,
                replication_factor: None,
            })
            .unwrap()
    }

    fn confirm_all(service: &MasterService, plan: &UploadPlan) {
        for chunk in &plan.chunks {
            for target in &chunk.targets {
                service
                    .report_chunk_stored(chunk.chunk_id, &target.node_id)
                    .unwrap();
            }
        }
    }

    #[test]
    fn upload_plan_uses_defaults_and_resolves_endpoints() {
        let service = test_service();
        for id in ["n1", "n2", "n3"] {
            register(&service, id, 1_000);
        }

        let plan = upload(&service, "a.bin", 25);

        assert_eq!(plan.file.chunk_size_bytes, 10);
        assert_eq!(plan.file.replication_factor, 3);
        assert_eq!(plan.chunks.len(), 3);
        assert_eq!(plan.chunks[2].size_bytes, 5);
        for chunk in &plan.chunks {
            assert_eq!(chunk.targets.len(), 3);
            assert!(chunk.targets.iter().all(|t| t.port == 9000));
        }
    }

    #[test]
    fn empty_names_and_node_ids_are_rejected() {
        let service = test_service();

        let err = service
            .get_upload_plan(UploadPlanRequest {
                name: " ".to_string(),
                size_bytes: 1,
                chunk_size_bytes: None,
                replication_factor: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let err = service
            .register_node(RegisterNodeRequest {
                node_id: String::new(),
                host: "h".to_string(),
                port: 1,
                capacity_bytes: 1,
            })
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn metadata_reports_healthy_replica_counts() {
        let service = test_service();
        for id in ["n1", "n2", "n3"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);

        service.mark_node_failed("n2").unwrap();
        let metadata = service.get_file_metadata(plan.file.file_id).unwrap();

        assert_eq!(metadata.chunks.len(), 1);
        assert_eq!(metadata.chunks[0].replicas.len(), 3);
        assert_eq!(metadata.chunks[0].healthy_replicas, 2);
        assert_eq!(service.list_files()[0].under_replicated_chunks, 1);
    }

    #[test]
    fn lost_replica_is_repaired_through_heartbeat_instructions() {
        let service = test_service();
        for id in ["n1", "n2", "n3", "n4"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);
        let chunk_id = plan.chunks[0].chunk_id;
        let holders: Vec<_> = plan.chunks[0]
            .targets
            .iter()
            .map(|t| t.node_id.clone())
            .collect();
        let spare = ["n1", "n2", "n3", "n4"]
            .into_iter()
            .find(|id| !holders.iter().any(|h| h == id))
            .unwrap();

        service.mark_node_failed(&holders[0]).unwrap();
        let report = service.run_replication_sweep(unix_ts() + 1_000).unwrap();
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(report.emitted[0].target_node_id, spare);

        let ack = service.heartbeat(spare, 900).unwrap();
        assert_eq!(ack.rebalances.len(), 1);
        assert_eq!(ack.rebalances[0].chunk_id, chunk_id);

        let stored = service.report_chunk_stored(chunk_id, spare).unwrap();
        assert!(stored.added);
        assert!(service.list_rebalances().pending.is_empty());
        assert_eq!(service.list_files()[0].under_replicated_chunks, 0);
    }

    #[test]
    fn report_for_pending_copy_is_accepted_before_target_is_recorded() {
        let service = test_service();
        for id in ["n1", "n2"] {
            register(&service, id, 1_000);
        }
        let plan = service
            .get_upload_plan(UploadPlanRequest {
                name: "a".to_string(),
                size_bytes: 10,
                chunk_size_bytes: None,
                replication_factor: Some(1),
            })
            .unwrap();
        confirm_all(&service, &plan);

        let chunk_id = plan.chunks[0].chunk_id;
        let holder = plan.chunks[0].targets[0].node_id.clone();
        let other = if holder == "n1" { "n2" } else { "n1" };

        assert!(matches!(
            service.report_chunk_stored(chunk_id, other),
            Err(MasterError::UnexpectedNode { .. })
        ));

        // Queue the copy without letting the sweep record the target on the chunk.
        service.mark_node_failed(&holder).unwrap();
        let chunks = service.metadata.snapshot_chunks();
        let nodes = service.registry.list_all();
        service
            .scheduler
            .sweep(&chunks, &nodes, unix_ts() + 1_000)
            .unwrap();

        let stored = service.report_chunk_stored(chunk_id, other).unwrap();
        assert!(stored.added);
        assert!(service.list_rebalances().pending.is_empty());
    }

    #[test]
    fn deleting_a_file_drops_its_instructions() {
        let service = test_service();
        for id in ["n1", "n2", "n3", "n4"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);
        service
            .mark_node_failed(&plan.chunks[0].targets[0].node_id)
            .unwrap();
        service.run_replication_sweep(unix_ts() + 1_000).unwrap();
        assert_eq!(service.list_rebalances().pending.len(), 1);

        let deleted = service.delete_file(plan.file.file_id).unwrap();

        assert_eq!(deleted.released_bytes, 30);
        assert!(service.list_rebalances().pending.is_empty());
        assert!(matches!(
            service.get_file_metadata(plan.file.file_id),
            Err(MasterError::FileNotFound(_))
        ));
    }

    #[test]
    fn force_removing_a_node_strips_it_and_its_instructions() {
        let service = test_service();
        for id in ["n1", "n2", "n3", "n4"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);
        let victim = plan.chunks[0].targets[0].node_id.clone();

        assert!(matches!(
            service.remove_node(&victim, false),
            Err(MasterError::NodeInUse { chunks: 1, .. })
        ));
        assert_eq!(service.remove_node(&victim, true).unwrap(), 1);

        let metadata = service.get_file_metadata(plan.file.file_id).unwrap();
        assert_eq!(metadata.chunks[0].replicas.len(), 2);
        assert_eq!(service.cluster_status().removed_nodes, 1);
        assert!(matches!(
            service.heartbeat(&victim, 1),
            Err(MasterError::UnknownNode(_))
        ));
    }

    #[test]
    fn sweep_from_stale_node_list_never_targets_a_removed_node() {
        let service = test_service();
        for id in ["n1", "n2", "n3", "n4"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);
        let holders: Vec<_> = plan.chunks[0]
            .targets
            .iter()
            .map(|t| t.node_id.clone())
            .collect();
        let spare = ["n1", "n2", "n3", "n4"]
            .into_iter()
            .find(|id| !holders.iter().any(|h| h == id))
            .unwrap();
        service.mark_node_failed(&holders[0]).unwrap();

        // Node list read while the spare was still healthy, then the spare goes away.
        let chunks = service.metadata.snapshot_chunks();
        let nodes = service.registry.list_all();
        service.remove_node(spare, false).unwrap();

        let report = service
            .sweep_snapshot(&chunks, &nodes, unix_ts() + 1_000)
            .unwrap();

        assert!(report.emitted.is_empty());
        assert!(service.list_rebalances().pending.is_empty());
        let snapshot = service.export_snapshot(1);
        assert!(
            snapshot
                .chunks
                .iter()
                .all(|chunk| !chunk.expected_nodes.contains(spare))
        );
    }

    #[test]
    fn timeout_sweep_demotes_silent_nodes() {
        let service = test_service();
        register(&service, "n1", 100);

        let demoted = service.sweep_timeouts(unix_ts() + 1_000);
        assert_eq!(demoted, vec!["n1".to_string()]);

        service.heartbeat("n1", 100).unwrap();
        assert_eq!(service.cluster_status().healthy_nodes, 1);
    }

    #[test]
    fn snapshot_round_trips_into_a_fresh_service() {
        let service = test_service();
        for id in ["n1", "n2", "n3"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 25);
        confirm_all(&service, &plan);
        service.mark_node_failed("n3").unwrap();
        assert!(service.take_dirty());
        assert!(!service.take_dirty());

        let snapshot = service.export_snapshot(7);
        let restored = test_service();
        restored.restore_snapshot(snapshot, unix_ts()).unwrap();

        let status = restored.cluster_status();
        assert_eq!(status.healthy_nodes, 2);
        assert_eq!(status.unhealthy_nodes, 1);
        assert_eq!(status.files, 1);
        assert_eq!(status.chunks, 3);
        assert_eq!(
            restored.get_file_metadata(plan.file.file_id).unwrap(),
            service.get_file_metadata(plan.file.file_id).unwrap()
        );
    }

    #[test]
    fn snapshot_with_dangling_replica_is_refused() {
        let service = test_service();
        for id in ["n1", "n2", "n3"] {
            register(&service, id, 1_000);
        }
        let plan = upload(&service, "a.bin", 10);
        confirm_all(&service, &plan);

        let mut snapshot = service.export_snapshot(1);
        snapshot.nodes.retain(|node| node.node_id != "n1");

        assert!(matches!(
            test_service().restore_snapshot(snapshot, 1),
            Err(MasterError::InvariantViolation(_))
        ));
    }
}
