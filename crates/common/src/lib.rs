use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage nodes pick their own identity and keep it across restarts.
pub type NodeId = String;
pub type FileId = Uuid;
pub type ChunkId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    Removed,
}

impl NodeHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    pub health: NodeHealth,
    pub last_heartbeat_unix: u64,
    pub registered_at_unix: u64,
}

impl NodeDescriptor {
    pub fn used_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.free_bytes)
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
            health: self.health,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub health: NodeHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: FileId,
    pub name: String,
    pub size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub total_chunks: u64,
    pub replication_factor: usize,
    pub created_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub file_id: FileId,
    pub index: u64,
    pub size_bytes: u64,
    pub desired_replicas: usize,
    /// Nodes holding a confirmed copy.
    pub replica_nodes: BTreeSet<NodeId>,
    /// Nodes the master asked someone to write to: the upload plan plus every repair target.
    pub expected_nodes: BTreeSet<NodeId>,
    pub created_at_unix: u64,
}

impl ChunkRecord {
    pub fn is_provisional(&self) -> bool {
        self.replica_nodes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebalanceInstruction {
    pub chunk_id: ChunkId,
    pub file_id: FileId,
    pub chunk_index: u64,
    pub size_bytes: u64,
    /// `None` when no healthy replica survives and the chunk cannot be copied.
    pub source_node_id: Option<NodeId>,
    pub target_node_id: NodeId,
    pub issued_at_unix: u64,
}

impl RebalanceInstruction {
    pub fn is_unrecoverable(&self) -> bool {
        self.source_node_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterNodeRequest {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub free_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub rebalances: Vec<RebalanceInstruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadPlanRequest {
    pub name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub chunk_size_bytes: Option<u64>,
    #[serde(default)]
    pub replication_factor: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlacement {
    pub chunk_id: ChunkId,
    pub index: u64,
    pub size_bytes: u64,
    pub targets: Vec<NodeEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadPlan {
    pub file: FileRecord,
    pub chunks: Vec<ChunkPlacement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportChunkStoredRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportChunkStoredResponse {
    pub added: bool,
    pub replica_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkReplicas {
    pub chunk_id: ChunkId,
    pub index: u64,
    pub size_bytes: u64,
    pub desired_replicas: usize,
    pub healthy_replicas: usize,
    pub replicas: Vec<NodeEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub file: FileRecord,
    pub chunks: Vec<ChunkReplicas>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub file_id: FileId,
    pub name: String,
    pub size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub total_chunks: u64,
    pub replication_factor: usize,
    pub under_replicated_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub started_at_unix: u64,
    pub emitted: Vec<RebalanceInstruction>,
    pub unrecoverable: Vec<ChunkId>,
    /// Instructions dropped because the target already holds the replica.
    #[serde(default)]
    pub completed: usize,
    pub expired: usize,
    pub short_of_targets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RebalanceListing {
    pub pending: Vec<RebalanceInstruction>,
    pub unrecoverable_chunks: Vec<ChunkId>,
    pub last_sweep_unix: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    pub removed_nodes: usize,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    pub files: usize,
    pub chunks: usize,
    pub pending_rebalances: usize,
    pub unrecoverable_chunks: usize,
    pub replication_factor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub role: String,
    pub online: bool,
}

/// Number of chunks a file of `size_bytes` is cut into. Empty files still get one chunk.
pub fn chunk_count(size_bytes: u64, chunk_size_bytes: u64) -> u64 {
    if chunk_size_bytes == 0 || size_bytes == 0 {
        return 1;
    }
    size_bytes.div_ceil(chunk_size_bytes)
}

/// Length of chunk `index`; only the last chunk may be short.
pub fn chunk_length(size_bytes: u64, chunk_size_bytes: u64, index: u64) -> u64 {
    let offset = index.saturating_mul(chunk_size_bytes);
    size_bytes.saturating_sub(offset).min(chunk_size_bytes)
}
