use std::collections::{BTreeSet, HashMap};

use common::{ChunkId, ChunkRecord, FileId, FileRecord, NodeId, chunk_count, chunk_length};
use parking_lot::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::{MasterError, MasterResult};
use crate::placement;
use crate::registry::NodeRegistry;

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub replication_factor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub added: bool,
    pub replica_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedFile {
    pub file: FileRecord,
    pub chunk_ids: Vec<ChunkId>,
    pub released_bytes: u64,
}

#[derive(Default)]
struct MetadataState {
    files: HashMap<FileId, FileRecord>,
    chunks: HashMap<ChunkId, ChunkRecord>,
    chunks_by_file: HashMap<FileId, Vec<ChunkId>>,
}

impl MetadataState {
    fn file_chunks(&self, file_id: &FileId) -> Vec<ChunkRecord> {
        self.chunks_by_file
            .get(file_id)
            .into_iter()
            .flatten()
            .filter_map(|chunk_id| self.chunks.get(chunk_id).cloned())
            .collect()
    }
}

/// Owner of file and chunk records.
///
/// Operations that also touch node records take the registry as an argument and
/// lock it only while already holding the metadata lock, never the other way
/// round, which fixes the global lock order at metadata -> registry.
#[derive(Default)]
pub struct MetadataStore {
    state: RwLock<MetadataState>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a file with one provisional chunk per slice and a placement for
    /// each. Nothing is stored unless every chunk can be fully placed.
    pub fn create_file(
        &self,
        request: NewFile,
        registry: &NodeRegistry,
        now: u64,
    ) -> MasterResult<(FileRecord, Vec<ChunkRecord>)> {
        if request.chunk_size_bytes == 0 {
            return Err(MasterError::InvalidRequest(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if request.replication_factor == 0 {
            return Err(MasterError::InvalidRequest(
                "replication factor must be at least one".to_string(),
            ));
        }

        let total_chunks = chunk_count(request.size_bytes, request.chunk_size_bytes);
        let chunk_sizes: Vec<u64> = (0..total_chunks)
            .map(|index| chunk_length(request.size_bytes, request.chunk_size_bytes, index))
            .collect();

        let healthy = registry.list_healthy();
        let placements = placement::plan_upload(&healthy, &chunk_sizes, request.replication_factor);

        for (index, targets) in placements.iter().enumerate() {
            let chunk_index = index as u64;
            if targets.is_empty() {
                return Err(MasterError::NoCapacity { chunk_index });
            }
            if targets.len() < request.replication_factor {
                return Err(MasterError::InsufficientReplicas {
                    chunk_index,
                    required: request.replication_factor,
                    available: targets.len(),
                });
            }
        }

        let file = FileRecord {
            file_id: Uuid::new_v4(),
            name: request.name,
            size_bytes: request.size_bytes,
            chunk_size_bytes: request.chunk_size_bytes,
            total_chunks,
            replication_factor: request.replication_factor,
            created_at_unix: now,
        };

        let chunks: Vec<ChunkRecord> = placements
            .into_iter()
            .zip(chunk_sizes)
            .enumerate()
            .map(|(index, (targets, size_bytes))| ChunkRecord {
                chunk_id: Uuid::new_v4(),
                file_id: file.file_id,
                index: index as u64,
                size_bytes,
                desired_replicas: request.replication_factor,
                replica_nodes: BTreeSet::new(),
                expected_nodes: targets.into_iter().collect(),
                created_at_unix: now,
            })
            .collect();

        let mut state = self.state.write();
        state.chunks_by_file.insert(
            file.file_id,
            chunks.iter().map(|chunk| chunk.chunk_id).collect(),
        );
        for chunk in &chunks {
            state.chunks.insert(chunk.chunk_id, chunk.clone());
        }
        state.files.insert(file.file_id, file.clone());

        Ok((file, chunks))
    }

    /// Confirms that `node_id` now holds a copy of `chunk_id`. Repeated reports
    /// are no-ops; the node's free space is debited exactly once.
    pub fn report_chunk_stored(
        &self,
        chunk_id: ChunkId,
        node_id: &str,
        registry: &NodeRegistry,
    ) -> MasterResult<ReportOutcome> {
        let mut state = self.state.write();
        let chunk = state
            .chunks
            .get_mut(&chunk_id)
            .ok_or(MasterError::UnknownChunk(chunk_id))?;

        if !chunk.expected_nodes.contains(node_id) {
            return Err(MasterError::UnexpectedNode {
                chunk_id,
                node_id: node_id.to_string(),
            });
        }

        if chunk.replica_nodes.contains(node_id) {
            return Ok(ReportOutcome {
                added: false,
                replica_count: chunk.replica_nodes.len(),
            });
        }

        registry.adjust_free_bytes(node_id, -signed(chunk.size_bytes))?;
        chunk.replica_nodes.insert(node_id.to_string());

        Ok(ReportOutcome {
            added: true,
            replica_count: chunk.replica_nodes.len(),
        })
    }

    pub fn get_file_metadata(&self, file_id: FileId) -> MasterResult<(FileRecord, Vec<ChunkRecord>)> {
        let state = self.state.read();
        let file = state
            .files
            .get(&file_id)
            .cloned()
            .ok_or(MasterError::FileNotFound(file_id))?;

        let mut chunks = state.file_chunks(&file_id);
        chunks.sort_by_key(|chunk| chunk.index);

        Ok((file, chunks))
    }

    /// Drops a file and its chunks, crediting back only the space that confirmed
    /// replicas actually consumed. Reports arriving afterwards see `UnknownChunk`.
    pub fn delete_file(&self, file_id: FileId, registry: &NodeRegistry) -> MasterResult<DeletedFile> {
        let mut state = self.state.write();
        let file = state
            .files
            .remove(&file_id)
            .ok_or(MasterError::FileNotFound(file_id))?;
        let chunk_ids = state.chunks_by_file.remove(&file_id).unwrap_or_default();

        let mut released_bytes = 0u64;
        for chunk_id in &chunk_ids {
            let Some(chunk) = state.chunks.remove(chunk_id) else {
                continue;
            };

            for node_id in &chunk.replica_nodes {
                match registry.adjust_free_bytes(node_id, signed(chunk.size_bytes)) {
                    Ok(_) => released_bytes += chunk.size_bytes,
                    Err(err) => warn!(
                        node_id = %node_id,
                        chunk_id = %chunk_id,
                        error = %err,
                        "could not release chunk capacity"
                    ),
                }
            }
        }

        Ok(DeletedFile {
            file,
            chunk_ids,
            released_bytes,
        })
    }

    pub fn list_files(&self) -> Vec<(FileRecord, Vec<ChunkRecord>)> {
        let state = self.state.read();
        let mut files: Vec<_> = state
            .files
            .values()
            .map(|file| {
                let mut chunks = state.file_chunks(&file.file_id);
                chunks.sort_by_key(|chunk| chunk.index);
                (file.clone(), chunks)
            })
            .collect();

        files.sort_by(|a, b| {
            a.0.created_at_unix
                .cmp(&b.0.created_at_unix)
                .then_with(|| a.0.name.cmp(&b.0.name))
                .then_with(|| a.0.file_id.cmp(&b.0.file_id))
        });
        files
    }

    /// Read-only copy of every chunk for the replication sweep.
    pub fn snapshot_chunks(&self) -> Vec<ChunkRecord> {
        self.state.read().chunks.values().cloned().collect()
    }

    /// Remembers repair targets so their completion reports are accepted.
    /// Returns `false` when the chunk has been deleted in the meantime.
    /// Adds copy targets to a chunk's expected set. Targets that are no longer
    /// live are skipped and handed back. `None` when the chunk is gone.
    pub fn record_expected_targets(
        &self,
        chunk_id: ChunkId,
        targets: impl IntoIterator<Item = NodeId>,
        registry: &NodeRegistry,
    ) -> Option<Vec<NodeId>> {
        let mut state = self.state.write();
        let chunk = state.chunks.get_mut(&chunk_id)?;

        let mut skipped = Vec::new();
        for target in targets {
            if registry.is_live(&target) {
                chunk.expected_nodes.insert(target);
            } else {
                skipped.push(target);
            }
        }
        Some(skipped)
    }

    pub fn chunks_referencing(&self, node_id: &str) -> usize {
        self.state
            .read()
            .chunks
            .values()
            .filter(|chunk| chunk.replica_nodes.contains(node_id))
            .count()
    }

    /// Administrative node removal. Checks references and tombstones the node
    /// under the metadata lock so no report can add a reference in between.
    /// With `force`, the node is first stripped from every chunk.
    pub fn retire_node(&self, node_id: &str, force: bool, registry: &NodeRegistry) -> MasterResult<usize> {
        let mut state = self.state.write();
        let referencing = state
            .chunks
            .values()
            .filter(|chunk| chunk.replica_nodes.contains(node_id))
            .count();

        registry.remove(node_id, force, referencing)?;

        for chunk in state.chunks.values_mut() {
            chunk.replica_nodes.remove(node_id);
            chunk.expected_nodes.remove(node_id);
        }

        Ok(referencing)
    }

    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.read();
        (state.files.len(), state.chunks.len())
    }

    pub fn export(&self) -> (Vec<FileRecord>, Vec<ChunkRecord>) {
        let state = self.state.read();
        let mut files: Vec<_> = state.files.values().cloned().collect();
        files.sort_by_key(|file| file.file_id);
        let mut chunks: Vec<_> = state.chunks.values().cloned().collect();
        chunks.sort_by_key(|chunk| (chunk.file_id, chunk.index));
        (files, chunks)
    }

    /// Loads persisted records. Any chunk pointing at a missing file or at a
    /// node that is unknown or removed aborts the load.
    pub fn restore(
        &self,
        files: Vec<FileRecord>,
        chunks: Vec<ChunkRecord>,
        registry: &NodeRegistry,
    ) -> MasterResult<()> {
        let mut restored = MetadataState::default();

        for file in files {
            restored.chunks_by_file.insert(file.file_id, Vec::new());
            restored.files.insert(file.file_id, file);
        }

        for chunk in chunks {
            let Some(file) = restored.files.get(&chunk.file_id) else {
                return Err(MasterError::InvariantViolation(format!(
                    "chunk {} belongs to unknown file {}",
                    chunk.chunk_id, chunk.file_id
                )));
            };
            if chunk.index >= file.total_chunks {
                return Err(MasterError::InvariantViolation(format!(
                    "chunk {} has index {} but file {} has {} chunks",
                    chunk.chunk_id, chunk.index, file.file_id, file.total_chunks
                )));
            }
            if let Some(node_id) = chunk
                .replica_nodes
                .iter()
                .find(|node_id| !registry.is_live(node_id))
            {
                return Err(MasterError::InvariantViolation(format!(
                    "chunk {} references removed or unknown node {node_id}",
                    chunk.chunk_id
                )));
            }

            restored
                .chunks_by_file
                .entry(chunk.file_id)
                .or_default()
                .push(chunk.chunk_id);
            if restored.chunks.insert(chunk.chunk_id, chunk).is_some() {
                return Err(MasterError::InvariantViolation(
                    "duplicate chunk id in snapshot".to_string(),
                ));
            }
        }

        *self.state.write() = restored;
        Ok(())
    }
}

fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
