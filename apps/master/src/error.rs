use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{ChunkId, ErrorBody, FileId, NodeId};
use thiserror::Error;

pub type MasterResult<T> = std::result::Result<T, MasterError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MasterError {
    #[error("node {0} is already registered")]
    DuplicateNodeId(NodeId),
    #[error("node {0} is not registered")]
    UnknownNode(NodeId),
    #[error("node {node_id} is still referenced by {chunks} chunk(s)")]
    NodeInUse { node_id: NodeId, chunks: usize },
    #[error("node {node_id} has {free_bytes} free bytes, cannot debit {requested}")]
    InsufficientCapacity {
        node_id: NodeId,
        free_bytes: u64,
        requested: u64,
    },
    #[error("no healthy node can hold chunk {chunk_index}")]
    NoCapacity { chunk_index: u64 },
    #[error("chunk {chunk_index} can only be placed on {available} of {required} required nodes")]
    InsufficientReplicas {
        chunk_index: u64,
        required: usize,
        available: usize,
    },
    #[error("chunk {0} does not exist")]
    UnknownChunk(ChunkId),
    #[error("node {node_id} was not asked to store chunk {chunk_id}")]
    UnexpectedNode { chunk_id: ChunkId, node_id: NodeId },
    #[error("file {0} does not exist")]
    FileNotFound(FileId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("a replication sweep is already running")]
    SweepInProgress,
    #[error("metadata invariant violated: {0}")]
    InvariantViolation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MasterError {
    /// Stable identifier exposed to callers on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNodeId(_) => "duplicate_node_id",
            Self::UnknownNode(_) => "unknown_node",
            Self::NodeInUse { .. } => "node_in_use",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::NoCapacity { .. } => "no_capacity",
            Self::InsufficientReplicas { .. } => "insufficient_replicas",
            Self::UnknownChunk(_) => "unknown_chunk",
            Self::UnexpectedNode { .. } => "unexpected_node",
            Self::FileNotFound(_) => "file_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::SweepInProgress => "sweep_in_progress",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownNode(_) | Self::UnknownChunk(_) | Self::FileNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::DuplicateNodeId(_)
            | Self::NodeInUse { .. }
            | Self::UnexpectedNode { .. }
            | Self::SweepInProgress => StatusCode::CONFLICT,
            Self::NoCapacity { .. } | Self::InsufficientCapacity { .. } => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            Self::InsufficientReplicas { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvariantViolation(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MasterError {
    fn into_response(self) -> Response {
        if let Self::InvariantViolation(detail) = &self {
            tracing::error!(error = %detail, "refusing operation on inconsistent metadata");
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
