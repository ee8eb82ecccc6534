use anyhow::{Context, Result};
use common::{
    Ack, ChunkId, ClusterStatus, ErrorBody, FileId, FileMetadata, FileSummary, HealthStatus,
    HeartbeatRequest, HeartbeatResponse, NodeDescriptor, RebalanceListing, RegisterNodeRequest,
    ReportChunkStoredRequest, ReportChunkStoredResponse, SweepReport, UploadPlan,
    UploadPlanRequest,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error returned by the master, decoded from its `{code, message}` body.
/// Retrieve it from an `anyhow::Error` with `downcast_ref::<MasterApiError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("master returned {status} ({code}): {message}")]
pub struct MasterApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl MasterApiError {
    fn from_response_body(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(error) => Self {
                status: status.as_u16(),
                code: error.code,
                message: error.message,
            },
            Err(_) => Self {
                status: status.as_u16(),
                code: "http_error".to_string(),
                message: String::from_utf8_lossy(body).trim().to_string(),
            },
        }
    }
}

/// Typed HTTP client for the master's node, upload and admin APIs.
#[derive(Clone)]
pub struct MasterClient {
    http: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.call(Method::GET, "/health", None::<&()>).await
    }

    pub async fn register_node(&self, request: &RegisterNodeRequest) -> Result<NodeDescriptor> {
        self.call(Method::POST, "/nodes", Some(request)).await
    }

    pub async fn heartbeat(&self, node_id: &str, free_bytes: u64) -> Result<HeartbeatResponse> {
        self.call(
            Method::POST,
            &format!("/nodes/{node_id}/heartbeat"),
            Some(&HeartbeatRequest { free_bytes }),
        )
        .await
    }

    pub async fn plan_upload(&self, request: &UploadPlanRequest) -> Result<UploadPlan> {
        self.call(Method::POST, "/files", Some(request)).await
    }

    pub async fn report_chunk_stored(
        &self,
        chunk_id: ChunkId,
        node_id: &str,
    ) -> Result<ReportChunkStoredResponse> {
        self.call(
            Method::POST,
            &format!("/chunks/{chunk_id}/replicas"),
            Some(&ReportChunkStoredRequest {
                node_id: node_id.to_string(),
            }),
        )
        .await
    }

    pub async fn file_metadata(&self, file_id: FileId) -> Result<FileMetadata> {
        self.call(Method::GET, &format!("/files/{file_id}"), None::<&()>)
            .await
    }

    pub async fn list_files(&self) -> Result<Vec<FileSummary>> {
        self.call(Method::GET, "/files", None::<&()>).await
    }

    pub async fn delete_file(&self, file_id: FileId) -> Result<Ack> {
        self.call(Method::DELETE, &format!("/files/{file_id}"), None::<&()>)
            .await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>> {
        self.call(Method::GET, "/admin/nodes", None::<&()>).await
    }

    pub async fn mark_node_failed(&self, node_id: &str) -> Result<Ack> {
        self.call(
            Method::POST,
            &format!("/admin/nodes/{node_id}/fail"),
            None::<&()>,
        )
        .await
    }

    pub async fn restore_node(&self, node_id: &str) -> Result<Ack> {
        self.call(
            Method::POST,
            &format!("/admin/nodes/{node_id}/restore"),
            None::<&()>,
        )
        .await
    }

    pub async fn remove_node(&self, node_id: &str, force: bool) -> Result<Ack> {
        self.call(
            Method::DELETE,
            &format!("/admin/nodes/{node_id}?force={force}"),
            None::<&()>,
        )
        .await
    }

    pub async fn list_rebalances(&self) -> Result<RebalanceListing> {
        self.call(Method::GET, "/admin/rebalances", None::<&()>).await
    }

    pub async fn trigger_sweep(&self) -> Result<SweepReport> {
        self.call(Method::POST, "/admin/rebalances/sweep", None::<&()>)
            .await
    }

    pub async fn cluster_status(&self) -> Result<ClusterStatus> {
        self.call(Method::GET, "/cluster/status", None::<&()>).await
    }

    pub async fn metrics_text(&self) -> Result<String> {
        let response = self
            .request(Method::GET, "/metrics")
            .send()
            .await
            .context("failed to GET /metrics")?;
        let status = response.status();
        let body = response.bytes().await.context("failed to read /metrics")?;
        if !status.is_success() {
            return Err(MasterApiError::from_response_body(status, &body).into());
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.request(method.clone(), path);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to {method} {path}"))?;
        let status = response.status();
        let payload = response
            .bytes()
            .await
            .with_context(|| format!("failed to read response for {method} {path}"))?;

        if !status.is_success() {
            return Err(MasterApiError::from_response_body(status, &payload).into());
        }

        serde_json::from_slice(&payload)
            .with_context(|| format!("unexpected response body for {method} {path}"))
    }
}

/// Returns the master's error code when `err` came from an error response.
pub fn api_error_code(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<MasterApiError>()
        .map(|api| api.code.as_str())
}
