use super::*;

#[derive(Debug, Deserialize)]
pub(crate) struct RemoveNodeQuery {
    #[serde(default)]
    force: bool,
}

pub(crate) async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        role: "master".to_string(),
        online: true,
    })
}

pub(crate) async fn register_node(
    State(state): State<ServerState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse, MasterError> {
    let node = state.service.register_node(request)?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub(crate) async fn heartbeat(
    State(state): State<ServerState>,
    Path(node_id): Path<NodeId>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, MasterError> {
    Ok(Json(state.service.heartbeat(&node_id, request.free_bytes)?))
}

pub(crate) async fn create_file(
    State(state): State<ServerState>,
    Json(request): Json<UploadPlanRequest>,
) -> Result<impl IntoResponse, MasterError> {
    let plan = state.service.get_upload_plan(request)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub(crate) async fn list_files(State(state): State<ServerState>) -> Json<Vec<FileSummary>> {
    Json(state.service.list_files())
}

pub(crate) async fn get_file(
    State(state): State<ServerState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<FileMetadata>, MasterError> {
    Ok(Json(state.service.get_file_metadata(file_id)?))
}

pub(crate) async fn delete_file(
    State(state): State<ServerState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<Ack>, MasterError> {
    state.service.delete_file(file_id)?;
    Ok(Json(Ack { ok: true }))
}

pub(crate) async fn report_chunk_stored(
    State(state): State<ServerState>,
    Path(chunk_id): Path<ChunkId>,
    Json(request): Json<ReportChunkStoredRequest>,
) -> Result<Json<ReportChunkStoredResponse>, MasterError> {
    Ok(Json(
        state
            .service
            .report_chunk_stored(chunk_id, &request.node_id)?,
    ))
}

pub(crate) async fn list_nodes(State(state): State<ServerState>) -> Json<Vec<NodeDescriptor>> {
    Json(state.service.list_nodes())
}

pub(crate) async fn fail_node(
    State(state): State<ServerState>,
    Path(node_id): Path<NodeId>,
) -> Result<Json<Ack>, MasterError> {
    state.service.mark_node_failed(&node_id)?;
    Ok(Json(Ack { ok: true }))
}

pub(crate) async fn restore_node(
    State(state): State<ServerState>,
    Path(node_id): Path<NodeId>,
) -> Result<Json<Ack>, MasterError> {
    state.service.restore_node(&node_id)?;
    Ok(Json(Ack { ok: true }))
}

pub(crate) async fn remove_node(
    State(state): State<ServerState>,
    Path(node_id): Path<NodeId>,
    Query(query): Query<RemoveNodeQuery>,
) -> Result<Json<Ack>, MasterError> {
    state.service.remove_node(&node_id, query.force)?;
    Ok(Json(Ack { ok: true }))
}

pub(crate) async fn list_rebalances(State(state): State<ServerState>) -> Json<RebalanceListing> {
    Json(state.service.list_rebalances())
}

pub(crate) async fn trigger_sweep(
    State(state): State<ServerState>,
) -> Result<Json<SweepReport>, MasterError> {
    let report = background::replication_sweep(state.service.clone(), unix_ts()).await?;
    Ok(Json(report))
}

pub(crate) async fn cluster_status(State(state): State<ServerState>) -> Json<ClusterStatus> {
    Json(state.service.cluster_status())
}

pub(crate) async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    // Refresh the state gauges right before a scrape.
    state.service.cluster_status();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.service.metrics().encode(),
    )
}
