#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Stdio;
    use std::sync::OnceLock;
    use std::time::{Duration, SystemTime};

    use anyhow::{Context, Result, bail};
    use client_sdk::{MasterClient, api_error_code};
    use common::{NodeHealth, RegisterNodeRequest, UploadPlan, UploadPlanRequest};
    use reqwest::StatusCode;
    use tokio::process::{Child, Command};
    use tokio::time::sleep;

    #[tokio::test]
    async fn sdk_upload_flow_against_live_master() -> Result<()> {
        let bind = "127.0.0.1:19170";
        let mut master = start_master(bind, &[]).await?;
        let client = MasterClient::new(format!("http://{bind}"));

        let result = async {
            register_nodes(&client, &["n1", "n2", "n3"]).await?;
            let plan = upload_and_confirm(&client, "report.pdf", 10 * 1024 * 1024).await?;
            assert_eq!(plan.file.total_chunks, 3);

            let metadata = client.file_metadata(plan.file.file_id).await?;
            assert!(metadata.chunks.iter().all(|chunk| chunk.healthy_replicas == 3));

            let again = client
                .report_chunk_stored(plan.chunks[0].chunk_id, &plan.chunks[0].targets[0].node_id)
                .await?;
            assert!(!again.added);

            let err = client
                .report_chunk_stored(plan.chunks[0].chunk_id, "stranger")
                .await
                .unwrap_err();
            assert_eq!(api_error_code(&err), Some("unexpected_node"));

            let files = client.list_files().await?;
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].name, "report.pdf");

            client.delete_file(plan.file.file_id).await?;
            let err = client.file_metadata(plan.file.file_id).await.unwrap_err();
            assert_eq!(api_error_code(&err), Some("file_not_found"));

            let status = client.cluster_status().await?;
            assert_eq!(status.files, 0);
            assert_eq!(status.free_bytes, status.capacity_bytes);
            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_process(&mut master).await;
        result
    }

    #[tokio::test]
    async fn cli_admin_commands_against_live_master() -> Result<()> {
        let bind = "127.0.0.1:19171";
        let base_url = format!("http://{bind}");
        let mut master = start_master(bind, &[]).await?;
        let client = MasterClient::new(&base_url);

        let result = async {
            register_nodes(&client, &["n1", "n2", "n3", "n4"]).await?;
            let plan = upload_and_confirm(&client, "video.mp4", 1024).await?;
            let holder = plan.chunks[0].targets[0].node_id.clone();

            let nodes = run_cli(&["--master-url", &base_url, "nodes"]).await?;
            assert!(nodes.contains("n4"));

            run_cli(&["--master-url", &base_url, "fail", &holder]).await?;
            let sweep = run_cli(&["--master-url", &base_url, "sweep"]).await?;
            assert!(sweep.contains("emitted 1 instruction(s)"));

            let rebalances = run_cli(&["--master-url", &base_url, "rebalances"]).await?;
            let listing: serde_json::Value = serde_json::from_str(&rebalances)?;
            assert_eq!(listing["pending"].as_array().map(Vec::len), Some(1));

            let refused = run_cli(&["--master-url", &base_url, "remove", &holder]).await;
            let message = refused.unwrap_err().to_string();
            assert!(message.contains("node_in_use"));

            run_cli(&["--master-url", &base_url, "remove", &holder, "--force"]).await?;
            let nodes = client.list_nodes().await?;
            let removed = nodes
                .iter()
                .find(|node| node.node_id == holder)
                .context("removed node missing from listing")?;
            assert_eq!(removed.health, NodeHealth::Removed);

            let files = run_cli(&["--master-url", &base_url, "files"]).await?;
            assert!(files.contains("video.mp4"));
            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_process(&mut master).await;
        result
    }

    #[tokio::test]
    async fn silent_node_is_demoted_and_heartbeat_revives_it() -> Result<()> {
        let bind = "127.0.0.1:19172";
        let mut master = start_master(
            bind,
            &[
                ("CHUNKVAULT_HEARTBEAT_INTERVAL_SECS", "1"),
                ("CHUNKVAULT_HEARTBEAT_TIMEOUT_SECS", "1"),
            ],
        )
        .await?;
        let client = MasterClient::new(format!("http://{bind}"));

        let result = async {
            register_nodes(&client, &["quiet"]).await?;

            let mut demoted = false;
            for _ in 0..50 {
                let status = client.cluster_status().await?;
                if status.unhealthy_nodes == 1 {
                    demoted = true;
                    break;
                }
                sleep(Duration::from_millis(100)).await;
            }
            assert!(demoted, "node was never marked unhealthy");

            client.heartbeat("quiet", 512).await?;
            let status = client.cluster_status().await?;
            assert_eq!(status.healthy_nodes, 1);
            assert_eq!(status.free_bytes, 512);
            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_process(&mut master).await;
        result
    }

    #[tokio::test]
    async fn state_survives_master_restart() -> Result<()> {
        let bind = "127.0.0.1:19173";
        let data_dir = fresh_data_dir("restart");
        let data_dir_str = data_dir.display().to_string();
        let env = [
            ("CHUNKVAULT_DATA_DIR", data_dir_str.as_str()),
            ("CHUNKVAULT_SNAPSHOT_INTERVAL_SECS", "1"),
        ];
        let client = MasterClient::new(format!("http://{bind}"));

        let mut master = start_master(bind, &env).await?;
        let first = async {
            register_nodes(&client, &["n1", "n2", "n3"]).await?;
            let plan = upload_and_confirm(&client, "keep.me", 100).await?;
            wait_for_snapshot_with_files(&data_dir, 1).await?;
            Ok::<UploadPlan, anyhow::Error>(plan)
        }
        .await;
        stop_process(&mut master).await;
        let plan = first?;

        let mut master = start_master(bind, &env).await?;
        let second = async {
            let metadata = client.file_metadata(plan.file.file_id).await?;
            assert_eq!(metadata.file.name, "keep.me");
            assert_eq!(metadata.chunks[0].healthy_replicas, 3);

            let err = client
                .register_node(&RegisterNodeRequest {
                    node_id: "n1".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 1,
                    capacity_bytes: 1,
                })
                .await
                .unwrap_err();
            assert_eq!(api_error_code(&err), Some("duplicate_node_id"));
            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_process(&mut master).await;
        let _ = fs::remove_dir_all(&data_dir);
        second
    }

    async fn register_nodes(client: &MasterClient, node_ids: &[&str]) -> Result<()> {
        for (offset, node_id) in node_ids.iter().enumerate() {
            client
                .register_node(&RegisterNodeRequest {
                    node_id: node_id.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9200 + offset as u16,
                    capacity_bytes: 1024 * 1024 * 1024,
                })
                .await?;
        }
        Ok(())
    }

    async fn upload_and_confirm(client: &MasterClient, name: &str, size_bytes: u64) -> Result<UploadPlan> {
        let plan = client
            .plan_upload(&UploadPlanRequest {
                name: name.to_string(),
                size_bytes,
                chunk_size_bytes: None,
                replication_factor: None,
            })
            .await?;

        for chunk in &plan.chunks {
            for target in &chunk.targets {
                let stored = client
                    .report_chunk_stored(chunk.chunk_id, &target.node_id)
                    .await?;
                assert!(stored.added);
            }
        }

        Ok(plan)
    }

    async fn wait_for_snapshot_with_files(data_dir: &Path, files: usize) -> Result<()> {
        let path = data_dir.join("state").join("master.json");

        for _ in 0..50 {
            if let Ok(payload) = fs::read(&path)
                && let Ok(snapshot) = serde_json::from_slice::<serde_json::Value>(&payload)
                && snapshot["files"].as_array().map(Vec::len) == Some(files)
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("snapshot with {files} file(s) never appeared at {}", path.display());
    }

    async fn start_master(bind: &str, env: &[(&str, &str)]) -> Result<Child> {
        let master_bin = binary_path("master")?;

        let mut command = Command::new(master_bin);
        command
            .env("CHUNKVAULT_MASTER_BIND", bind)
            .env_remove("CHUNKVAULT_DATA_DIR")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in env {
            command.env(key, value);
        }

        let child = command.spawn().context("failed to spawn master")?;
        wait_for_master(bind, 40).await?;
        Ok(child)
    }

    async fn run_cli(args: &[&str]) -> Result<String> {
        let cli_bin = binary_path("chunkvault")?;
        let output = Command::new(cli_bin)
            .args(args)
            .output()
            .await
            .context("failed to execute chunkvault cli")?;

        if !output.status.success() {
            bail!(
                "chunkvault cli failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn wait_for_master(bind: &str, retries: usize) -> Result<()> {
        let http = reqwest::Client::new();
        let health_url = format!("http://{bind}/health");

        for _ in 0..retries {
            if let Ok(resp) = http.get(&health_url).send().await
                && resp.status() == StatusCode::OK
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("master did not become healthy at {health_url}");
    }

    async fn stop_process(child: &mut Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    fn binary_path(name: &str) -> Result<PathBuf> {
        let workspace_root = workspace_root()?;
        ensure_binaries_built(&workspace_root)?;
        let mut path = workspace_root.join("target").join("debug").join(name);

        if let Some(suffix) = std::env::consts::EXE_SUFFIX.strip_prefix('.') {
            let mut filename = OsString::from(name);
            filename.push(".");
            filename.push(suffix);
            path = workspace_root.join("target").join("debug").join(filename);
        }

        if !path.exists() {
            bail!("expected binary does not exist: {}", path.display());
        }

        Ok(path)
    }

    fn workspace_root() -> Result<PathBuf> {
        let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        crate_dir
            .parent()
            .and_then(|p| p.parent())
            .map(PathBuf::from)
            .context("failed to resolve workspace root")
    }

    fn build_required_binaries(workspace_root: &Path) -> Result<()> {
        let status = std::process::Command::new("cargo")
            .args(["build", "-p", "master", "-p", "cli-client"])
            .current_dir(workspace_root)
            .status()
            .context("failed to run cargo build for system test binaries")?;

        if !status.success() {
            bail!("cargo build for system test binaries failed");
        }

        Ok(())
    }

    fn ensure_binaries_built(workspace_root: &Path) -> Result<()> {
        static BUILD_RESULT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

        let result = BUILD_RESULT.get_or_init(|| {
            build_required_binaries(workspace_root).map_err(|err| err.to_string())
        });

        if let Err(message) = result {
            bail!("failed to build required binaries: {message}");
        }

        Ok(())
    }

    fn fresh_data_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("chunkvault-{name}-{unique}"));
        let _ = fs::remove_dir_all(&path);
        let _ = fs::create_dir_all(&path);
        path
    }
}
