use anyhow::Result;
use clap::{Parser, Subcommand};
use client_sdk::MasterClient;
use common::FileId;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "chunkvault")]
#[command(about = "Admin CLI for the chunkvault master")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:7070")]
    master_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Health,
    /// Node, file and replication counters.
    Status,
    /// All nodes, including removed tombstones.
    Nodes,
    Files,
    File {
        file_id: FileId,
    },
    DeleteFile {
        file_id: FileId,
    },
    /// Pending copy instructions and chunks without a healthy replica.
    Rebalances,
    /// Runs a replication sweep now.
    Sweep,
    Fail {
        node_id: String,
    },
    Restore {
        node_id: String,
    },
    Remove {
        node_id: String,
        /// Remove even if chunks still list the node as a replica.
        #[arg(long)]
        force: bool,
    },
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = MasterClient::new(&cli.master_url);

    match cli.command {
        Commands::Health => print_json(&client.health().await?)?,
        Commands::Status => print_json(&client.cluster_status().await?)?,
        Commands::Nodes => {
            let nodes = client.list_nodes().await?;
            for node in &nodes {
                println!(
                    "{:<16} {:<10} {}:{:<6} free {}/{} bytes",
                    node.node_id,
                    node.health.as_str(),
                    node.host,
                    node.port,
                    node.free_bytes,
                    node.capacity_bytes
                );
            }
            if nodes.is_empty() {
                println!("no nodes registered");
            }
        }
        Commands::Files => {
            let files = client.list_files().await?;
            for file in &files {
                println!(
                    "{} {:<24} {} bytes, {} chunks, {} under-replicated",
                    file.file_id,
                    file.name,
                    file.size_bytes,
                    file.total_chunks,
                    file.under_replicated_chunks
                );
            }
            if files.is_empty() {
                println!("no files");
            }
        }
        Commands::File { file_id } => print_json(&client.file_metadata(file_id).await?)?,
        Commands::DeleteFile { file_id } => {
            client.delete_file(file_id).await?;
            println!("deleted file {file_id}");
        }
        Commands::Rebalances => print_json(&client.list_rebalances().await?)?,
        Commands::Sweep => {
            let report = client.trigger_sweep().await?;
            let sourceless = report
                .emitted
                .iter()
                .filter(|instruction| instruction.is_unrecoverable())
                .count();
            println!(
                "emitted {} instruction(s) ({} without a source), completed {}, expired {}, {} unrecoverable chunk(s), {} short of targets",
                report.emitted.len(),
                sourceless,
                report.completed,
                report.expired,
                report.unrecoverable.len(),
                report.short_of_targets
            );
        }
        Commands::Fail { node_id } => {
            client.mark_node_failed(&node_id).await?;
            println!("node {node_id} marked unhealthy");
        }
        Commands::Restore { node_id } => {
            client.restore_node(&node_id).await?;
            println!("node {node_id} restored");
        }
        Commands::Remove { node_id, force } => {
            client.remove_node(&node_id, force).await?;
            println!("node {node_id} removed");
        }
        Commands::Metrics => print!("{}", client.metrics_text().await?),
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
