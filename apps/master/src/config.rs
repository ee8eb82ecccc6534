use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::warn;

pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub chunk_size_bytes: u64,
    pub replication_factor: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub rebalance_interval_secs: u64,
    pub instruction_ttl_sweeps: u64,
    pub snapshot_interval_secs: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7070)),
            data_dir: None,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            rebalance_interval_secs: 15,
            instruction_ttl_sweeps: 2,
            snapshot_interval_secs: 30,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse_or(&lookup, "CHUNKVAULT_MASTER_BIND", defaults.bind_addr)?,
            data_dir: lookup("CHUNKVAULT_DATA_DIR")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            chunk_size_bytes: parse_or(&lookup, "CHUNKVAULT_CHUNK_SIZE", defaults.chunk_size_bytes)?,
            replication_factor: parse_or(
                &lookup,
                "CHUNKVAULT_REPLICATION",
                defaults.replication_factor,
            )?,
            heartbeat_interval_secs: parse_or(
                &lookup,
                "CHUNKVAULT_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            heartbeat_timeout_secs: parse_or(
                &lookup,
                "CHUNKVAULT_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout_secs,
            )?,
            rebalance_interval_secs: parse_or(
                &lookup,
                "CHUNKVAULT_REBALANCE_INTERVAL_SECS",
                defaults.rebalance_interval_secs,
            )?,
            instruction_ttl_sweeps: parse_or(
                &lookup,
                "CHUNKVAULT_INSTRUCTION_TTL_SWEEPS",
                defaults.instruction_ttl_sweeps,
            )?,
            snapshot_interval_secs: parse_or(
                &lookup,
                "CHUNKVAULT_SNAPSHOT_INTERVAL_SECS",
                defaults.snapshot_interval_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("CHUNKVAULT_CHUNK_SIZE", self.chunk_size_bytes),
            ("CHUNKVAULT_REPLICATION", self.replication_factor as u64),
            ("CHUNKVAULT_HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval_secs),
            ("CHUNKVAULT_HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout_secs),
            ("CHUNKVAULT_REBALANCE_INTERVAL_SECS", self.rebalance_interval_secs),
            ("CHUNKVAULT_INSTRUCTION_TTL_SWEEPS", self.instruction_ttl_sweeps),
            ("CHUNKVAULT_SNAPSHOT_INTERVAL_SECS", self.snapshot_interval_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }

        if self.heartbeat_timeout_secs < 2 * self.heartbeat_interval_secs {
            warn!(
                heartbeat_interval_secs = self.heartbeat_interval_secs,
                heartbeat_timeout_secs = self.heartbeat_timeout_secs,
                "heartbeat timeout is shorter than two intervals; healthy nodes may flap"
            );
        }

        Ok(())
    }

    pub fn instruction_ttl_secs(&self) -> u64 {
        self.rebalance_interval_secs
            .saturating_mul(self.instruction_ttl_sweeps)
    }

    /// The timeout sweep runs twice per timeout window.
    pub fn timeout_sweep_interval_secs(&self) -> u64 {
        (self.heartbeat_timeout_secs / 2).max(1)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("state").join("master.json"))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
