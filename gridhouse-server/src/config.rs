//! # Server Configuration
//!
//! Command-line surface for the server binary. Every knob that drives the
//! core — persistence, replication, buffers, admission — lands here so the
//! rest of the code reads plain fields.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// AOF filename under the persistence directory.
pub const AOF_FILE: &str = "appendonly.aof";

/// Snapshot filename under the persistence directory.
pub const RDB_FILE: &str = "dump.rdb";

/// When to fsync the append-only file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncPolicy {
    /// fsync after every write batch.
    Always,
    /// fsync once per second from a background ticker.
    Everysec,
    /// Never fsync from GridHouse; rely on the OS.
    No,
}

/// Server configuration, parsed from the command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "gridhouse", about = "Redis-compatible in-memory key-value server")]
pub struct Config {
    /// Listen address as host:port; a bare :port binds all interfaces.
    #[arg(long, default_value = ":6380")]
    pub port: String,

    /// Shared password required via AUTH before any other command.
    #[arg(long)]
    pub requirepass: Option<String>,

    /// Start as a replica of this master (host:port).
    #[arg(long)]
    pub slaveof: Option<String>,

    /// Persistence directory.
    #[arg(long, default_value = "./data")]
    pub dir: PathBuf,

    /// Enable the append-only file.
    #[arg(long)]
    pub aof: bool,

    /// AOF fsync policy.
    #[arg(long, value_enum, default_value_t = SyncPolicy::Everysec)]
    pub aof_sync: SyncPolicy,

    /// Enable automatic AOF rewrite.
    #[arg(long, default_value_t = true)]
    pub aof_rewrite: bool,

    /// Absolute growth over the base size that triggers a rewrite.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub aof_rewrite_growth_threshold: u64,

    /// Minimum AOF size before rewrite is considered.
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    pub aof_rewrite_min_size: u64,

    /// Relative growth (percent of base size) that triggers a rewrite.
    #[arg(long, default_value_t = 100)]
    pub aof_rewrite_percentage: u64,

    /// Enable periodic snapshots.
    #[arg(long)]
    pub rdb: bool,

    /// Seconds between snapshot checks.
    #[arg(long, default_value_t = 300)]
    pub save_interval: u64,

    /// Minimum write-command count since the last save before the next
    /// snapshot is taken.
    #[arg(long, default_value_t = 1)]
    pub min_changes: u64,

    /// Per-connection read buffer capacity in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub read_buffer: usize,

    /// Per-connection write buffer capacity in bytes (0 = default).
    #[arg(long, default_value_t = 0)]
    pub write_buffer: usize,

    /// Maximum simultaneous client connections (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_clients: u64,

    /// Approximate memory ceiling in bytes for admission (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_memory: u64,

    /// Log verbosity.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Defaults with persistence rooted at `dir`, used by tests.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::parse_from(["gridhouse"]);
        config.dir = dir.into();
        config.port = ":0".to_string();
        config
    }

    /// Bindable listen address; a bare `:port` becomes `0.0.0.0:port`.
    pub fn listen_addr(&self) -> String {
        if self.port.starts_with(':') {
            format!("0.0.0.0{}", self.port)
        } else {
            self.port.clone()
        }
    }

    /// Port this server tells masters it listens on.
    pub fn listen_port(&self) -> u16 {
        self.port
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok())
            .unwrap_or(0)
    }

    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(AOF_FILE)
    }

    pub fn rdb_path(&self) -> PathBuf {
        self.dir.join(RDB_FILE)
    }
}
