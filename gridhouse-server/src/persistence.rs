//! # Persistence Manager
//!
//! Coordinates the append-only log and the snapshot file: load order at
//! startup, the write-change counter, the periodic snapshot trigger, and
//! the FLUSHDB/shutdown lifecycles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gridhouse_common::GridResult;
use gridhouse_engine::Keyspace;

use crate::aof::{self, AofSettings, AofWriter};
use crate::config::Config;
use crate::rdb;

/// Owns AOF + RDB state and the change counter.
pub struct PersistenceManager {
    aof: Option<AofWriter>,
    rdb_enabled: bool,
    rdb_path: PathBuf,
    save_interval: Duration,
    min_changes: u64,
    changes: AtomicU64,
    saving: AtomicBool,
}

impl PersistenceManager {
    /// Creates the persistence directory and opens the log when enabled.
    /// Directory or log-open failure is a startup error.
    pub fn new(config: &Config) -> GridResult<Self> {
        std::fs::create_dir_all(&config.dir)?;

        let aof = if config.aof {
            Some(AofWriter::open(AofSettings::from_config(config))?)
        } else {
            None
        };

        Ok(PersistenceManager {
            aof,
            rdb_enabled: config.rdb,
            rdb_path: config.rdb_path(),
            save_interval: Duration::from_secs(config.save_interval.max(1)),
            min_changes: config.min_changes,
            changes: AtomicU64::new(0),
            saving: AtomicBool::new(false),
        })
    }

    /// Startup recovery: prefer the snapshot; fall through to log replay
    /// when the snapshot is absent or unreadable.
    pub fn load(&self, keyspace: &Keyspace) {
        let mut snapshot_loaded = false;
        if self.rdb_enabled && self.rdb_path.exists() {
            match rdb::load(&self.rdb_path, keyspace) {
                Ok(keys) => {
                    info!(keys, "loaded snapshot");
                    snapshot_loaded = true;
                }
                Err(err) => warn!("snapshot load failed, falling back to log replay: {err}"),
            }
        }

        if !snapshot_loaded {
            if let Some(aof) = &self.aof {
                let path = aof.path();
                if path.exists() {
                    match aof::replay(path, keyspace) {
                        Ok(commands) => info!(commands, "replayed append-only log"),
                        Err(err) => warn!("append-only replay failed: {err}"),
                    }
                }
            }
        }
    }

    /// Records `count` write commands and forwards the already-encoded
    /// blob to the log. The pipeline path passes one multi-command blob
    /// per batch.
    pub fn on_write(&self, count: u64, blob: Vec<u8>) {
        self.changes.fetch_add(count, Ordering::Relaxed);
        if let Some(aof) = &self.aof {
            aof.append(blob);
        }
    }

    /// Spawns the AOF background tasks and, when snapshots are enabled,
    /// the periodic save checker.
    pub fn spawn_tasks(self: &Arc<Self>, keyspace: Arc<Keyspace>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(aof) = &self.aof {
            tasks.extend(aof.spawn_tasks(keyspace.clone()));
        }
        if self.rdb_enabled {
            let manager = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(manager.save_interval);
                // The first tick fires immediately; skip it so an idle
                // server does not save on boot.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if manager.changes.load(Ordering::Relaxed) >= manager.min_changes {
                        let task_manager = Arc::clone(&manager);
                        let task_keyspace = keyspace.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            task_manager.save_now(&task_keyspace)
                        })
                        .await;
                        if let Ok(Err(err)) = result {
                            error!("periodic snapshot failed: {err}");
                        }
                    }
                }
            }));
        }
        tasks
    }

    /// Writes a snapshot now, blocking until it is on disk. The change
    /// counter resets only on success.
    pub fn save_now(&self, keyspace: &Keyspace) -> std::io::Result<()> {
        if !self.rdb_enabled {
            return Ok(());
        }
        rdb::write(&self.rdb_path, keyspace)?;
        self.changes.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Spawns a background save and returns immediately. False when a
    /// background save is already running.
    pub fn bgsave(self: &Arc<Self>, keyspace: Arc<Keyspace>) -> bool {
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = manager.save_now(&keyspace) {
                error!("background save failed: {err}");
            }
            manager.saving.store(false, Ordering::Release);
        });
        true
    }

    /// FLUSHDB path: queue a log truncation (ordered after every blob
    /// already queued), delete the snapshot, reset the counter.
    pub fn flush_db(&self) {
        if let Some(aof) = &self.aof {
            aof.truncate();
        }
        if let Err(err) = std::fs::remove_file(&self.rdb_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("could not delete snapshot: {err}");
            }
        }
        self.changes.store(0, Ordering::Relaxed);
    }

    /// Shutdown: drain + flush + fsync the log, then a final snapshot when
    /// snapshots are enabled.
    pub async fn shutdown(&self, keyspace: &Keyspace) {
        if let Some(aof) = &self.aof {
            aof.shutdown().await;
        }
        if self.rdb_enabled {
            if let Err(err) = self.save_now(keyspace) {
                error!("final snapshot failed: {err}");
            }
        }
    }

    pub fn aof_enabled(&self) -> bool {
        self.aof.is_some()
    }

    pub fn aof_current_size(&self) -> u64 {
        self.aof.as_ref().map(AofWriter::current_size).unwrap_or(0)
    }

    pub fn aof_last_rewrite_time_sec(&self) -> i64 {
        self.aof
            .as_ref()
            .map(AofWriter::last_rewrite_secs)
            .unwrap_or(-1)
    }

    pub fn changes_since_last_save(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }
}
