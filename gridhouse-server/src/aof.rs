//! # Append-Only File
//!
//! Purpose: Persist every successful write command as a RESP array, with
//! asynchronous batched writes, a configurable fsync policy, and an online
//! rewrite that compacts the log from a live keyspace snapshot.
//!
//! ## Design Principles
//! 1. **Fire-and-Forget Intake**: Connections hand blobs to a bounded
//!    queue and never block; a full queue drops the blob with a warning.
//!    Durability under intake overflow is explicitly best-effort.
//! 2. **Single Writer, One Order**: One drain task owns the file, and the
//!    FLUSHDB truncation travels through the same queue as the blobs, so
//!    the file always reflects intake order. The writer mutex serializes
//!    the drain task against the fsync ticker and the rewrite swap.
//! 3. **Rewrite Under the Mutex**: The snapshot, the rewrite file, and the
//!    rename swap all happen while the writer mutex is held, so every blob
//!    drained after the swap lands in the new file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gridhouse_common::{now_ms, GridResult};
use gridhouse_engine::{format_float, Keyspace, Value};

use crate::commands::apply;
use crate::config::{Config, SyncPolicy};
use crate::resp::{encode_command, parse_request};

/// Bound on queued-but-unwritten blobs.
const INTAKE_CAPACITY: usize = 65_536;

/// Buffered-writer capacity in front of the file.
const WRITE_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Largest batch drained in one pass.
const BATCH_MAX_BLOBS: usize = 5000;

/// How long a partial batch waits for more blobs.
const BATCH_WINDOW: Duration = Duration::from_millis(5);

const FSYNC_INTERVAL: Duration = Duration::from_secs(1);
const REWRITE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Rewrite and rotation knobs, lifted from the server config.
#[derive(Debug, Clone)]
pub struct AofSettings {
    pub path: PathBuf,
    pub policy: SyncPolicy,
    pub rewrite: bool,
    pub rewrite_min_size: u64,
    pub rewrite_growth_threshold: u64,
    pub rewrite_percentage: u64,
}

impl AofSettings {
    pub fn from_config(config: &Config) -> Self {
        AofSettings {
            path: config.aof_path(),
            policy: config.aof_sync,
            rewrite: config.aof_rewrite,
            rewrite_min_size: config.aof_rewrite_min_size,
            rewrite_growth_threshold: config.aof_rewrite_growth_threshold,
            rewrite_percentage: config.aof_rewrite_percentage,
        }
    }
}

enum AofMessage {
    Blob(Vec<u8>),
    /// Empty the file in place, after every blob queued before it.
    Truncate,
    Shutdown(oneshot::Sender<()>),
}

struct AofFile {
    writer: BufWriter<File>,
}

struct AofInner {
    settings: AofSettings,
    file: Mutex<AofFile>,
    current_size: AtomicU64,
    base_size: AtomicU64,
    /// Unix seconds of the last completed rewrite; -1 = never.
    last_rewrite_secs: AtomicI64,
}

/// Handle to the append-only file: non-blocking intake plus control
/// operations. Background tasks are spawned via `spawn_tasks`.
pub struct AofWriter {
    tx: mpsc::Sender<AofMessage>,
    rx: Mutex<Option<mpsc::Receiver<AofMessage>>>,
    inner: Arc<AofInner>,
}

impl AofWriter {
    /// Opens (or creates) the log in append mode.
    pub fn open(settings: AofSettings) -> std::io::Result<AofWriter> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&settings.path)?;
        let size = file.metadata()?.len();

        let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
        Ok(AofWriter {
            tx,
            rx: Mutex::new(Some(rx)),
            inner: Arc::new(AofInner {
                settings,
                file: Mutex::new(AofFile {
                    writer: BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file),
                }),
                current_size: AtomicU64::new(size),
                base_size: AtomicU64::new(size),
                last_rewrite_secs: AtomicI64::new(-1),
            }),
        })
    }

    /// Queues one or more pre-encoded commands. Never blocks: a full
    /// intake drops the blob and logs a warning.
    pub fn append(&self, blob: Vec<u8>) {
        match self.tx.try_send(AofMessage::Blob(blob)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(AofMessage::Blob(blob))) => {
                warn!(bytes = blob.len(), "append-only intake full; dropping write");
            }
            Err(_) => {}
        }
    }

    /// Starts the drain task plus, per configuration, the per-second fsync
    /// ticker and the rewrite checker.
    pub fn spawn_tasks(&self, keyspace: Arc<Keyspace>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(rx) = self.rx.lock().take() {
            tasks.push(tokio::spawn(run_drain(self.inner.clone(), rx)));
        }
        if self.inner.settings.policy == SyncPolicy::Everysec {
            tasks.push(tokio::spawn(run_fsync_ticker(self.inner.clone())));
        }
        if self.inner.settings.rewrite {
            tasks.push(tokio::spawn(run_rewrite_checker(
                self.inner.clone(),
                keyspace,
            )));
        }
        tasks
    }

    /// Drains the queue, flushes, and fsyncs. The drain task exits.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AofMessage::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Queues a truncation (FLUSHDB path). It applies in intake order,
    /// after every blob already queued, so replay cannot resurrect
    /// pre-flush writes. Never blocks; like blobs, it is dropped with a
    /// warning when the intake is full.
    pub fn truncate(&self) {
        match self.tx.try_send(AofMessage::Truncate) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("append-only intake full; dropping truncate");
            }
            Err(_) => {}
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.settings.path
    }

    pub fn current_size(&self) -> u64 {
        self.inner.current_size.load(Ordering::Relaxed)
    }

    pub fn last_rewrite_secs(&self) -> i64 {
        self.inner.last_rewrite_secs.load(Ordering::Relaxed)
    }
}

async fn run_drain(inner: Arc<AofInner>, mut rx: mpsc::Receiver<AofMessage>) {
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(64);
    loop {
        batch.clear();
        let mut shutdown_ack = None;
        let mut truncate_after = false;

        match rx.recv().await {
            Some(AofMessage::Blob(blob)) => batch.push(blob),
            Some(AofMessage::Truncate) => {
                inner.truncate_file();
                continue;
            }
            Some(AofMessage::Shutdown(ack)) => {
                inner.flush_and_sync();
                let _ = ack.send(());
                return;
            }
            None => break,
        }

        // Collect more blobs until the batch fills, the window closes, or
        // a control message ends the batch.
        let deadline = tokio::time::Instant::now() + BATCH_WINDOW;
        while batch.len() < BATCH_MAX_BLOBS && shutdown_ack.is_none() && !truncate_after {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(AofMessage::Blob(blob))) => batch.push(blob),
                Ok(Some(AofMessage::Truncate)) => truncate_after = true,
                Ok(Some(AofMessage::Shutdown(ack))) => shutdown_ack = Some(ack),
                Ok(None) | Err(_) => break,
            }
        }

        inner.write_batch(&batch);
        if truncate_after {
            inner.truncate_file();
        }

        if let Some(ack) = shutdown_ack {
            inner.flush_and_sync();
            let _ = ack.send(());
            return;
        }
    }
    inner.flush_and_sync();
}

async fn run_fsync_ticker(inner: Arc<AofInner>) {
    let mut interval = tokio::time::interval(FSYNC_INTERVAL);
    loop {
        interval.tick().await;
        inner.flush_and_sync();
    }
}

async fn run_rewrite_checker(inner: Arc<AofInner>, keyspace: Arc<Keyspace>) {
    let mut interval = tokio::time::interval(REWRITE_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if !inner.should_rewrite() {
            continue;
        }
        let task_inner = inner.clone();
        let task_keyspace = keyspace.clone();
        match tokio::task::spawn_blocking(move || task_inner.rewrite(&task_keyspace)).await {
            Ok(Ok(())) => info!("append-only rewrite complete"),
            Ok(Err(err)) => error!("append-only rewrite failed: {err}"),
            Err(err) => error!("append-only rewrite task panicked: {err}"),
        }
    }
}

impl AofInner {
    fn write_batch(&self, batch: &[Vec<u8>]) {
        if batch.is_empty() {
            return;
        }
        let mut file = self.file.lock();
        let mut written = 0u64;
        for blob in batch {
            if let Err(err) = file.writer.write_all(blob) {
                error!("append-only write failed: {err}");
                return;
            }
            written += blob.len() as u64;
        }
        if let Err(err) = file.writer.flush() {
            error!("append-only flush failed: {err}");
            return;
        }
        if self.settings.policy == SyncPolicy::Always {
            if let Err(err) = file.writer.get_ref().sync_data() {
                error!("append-only fsync failed: {err}");
                return;
            }
        }
        self.current_size.fetch_add(written, Ordering::Relaxed);
    }

    fn flush_and_sync(&self) {
        let mut file = self.file.lock();
        let result = file
            .writer
            .flush()
            .and_then(|()| file.writer.get_ref().sync_data());
        if let Err(err) = result {
            error!("append-only fsync failed: {err}");
        }
    }

    fn truncate_file(&self) {
        let mut file = self.file.lock();
        let result = file
            .writer
            .flush()
            .and_then(|()| file.writer.get_ref().set_len(0));
        if let Err(err) = result {
            error!("append-only truncate failed: {err}");
            return;
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.base_size.store(0, Ordering::Relaxed);
    }

    /// Rewrite triggers only when the log is past the minimum size and has
    /// grown past the absolute or relative threshold over the base size.
    fn should_rewrite(&self) -> bool {
        if !self.settings.rewrite {
            return false;
        }
        let size = self.current_size.load(Ordering::Relaxed);
        if size < self.settings.rewrite_min_size {
            return false;
        }
        let base = self.base_size.load(Ordering::Relaxed);
        let growth = size.saturating_sub(base);
        growth >= self.settings.rewrite_growth_threshold
            || (base > 0 && growth * 100 >= base * self.settings.rewrite_percentage)
    }

    /// Compacts the log from a live keyspace snapshot, then atomically
    /// swaps it in. The writer mutex is held throughout so nothing drains
    /// into the file mid-swap; a failed step rolls the renames back and
    /// the original keeps serving.
    fn rewrite(&self, keyspace: &Keyspace) -> std::io::Result<()> {
        let path = &self.settings.path;
        let rewrite_path = sibling(path, ".rewrite");
        let backup_path = sibling(path, ".backup");

        let mut file = self.file.lock();
        file.writer.flush()?;

        {
            let out = File::create(&rewrite_path)?;
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, out);
            let now = now_ms();
            for (key, value, expires_at) in keyspace.snapshot() {
                if expires_at != 0 && now > expires_at {
                    continue;
                }
                let mut blob = Vec::new();
                rewrite_commands(&key, &value, expires_at, now, &mut blob);
                writer.write_all(&blob)?;
            }
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        let had_original = path.exists();
        if had_original {
            std::fs::rename(path, &backup_path)?;
        }
        if let Err(err) = std::fs::rename(&rewrite_path, path) {
            if had_original {
                let _ = std::fs::rename(&backup_path, path);
            }
            let _ = std::fs::remove_file(&rewrite_path);
            return Err(err);
        }

        let reopened = match OpenOptions::new().append(true).create(true).open(path) {
            Ok(handle) => handle,
            Err(err) => {
                // Put the old log back; the still-open handle keeps
                // serving the original inode either way.
                let _ = std::fs::rename(path, &rewrite_path);
                if had_original {
                    let _ = std::fs::rename(&backup_path, path);
                }
                return Err(err);
            }
        };

        let size = reopened.metadata()?.len();
        file.writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, reopened);
        self.current_size.store(size, Ordering::Relaxed);
        self.base_size.store(size, Ordering::Relaxed);
        self.last_rewrite_secs.store(unix_secs(), Ordering::Relaxed);
        drop(file);

        let _ = std::fs::remove_file(&backup_path);
        Ok(())
    }
}

/// Emits the command sequence that rebuilds one key: a type-appropriate
/// write plus an EXPIRE for keys carrying a TTL.
fn rewrite_commands(key: &[u8], value: &Value, expires_at: u64, now: u64, out: &mut Vec<u8>) {
    match value {
        Value::Str(data) => encode_command(&[b"SET", key, data], out),
        Value::List(list) => {
            let items = list.items();
            if !items.is_empty() {
                let mut parts: Vec<&[u8]> = vec![b"RPUSH", key];
                parts.extend(items.iter().map(Vec::as_slice));
                encode_command(&parts, out);
            }
        }
        Value::Set(set) => {
            let members = set.members();
            if !members.is_empty() {
                let mut parts: Vec<&[u8]> = vec![b"SADD", key];
                parts.extend(members.iter().map(Vec::as_slice));
                encode_command(&parts, out);
            }
        }
        Value::Hash(hash) => {
            let entries = hash.entries();
            if !entries.is_empty() {
                let mut parts: Vec<&[u8]> = vec![b"HSET", key];
                for (field, value) in &entries {
                    parts.push(field);
                    parts.push(value);
                }
                encode_command(&parts, out);
            }
        }
        Value::ZSet(zset) => {
            let entries = zset.entries();
            if !entries.is_empty() {
                let scores: Vec<Vec<u8>> = entries
                    .iter()
                    .map(|(_, score)| format_float(*score).into_bytes())
                    .collect();
                let mut parts: Vec<&[u8]> = vec![b"ZADD", key];
                for ((member, _), score) in entries.iter().zip(&scores) {
                    parts.push(score);
                    parts.push(member);
                }
                encode_command(&parts, out);
            }
        }
        Value::Stream(stream) => {
            for entry in stream.entries() {
                let id = entry.id.to_string().into_bytes();
                let mut parts: Vec<&[u8]> = vec![b"XADD", key, &id];
                for (field, value) in &entry.fields {
                    parts.push(field);
                    parts.push(value);
                }
                encode_command(&parts, out);
            }
        }
    }

    if expires_at != 0 {
        let seconds = ((expires_at - now) + 999) / 1000;
        let seconds = seconds.max(1).to_string().into_bytes();
        encode_command(&[b"EXPIRE", key, &seconds], out);
    }
}

/// Replays a log into the keyspace. A malformed or truncated tail stops
/// the replay with a warning; everything before it stands.
pub fn replay(path: &Path, keyspace: &Keyspace) -> GridResult<u64> {
    let data = std::fs::read(path)?;
    let mut buf = BytesMut::from(&data[..]);
    let mut applied = 0u64;
    loop {
        match parse_request(&mut buf) {
            Ok(Some(request)) => {
                if apply(keyspace, &request.name, &request.args) {
                    applied += 1;
                } else {
                    debug!(command = %request.name, "skipped unreplayable log entry");
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("stopping append-only replay on malformed entry: {err}");
                break;
            }
        }
    }
    Ok(applied)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
