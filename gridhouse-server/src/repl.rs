//! # Replication Manager
//!
//! Purpose: Track the server's role, fan successful write commands out to
//! attached replicas, and keep a bounded backlog of recent write bytes.
//!
//! ## Design Principles
//! 1. **Exclusive Ownership**: The manager owns the backlog and every
//!    replica session; a session that fails to send is dropped.
//! 2. **Non-Blocking Fan-Out**: Each replica gets an unbounded channel
//!    drained by its own writer task, so a slow replica never stalls the
//!    command path.
//! 3. **Full Resync Only**: The backlog honors its offset contract but
//!    PSYNC always answers FULLRESYNC; partial resync is not consulted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default backlog capacity in bytes.
pub const BACKLOG_CAPACITY: usize = 1024 * 1024;

/// Replication role of this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave { master_addr: String },
}

/// Bounded ring of recent write-command bytes.
///
/// `offset()` grows monotonically; bytes older than `base()` have been
/// dropped and are unrecoverable.
#[derive(Debug)]
pub struct Backlog {
    buf: VecDeque<u8>,
    capacity: usize,
    base: u64,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Backlog {
            buf: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            base: 0,
        }
    }

    /// Appends bytes, dropping from the head once capacity is exceeded and
    /// advancing `base` by the dropped amount.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
        if self.buf.len() > self.capacity {
            let dropped = self.buf.len() - self.capacity;
            self.buf.drain(..dropped);
            self.base += dropped as u64;
        }
    }

    /// Total bytes ever appended.
    pub fn offset(&self) -> u64 {
        self.base + self.buf.len() as u64
    }

    /// Oldest offset still held.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Copies out bytes `[max(offset, base), min(offset + len, offset()))`.
    pub fn read_from(&self, offset: u64, len: usize) -> Vec<u8> {
        let start = offset.max(self.base);
        let end = (offset.saturating_add(len as u64)).min(self.offset());
        if start >= end {
            return Vec::new();
        }
        let skip = (start - self.base) as usize;
        let count = (end - start) as usize;
        self.buf.iter().skip(skip).take(count).copied().collect()
    }
}

struct ReplicaSession {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    addr: String,
}

/// Role, run id, backlog, and the set of live replica sessions.
pub struct ReplicationManager {
    run_id: String,
    role: RwLock<Role>,
    backlog: Mutex<Backlog>,
    replicas: Mutex<HashMap<u64, ReplicaSession, RandomState>>,
    next_replica_id: AtomicU64,
    slave_task: Mutex<Option<JoinHandle<()>>>,
    /// Bytes of master stream applied while in the slave role.
    applied: AtomicU64,
}

impl Default for ReplicationManager {
    fn default() -> Self {
        ReplicationManager::new()
    }
}

impl ReplicationManager {
    pub fn new() -> Self {
        ReplicationManager {
            run_id: random_hex(40),
            role: RwLock::new(Role::Master),
            backlog: Mutex::new(Backlog::new(BACKLOG_CAPACITY)),
            replicas: Mutex::new(HashMap::with_hasher(RandomState::new())),
            next_replica_id: AtomicU64::new(1),
            slave_task: Mutex::new(None),
            applied: AtomicU64::new(0),
        }
    }

    /// Random 40-hex id distinguishing this master's history.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_master(&self) -> bool {
        matches!(*self.role.read(), Role::Master)
    }

    pub fn role_name(&self) -> &'static str {
        match *self.role.read() {
            Role::Master => "master",
            Role::Slave { .. } => "slave",
        }
    }

    pub fn set_master(&self) {
        *self.role.write() = Role::Master;
    }

    pub fn set_slave(&self, master_addr: String) {
        *self.role.write() = Role::Slave { master_addr };
    }

    /// Replaces the outbound replication task, aborting any previous one.
    pub fn store_slave_task(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.slave_task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn abort_slave_task(&self) {
        if let Some(task) = self.slave_task.lock().take() {
            task.abort();
        }
    }

    /// Count of bytes appended to the backlog; also what REPLCONF GETACK
    /// reports.
    pub fn offset(&self) -> u64 {
        self.backlog.lock().offset()
    }

    pub fn read_backlog(&self, offset: u64, len: usize) -> Vec<u8> {
        self.backlog.lock().read_from(offset, len)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().len()
    }

    /// Master write path: record the bytes in the backlog, then send them
    /// to every replica. Sessions whose channel is gone are removed.
    pub fn append_command(&self, bytes: &[u8]) {
        self.backlog.lock().append(bytes);

        let mut dead = Vec::new();
        {
            let replicas = self.replicas.lock();
            for (id, session) in replicas.iter() {
                if session.sender.send(bytes.to_vec()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.remove_replica(id);
        }
    }

    /// Registers a replica connection's write half and starts its writer
    /// task. Returns the session id.
    pub fn attach_replica(
        &self,
        writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
        addr: String,
    ) -> u64 {
        let id = self.next_replica_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let task_addr = addr.clone();

        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let mut writer = writer.lock().await;
                if let Err(err) = writer.write_all(&chunk).await {
                    warn!("replica {task_addr} send failed: {err}");
                    break;
                }
                if let Err(err) = writer.flush().await {
                    warn!("replica {task_addr} flush failed: {err}");
                    break;
                }
            }
            debug!("replica writer for {task_addr} stopped");
        });

        self.replicas
            .lock()
            .insert(id, ReplicaSession { sender: tx, addr: addr.clone() });
        info!("replica attached from {addr}");
        id
    }

    pub fn remove_replica(&self, id: u64) {
        if let Some(session) = self.replicas.lock().remove(&id) {
            info!("replica {} detached", session.addr);
        }
    }

    /// Slave side: account bytes of master stream applied locally.
    pub fn note_applied(&self, bytes: u64) {
        self.applied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn applied_offset(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Resets the applied counter to the offset announced by FULLRESYNC.
    pub fn reset_applied(&self, offset: u64) {
        self.applied.store(offset, Ordering::Relaxed);
    }
}

fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_sum_of_appended_lengths() {
        let mut backlog = Backlog::new(64);
        backlog.append(b"abcd");
        backlog.append(b"efgh");
        assert_eq!(backlog.offset(), 8);
        assert_eq!(backlog.base(), 0);
    }

    #[test]
    fn read_from_clamps_to_window() {
        let mut backlog = Backlog::new(64);
        backlog.append(b"0123456789");

        assert_eq!(backlog.read_from(0, 4), b"0123".to_vec());
        assert_eq!(backlog.read_from(4, 100), b"456789".to_vec());
        assert_eq!(backlog.read_from(10, 4), Vec::<u8>::new());
    }

    #[test]
    fn overflow_drops_head_and_advances_base() {
        let mut backlog = Backlog::new(8);
        backlog.append(b"01234567");
        backlog.append(b"89");

        // Offset still counts every appended byte.
        assert_eq!(backlog.offset(), 10);
        assert_eq!(backlog.base(), 2);
        // Bytes older than base are unrecoverable; reads clamp forward.
        assert_eq!(backlog.read_from(0, 4), b"2345".to_vec());
        assert_eq!(backlog.read_from(8, 10), b"89".to_vec());
    }

    #[test]
    fn oversized_append_keeps_only_the_tail() {
        let mut backlog = Backlog::new(4);
        backlog.append(b"abcdefgh");
        assert_eq!(backlog.offset(), 8);
        assert_eq!(backlog.base(), 4);
        assert_eq!(backlog.read_from(4, 8), b"efgh".to_vec());
    }

    #[test]
    fn run_id_is_forty_hex_chars() {
        let manager = ReplicationManager::new();
        assert_eq!(manager.run_id().len(), 40);
        assert!(manager
            .run_id()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Two managers should not share a history id.
        assert_ne!(manager.run_id(), ReplicationManager::new().run_id());
    }

    #[test]
    fn role_transitions() {
        let manager = ReplicationManager::new();
        assert!(manager.is_master());
        assert_eq!(manager.role_name(), "master");

        manager.set_slave("127.0.0.1:6379".to_string());
        assert!(!manager.is_master());
        assert_eq!(manager.role_name(), "slave");

        manager.set_master();
        assert!(manager.is_master());
    }

    #[test]
    fn append_records_bytes_in_backlog() {
        let manager = ReplicationManager::new();
        manager.append_command(b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(manager.offset(), 14);
        assert_eq!(manager.read_backlog(0, 14), b"*1\r\n$4\r\nPING\r\n".to_vec());
    }
}
