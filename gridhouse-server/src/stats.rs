//! # Server Counters
//!
//! Lightweight atomic counters feeding the INFO report.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply on
//!    the request path.
//! 2. **Relaxed Ordering**: No cross-field ordering is required, only
//!    eventual consistency for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Thread-safe server counters.
#[derive(Debug)]
pub struct ServerStats {
    connections_received: AtomicU64,
    connected_clients: AtomicU64,
    commands_processed: AtomicU64,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
    started_at: Instant,
}

impl Default for ServerStats {
    fn default() -> Self {
        ServerStats::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        ServerStats {
            connections_received: AtomicU64::new(0),
            connected_clients: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records an accepted connection; call `connection_closed` on teardown.
    pub fn connection_opened(&self) {
        self.connections_received.fetch_add(1, Ordering::Relaxed);
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keyspace_hit(&self) {
        self.keyspace_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keyspace_miss(&self) {
        self.keyspace_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_received(&self) -> u64 {
        self.connections_received.load(Ordering::Relaxed)
    }

    pub fn connected_clients(&self) -> u64 {
        self.connected_clients.load(Ordering::Relaxed)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }

    pub fn keyspace_hits(&self) -> u64 {
        self.keyspace_hits.load(Ordering::Relaxed)
    }

    pub fn keyspace_misses(&self) -> u64 {
        self.keyspace_misses.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
