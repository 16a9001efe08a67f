//! # Clock Helpers
//!
//! Expirations are stored as absolute Unix-epoch instants in milliseconds,
//! with `0` meaning "no expiration", so snapshots and the append-only log
//! can persist them without translation.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
///
/// A clock before the epoch collapses to `0`, which the keyspace treats as
/// "no expiration"; entries never expire spuriously on a broken clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
