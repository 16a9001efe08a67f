//! # Sharded Keyspace
//!
//! Provide the concurrent key-to-entry map with per-shard locking,
//! TTL-aware lookups, and bounded background expiration.
//!
//! ## Usage
//!
//! - Use `Keyspace::new()` for the default 256-shard keyspace.
//! - Use `start_sweeper` to enable active TTL cleanup; the handle must be
//!   stopped on shutdown to avoid leaking the thread.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under
//!    concurrency; shard selection is a seeded 64-bit hash masked by the
//!    power-of-two shard count.
//! 2. **Lazy Expiration**: Reads treat `now > expires_at` as absent and
//!    remove observed-expired entries with a lock upgrade + double-check;
//!    the sweeper handles the rest with bounded per-shard scans.
//! 3. **Short Critical Sections**: Shard locks cover only map
//!    lookup/insert/remove; containers carry their own locks.

use std::hash::{BuildHasher, Hasher};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;

use gridhouse_common::{now_ms, GridError, GridResult};

use crate::hash::{parse_i64, HashValue};
use crate::list::ListValue;
use crate::set::SetValue;
use crate::stream::StreamValue;
use crate::value::{DataType, Value};
use crate::zset::ZSetValue;

/// Default shard count; a power of two so selection is a mask.
pub const SHARD_COUNT: usize = 256;

/// Default cap on entries examined per shard per sweep tick.
const SWEEP_SAMPLE: usize = 8192;

/// One keyspace entry: a typed value plus its absolute expiration in Unix
/// milliseconds (`0` = no expiration).
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: u64,
}

impl Entry {
    /// An entry is logically absent once the clock passes its expiration,
    /// regardless of when physical removal happens.
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }
}

/// Per-shard map behind its own lock, padded to a cache line so adjacent
/// shard locks do not false-share.
#[repr(align(64))]
#[derive(Debug)]
struct Shard {
    map: RwLock<HashMap<Vec<u8>, Entry, RandomState>>,
}

/// TTL state for a key, mirroring the Redis sentinel semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired (`-2` on the wire).
    Missing,
    /// Key exists without an expiration (`-1` on the wire).
    NoExpiry,
    /// Key expires after this many milliseconds.
    Remaining(u64),
}

/// Sharded, TTL-aware keyspace.
#[derive(Debug)]
pub struct Keyspace {
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
}

impl Default for Keyspace {
    fn default() -> Self {
        Keyspace::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        Self::with_shard_count(SHARD_COUNT)
    }

    /// Creates a keyspace with a caller-provided shard count, normalized to
    /// the next power of two to enable fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let hash_state = RandomState::new();
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Shard {
                map: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            });
        }

        Keyspace {
            shards: shard_vec,
            shard_mask: shard_count - 1,
            hash_state,
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        &self.shards[(hasher.finish() as usize) & self.shard_mask]
    }

    /// Clones the live value for a key, treating expired entries as absent
    /// without removing them (removal belongs to write paths and the
    /// sweeper).
    fn live_value(&self, key: &[u8]) -> Option<Value> {
        let now = now_ms();
        let map = self.shard_for(key).map.read();
        map.get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Installs a string entry, replacing any existing entry of any type.
    /// `expires_at` is an absolute Unix-ms instant; `0` means no expiration.
    pub fn set_string(&self, key: Vec<u8>, value: Bytes, expires_at: u64) {
        let mut map = self.shard_for(&key).map.write();
        map.insert(
            key,
            Entry {
                value: Value::Str(value),
                expires_at,
            },
        );
    }

    /// Returns the string value iff the entry exists, is a string, and is
    /// not expired. An observed-expired entry is removed via lock upgrade
    /// with a double-check; losing that race to a concurrent remover is
    /// not an error.
    pub fn get_string(&self, key: &[u8]) -> GridResult<Option<Bytes>> {
        let now = now_ms();
        let shard = self.shard_for(key);
        {
            let map = shard.map.read();
            match map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return match &entry.value {
                        Value::Str(data) => Ok(Some(data.clone())),
                        _ => Err(GridError::WrongType),
                    };
                }
                Some(_) => {}
            }
        }

        let mut map = shard.map.write();
        if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            map.remove(key);
        }
        Ok(None)
    }

    /// Adds `delta` to the integer stored at `key`, creating it at zero.
    /// The read-modify-write holds the shard lock, so concurrent
    /// increments serialize per key. TTL is preserved.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> GridResult<i64> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();

        let (current, expires_at) = match map.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Str(raw) => (parse_i64(raw)?, entry.expires_at),
                _ => return Err(GridError::WrongType),
            },
            _ => (0, 0),
        };

        let next = current.checked_add(delta).ok_or(GridError::NotInteger)?;
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::Str(Bytes::from(next.to_string())),
                expires_at,
            },
        );
        Ok(next)
    }

    /// Removes a key. Returns true iff the entry was present in the map,
    /// regardless of expiration (the adopted simpler semantics).
    pub fn remove(&self, key: &[u8]) -> bool {
        self.shard_for(key).map.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.live_value(key).is_some()
    }

    /// TTL state with millisecond resolution.
    pub fn ttl_state(&self, key: &[u8]) -> Ttl {
        let now = now_ms();
        let map = self.shard_for(key).map.read();
        match map.get(key) {
            None => Ttl::Missing,
            Some(entry) if entry.is_expired(now) => Ttl::Missing,
            Some(entry) if entry.expires_at == 0 => Ttl::NoExpiry,
            Some(entry) => Ttl::Remaining(entry.expires_at - now),
        }
    }

    /// Sets an absolute expiration on a live key. Returns false for
    /// missing or already-expired keys.
    pub fn expire_at(&self, key: &[u8], at_ms: u64) -> bool {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        match map.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = at_ms;
                true
            }
            _ => false,
        }
    }

    /// Snapshot of non-expired keys across all shards. Per-shard read
    /// locks are taken in turn; there is no atomicity across shards.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let now = now_ms();
        let mut all = Vec::new();
        for shard in &self.shards {
            let map = shard.map.read();
            all.extend(
                map.iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone()),
            );
        }
        all
    }

    /// Count of live keys.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .map
                    .read()
                    .values()
                    .filter(|entry| !entry.is_expired(now))
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
        }
    }

    /// Type tag for a key; absent keys report `Str`.
    pub fn data_type(&self, key: &[u8]) -> DataType {
        self.live_value(key)
            .map(|value| value.data_type())
            .unwrap_or(DataType::Str)
    }

    /// Approximate payload bytes across all live entries, for INFO and
    /// admission checks.
    pub fn approx_memory(&self) -> usize {
        let now = now_ms();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .map
                    .read()
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, entry)| key.len() + entry.value.size_hint())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Live `(key, value, expires_at)` triples, taken shard by shard under
    /// read locks. Containers are shared by `Arc`, so the snapshot is
    /// cheap and observes concurrent container mutations.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Value, u64)> {
        let now = now_ms();
        let mut all = Vec::new();
        for shard in &self.shards {
            let map = shard.map.read();
            all.extend(
                map.iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.expires_at)),
            );
        }
        all
    }

    /// Directly installs an entry, replacing any existing one. Used by the
    /// snapshot loader.
    pub fn install(&self, key: Vec<u8>, value: Value, expires_at: u64) {
        let mut map = self.shard_for(&key).map.write();
        map.insert(key, Entry { value, expires_at });
    }

    /// Removes expired entries, examining at most `max_per_shard` entries
    /// in each shard. Returns the number removed. Bounded work; the lazy
    /// checks at access time handle the rest.
    pub fn sweep_expired(&self, now: u64, max_per_shard: usize) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.map.write();
            let expired: Vec<Vec<u8>> = map
                .iter()
                .take(max_per_shard)
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                map.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Starts a background thread that periodically sweeps expired
    /// entries. The returned handle must be stopped to join the thread.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let keyspace = Arc::clone(self);

        let join = std::thread::spawn(move || {
            // Nap in short slices so shutdown is not gated on the sweep
            // interval.
            let nap = Duration::from_millis(100).min(interval);
            let mut waited = Duration::ZERO;
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(nap);
                waited += nap;
                if waited >= interval {
                    waited = Duration::ZERO;
                    keyspace.sweep_expired(now_ms(), SWEEP_SAMPLE);
                }
            }
        });

        SweeperHandle {
            stop,
            join: Some(join),
        }
    }

    /// Returns the list at `key`, installing an empty one when the key is
    /// absent or expired. A live key of a different type is a type error.
    pub fn get_or_create_list(&self, key: &[u8]) -> GridResult<Arc<ListValue>> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            } else {
                return match &entry.value {
                    Value::List(list) => Ok(Arc::clone(list)),
                    _ => Err(GridError::WrongType),
                };
            }
        }
        let list = Arc::new(ListValue::new());
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::List(Arc::clone(&list)),
                expires_at: 0,
            },
        );
        Ok(list)
    }

    pub fn get_or_create_set(&self, key: &[u8]) -> GridResult<Arc<SetValue>> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            } else {
                return match &entry.value {
                    Value::Set(set) => Ok(Arc::clone(set)),
                    _ => Err(GridError::WrongType),
                };
            }
        }
        let set = Arc::new(SetValue::new());
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::Set(Arc::clone(&set)),
                expires_at: 0,
            },
        );
        Ok(set)
    }

    pub fn get_or_create_hash(&self, key: &[u8]) -> GridResult<Arc<HashValue>> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            } else {
                return match &entry.value {
                    Value::Hash(hash) => Ok(Arc::clone(hash)),
                    _ => Err(GridError::WrongType),
                };
            }
        }
        let hash = Arc::new(HashValue::new());
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::Hash(Arc::clone(&hash)),
                expires_at: 0,
            },
        );
        Ok(hash)
    }

    pub fn get_or_create_zset(&self, key: &[u8]) -> GridResult<Arc<ZSetValue>> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            } else {
                return match &entry.value {
                    Value::ZSet(zset) => Ok(Arc::clone(zset)),
                    _ => Err(GridError::WrongType),
                };
            }
        }
        let zset = Arc::new(ZSetValue::new());
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::ZSet(Arc::clone(&zset)),
                expires_at: 0,
            },
        );
        Ok(zset)
    }

    pub fn get_or_create_stream(&self, key: &[u8]) -> GridResult<Arc<StreamValue>> {
        let now = now_ms();
        let mut map = self.shard_for(key).map.write();
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            } else {
                return match &entry.value {
                    Value::Stream(stream) => Ok(Arc::clone(stream)),
                    _ => Err(GridError::WrongType),
                };
            }
        }
        let stream = Arc::new(StreamValue::new());
        map.insert(
            key.to_vec(),
            Entry {
                value: Value::Stream(Arc::clone(&stream)),
                expires_at: 0,
            },
        );
        Ok(stream)
    }

    /// Read-only list accessor: absent keys are `None`, live keys of a
    /// different type are a type error.
    pub fn get_list(&self, key: &[u8]) -> GridResult<Option<Arc<ListValue>>> {
        match self.live_value(key) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(GridError::WrongType),
            None => Ok(None),
        }
    }

    pub fn get_set(&self, key: &[u8]) -> GridResult<Option<Arc<SetValue>>> {
        match self.live_value(key) {
            Some(Value::Set(set)) => Ok(Some(set)),
            Some(_) => Err(GridError::WrongType),
            None => Ok(None),
        }
    }

    pub fn get_hash(&self, key: &[u8]) -> GridResult<Option<Arc<HashValue>>> {
        match self.live_value(key) {
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(GridError::WrongType),
            None => Ok(None),
        }
    }

    pub fn get_zset(&self, key: &[u8]) -> GridResult<Option<Arc<ZSetValue>>> {
        match self.live_value(key) {
            Some(Value::ZSet(zset)) => Ok(Some(zset)),
            Some(_) => Err(GridError::WrongType),
            None => Ok(None),
        }
    }

    pub fn get_stream(&self, key: &[u8]) -> GridResult<Option<Arc<StreamValue>>> {
        match self.live_value(key) {
            Some(Value::Stream(stream)) => Ok(Some(stream)),
            Some(_) => Err(GridError::WrongType),
            None => Ok(None),
        }
    }
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired_at() -> u64 {
        // One millisecond in the past; `now > expires_at` holds.
        now_ms() - 2
    }

    #[test]
    fn set_get_roundtrip() {
        let keyspace = Keyspace::with_shard_count(4);
        keyspace.set_string(b"alpha".to_vec(), Bytes::from_static(b"value"), 0);
        let value = keyspace.get_string(b"alpha").unwrap().unwrap();
        assert_eq!(&value[..], b"value");
    }

    #[test]
    fn set_replaces_any_type() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.get_or_create_list(b"k").unwrap().push_back(b"x".to_vec());
        keyspace.set_string(b"k".to_vec(), Bytes::from_static(b"v"), 0);
        assert_eq!(keyspace.data_type(b"k"), DataType::Str);
    }

    #[test]
    fn get_on_wrong_type_errors() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.get_or_create_set(b"s").unwrap().add(b"m".to_vec());
        assert!(matches!(keyspace.get_string(b"s"), Err(GridError::WrongType)));
    }

    #[test]
    fn expired_key_is_logically_absent() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.set_string(b"k".to_vec(), Bytes::from_static(b"v"), expired_at());
        assert!(keyspace.get_string(b"k").unwrap().is_none());
        assert!(!keyspace.exists(b"k"));
        assert_eq!(keyspace.ttl_state(b"k"), Ttl::Missing);
    }

    #[test]
    fn remove_reports_map_presence_even_when_expired() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.set_string(b"k".to_vec(), Bytes::from_static(b"v"), expired_at());
        // get_string opportunistically removes; avoid touching it first.
        assert!(keyspace.remove(b"k"));
        assert!(!keyspace.remove(b"k"));
    }

    #[test]
    fn ttl_reports_remaining_time() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.set_string(b"k".to_vec(), Bytes::from_static(b"v"), 0);
        assert_eq!(keyspace.ttl_state(b"k"), Ttl::NoExpiry);

        assert!(keyspace.expire_at(b"k", now_ms() + 10_000));
        match keyspace.ttl_state(b"k") {
            Ttl::Remaining(ms) => assert!(ms > 5_000 && ms <= 10_000),
            other => panic!("unexpected ttl state: {other:?}"),
        }
    }

    #[test]
    fn expire_on_missing_key_is_false() {
        let keyspace = Keyspace::with_shard_count(2);
        assert!(!keyspace.expire_at(b"missing", now_ms() + 1_000));
    }

    #[test]
    fn incr_by_is_typed_and_preserves_ttl() {
        let keyspace = Keyspace::with_shard_count(2);
        assert_eq!(keyspace.incr_by(b"n", 1).unwrap(), 1);
        assert_eq!(keyspace.incr_by(b"n", 41).unwrap(), 42);

        let deadline = now_ms() + 60_000;
        keyspace.expire_at(b"n", deadline);
        keyspace.incr_by(b"n", 1).unwrap();
        assert!(matches!(keyspace.ttl_state(b"n"), Ttl::Remaining(_)));

        keyspace.get_or_create_hash(b"h").unwrap();
        assert!(matches!(keyspace.incr_by(b"h", 1), Err(GridError::WrongType)));
    }

    #[test]
    fn keys_skips_expired_entries() {
        let keyspace = Keyspace::with_shard_count(4);
        keyspace.set_string(b"live".to_vec(), Bytes::from_static(b"v"), 0);
        keyspace.set_string(b"dead".to_vec(), Bytes::from_static(b"v"), expired_at());

        let keys = keyspace.keys();
        assert_eq!(keys, vec![b"live".to_vec()]);
        assert_eq!(keyspace.len(), 1);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.set_string(b"dead".to_vec(), Bytes::from_static(b"v"), expired_at());
        keyspace.set_string(b"live".to_vec(), Bytes::from_static(b"v"), 0);

        let removed = keyspace.sweep_expired(now_ms(), SWEEP_SAMPLE);
        assert_eq!(removed, 1);
        assert!(keyspace.exists(b"live"));
    }

    #[test]
    fn sweeper_thread_clears_expired() {
        let keyspace = Arc::new(Keyspace::with_shard_count(2));
        keyspace.set_string(b"dead".to_vec(), Bytes::from_static(b"v"), expired_at());

        let handle = keyspace.start_sweeper(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();

        assert!(!keyspace.remove(b"dead"));
    }

    #[test]
    fn get_or_create_rejects_wrong_type() {
        let keyspace = Keyspace::with_shard_count(2);
        keyspace.set_string(b"k".to_vec(), Bytes::from_static(b"v"), 0);
        assert!(matches!(
            keyspace.get_or_create_list(b"k"),
            Err(GridError::WrongType)
        ));

        // An expired entry of another type is replaced, not an error.
        keyspace.set_string(b"e".to_vec(), Bytes::from_static(b"v"), expired_at());
        assert!(keyspace.get_or_create_list(b"e").is_ok());
    }

    #[test]
    fn get_or_create_returns_same_container() {
        let keyspace = Keyspace::with_shard_count(2);
        let first = keyspace.get_or_create_list(b"l").unwrap();
        first.push_back(b"x".to_vec());
        let second = keyspace.get_or_create_list(b"l").unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn snapshot_and_install_roundtrip() {
        let keyspace = Keyspace::with_shard_count(4);
        keyspace.set_string(b"s".to_vec(), Bytes::from_static(b"v"), 0);
        keyspace.get_or_create_list(b"l").unwrap().push_back(b"a".to_vec());

        let snapshot = keyspace.snapshot();
        assert_eq!(snapshot.len(), 2);

        let restored = Keyspace::with_shard_count(4);
        for (key, value, expires_at) in snapshot {
            restored.install(key, value, expires_at);
        }
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.data_type(b"l"), DataType::List);
    }
}
