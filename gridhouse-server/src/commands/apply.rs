//! # Command Application
//!
//! Purpose: Apply the mutating command subset directly to a keyspace with
//! no reply, stats, or propagation machinery. This is the shared engine
//! behind AOF replay and the replica apply loop.
//!
//! Malformed or unknown commands are skipped (the log may predate the
//! current build); `apply` reports whether the command was applied.

use bytes::Bytes;

use gridhouse_common::now_ms;
use gridhouse_engine::{Keyspace, StreamId};

fn int_arg(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn float_arg(raw: &[u8]) -> Option<f64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Applies one mutating command in-place. Returns false when the command
/// is unknown, malformed, or fails type checks.
pub fn apply(keyspace: &Keyspace, name: &str, args: &[Vec<u8>]) -> bool {
    let name = name.to_ascii_lowercase();
    if args.is_empty() && name != "flushdb" {
        return false;
    }
    match name.as_str() {
        "set" => {
            if args.len() < 2 {
                return false;
            }
            let expires_at = if args.len() == 4 {
                let Some(amount) = int_arg(&args[3]).filter(|&a| a > 0) else {
                    return false;
                };
                if args[2].eq_ignore_ascii_case(b"EX") {
                    now_ms() + amount as u64 * 1000
                } else if args[2].eq_ignore_ascii_case(b"PX") {
                    now_ms() + amount as u64
                } else {
                    return false;
                }
            } else {
                0
            };
            keyspace.set_string(args[0].clone(), Bytes::from(args[1].clone()), expires_at);
            true
        }
        "del" => {
            for key in args {
                keyspace.remove(key);
            }
            true
        }
        "expire" | "pexpire" => {
            if args.len() != 2 {
                return false;
            }
            let Some(amount) = int_arg(&args[1]) else {
                return false;
            };
            let delta_ms = if name == "expire" {
                amount.saturating_mul(1000)
            } else {
                amount
            };
            if delta_ms <= 0 {
                keyspace.remove(&args[0]);
            } else {
                keyspace.expire_at(&args[0], now_ms() + delta_ms as u64);
            }
            true
        }
        "incr" => !args.is_empty() && keyspace.incr_by(&args[0], 1).is_ok(),
        "decr" => !args.is_empty() && keyspace.incr_by(&args[0], -1).is_ok(),
        "mset" => {
            if args.is_empty() || args.len() % 2 != 0 {
                return false;
            }
            for pair in args.chunks_exact(2) {
                keyspace.set_string(pair[0].clone(), Bytes::from(pair[1].clone()), 0);
            }
            true
        }
        "flushdb" => {
            keyspace.clear();
            true
        }
        "lpush" | "rpush" => {
            if args.len() < 2 {
                return false;
            }
            let Ok(list) = keyspace.get_or_create_list(&args[0]) else {
                return false;
            };
            for value in &args[1..] {
                if name == "lpush" {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            true
        }
        "lpop" | "rpop" => {
            let Ok(Some(list)) = keyspace.get_list(&args[0]) else {
                return false;
            };
            if name == "lpop" {
                list.pop_front();
            } else {
                list.pop_back();
            }
            if list.is_empty() {
                keyspace.remove(&args[0]);
            }
            true
        }
        "lrem" => {
            if args.len() != 3 {
                return false;
            }
            let Some(count) = int_arg(&args[1]) else {
                return false;
            };
            if let Ok(Some(list)) = keyspace.get_list(&args[0]) {
                list.remove(count, &args[2]);
                if list.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "ltrim" => {
            if args.len() != 3 {
                return false;
            }
            let (Some(start), Some(stop)) = (int_arg(&args[1]), int_arg(&args[2])) else {
                return false;
            };
            if let Ok(Some(list)) = keyspace.get_list(&args[0]) {
                list.trim(start, stop);
                if list.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "sadd" => {
            if args.len() < 2 {
                return false;
            }
            let Ok(set) = keyspace.get_or_create_set(&args[0]) else {
                return false;
            };
            for member in &args[1..] {
                set.add(member.clone());
            }
            true
        }
        "srem" => {
            if let Ok(Some(set)) = keyspace.get_set(&args[0]) {
                for member in &args[1..] {
                    set.remove(member);
                }
                if set.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "spop" => {
            if let Ok(Some(set)) = keyspace.get_set(&args[0]) {
                set.pop();
                if set.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "hset" => {
            if args.len() < 3 || args[1..].len() % 2 != 0 {
                return false;
            }
            let Ok(hash) = keyspace.get_or_create_hash(&args[0]) else {
                return false;
            };
            for pair in args[1..].chunks_exact(2) {
                hash.set(pair[0].clone(), pair[1].clone());
            }
            true
        }
        "hdel" => {
            if let Ok(Some(hash)) = keyspace.get_hash(&args[0]) {
                for field in &args[1..] {
                    hash.remove(field);
                }
                if hash.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "hincrby" => {
            if args.len() != 3 {
                return false;
            }
            let Some(delta) = int_arg(&args[2]) else {
                return false;
            };
            keyspace
                .get_or_create_hash(&args[0])
                .map(|hash| hash.incr_by(&args[1], delta).is_ok())
                .unwrap_or(false)
        }
        "hincrbyfloat" => {
            if args.len() != 3 {
                return false;
            }
            let Some(delta) = float_arg(&args[2]) else {
                return false;
            };
            keyspace
                .get_or_create_hash(&args[0])
                .map(|hash| hash.incr_by_float(&args[1], delta).is_ok())
                .unwrap_or(false)
        }
        "zadd" => {
            if args.len() < 3 || args[1..].len() % 2 != 0 {
                return false;
            }
            let Ok(zset) = keyspace.get_or_create_zset(&args[0]) else {
                return false;
            };
            for pair in args[1..].chunks_exact(2) {
                let Some(score) = float_arg(&pair[0]) else {
                    return false;
                };
                zset.add(pair[1].clone(), score);
            }
            true
        }
        "zrem" => {
            if let Ok(Some(zset)) = keyspace.get_zset(&args[0]) {
                for member in &args[1..] {
                    zset.remove(member);
                }
                if zset.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "zpopmin" => {
            let count = args
                .get(1)
                .and_then(|raw| int_arg(raw))
                .unwrap_or(1)
                .max(0) as usize;
            if let Ok(Some(zset)) = keyspace.get_zset(&args[0]) {
                for _ in 0..count {
                    if zset.pop_min().is_none() {
                        break;
                    }
                }
                if zset.is_empty() {
                    keyspace.remove(&args[0]);
                }
            }
            true
        }
        "xadd" => {
            if args.len() < 4 || args[2..].len() % 2 != 0 {
                return false;
            }
            let Ok(stream) = keyspace.get_or_create_stream(&args[0]) else {
                return false;
            };
            let fields: Vec<(Vec<u8>, Vec<u8>)> = args[2..]
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            if args[1] == b"*" {
                stream.add_auto(fields, now_ms());
                true
            } else {
                StreamId::parse(&args[1], 0)
                    .and_then(|id| stream.add(id, fields))
                    .is_ok()
            }
        }
        "xdel" => {
            if args.len() < 2 {
                return false;
            }
            let ids: Vec<StreamId> = args[1..]
                .iter()
                .filter_map(|raw| StreamId::parse(raw, 0).ok())
                .collect();
            if let Ok(Some(stream)) = keyspace.get_stream(&args[0]) {
                stream.delete(&ids);
            }
            true
        }
        "xtrim" => {
            if args.len() < 3 || !args[1].eq_ignore_ascii_case(b"MAXLEN") {
                return false;
            }
            let raw_len = if args.len() == 4 { &args[3] } else { &args[2] };
            let Some(max_len) = int_arg(raw_len).filter(|&len| len >= 0) else {
                return false;
            };
            if let Ok(Some(stream)) = keyspace.get_stream(&args[0]) {
                stream.trim_max_len(max_len as usize);
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridhouse_engine::DataType;

    fn args(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.to_vec()).collect()
    }

    #[test]
    fn applies_string_and_list_writes() {
        let keyspace = Keyspace::with_shard_count(4);
        assert!(apply(&keyspace, "SET", &args(&[b"k", b"v"])));
        assert!(apply(&keyspace, "RPUSH", &args(&[b"l", b"a", b"b"])));
        assert!(apply(&keyspace, "INCR", &args(&[b"n"])));

        assert_eq!(
            keyspace.get_string(b"k").unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        assert_eq!(keyspace.get_list(b"l").unwrap().unwrap().len(), 2);
        assert_eq!(keyspace.get_string(b"n").unwrap(), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn applies_expirations() {
        let keyspace = Keyspace::with_shard_count(2);
        apply(&keyspace, "set", &args(&[b"k", b"v"]));
        assert!(apply(&keyspace, "expire", &args(&[b"k", b"100"])));
        assert!(matches!(
            keyspace.ttl_state(b"k"),
            gridhouse_engine::Ttl::Remaining(_)
        ));

        // Non-positive TTL deletes.
        apply(&keyspace, "expire", &args(&[b"k", b"0"]));
        assert!(!keyspace.exists(b"k"));
    }

    #[test]
    fn pop_removes_emptied_containers() {
        let keyspace = Keyspace::with_shard_count(2);
        apply(&keyspace, "rpush", &args(&[b"l", b"only"]));
        apply(&keyspace, "lpop", &args(&[b"l"]));
        assert!(!keyspace.exists(b"l"));
    }

    #[test]
    fn applies_hash_zset_and_stream_writes() {
        let keyspace = Keyspace::with_shard_count(4);
        assert!(apply(&keyspace, "hset", &args(&[b"h", b"f", b"1"])));
        assert!(apply(&keyspace, "zadd", &args(&[b"z", b"1.5", b"m"])));
        assert!(apply(&keyspace, "xadd", &args(&[b"s", b"5-1", b"k", b"v"])));

        assert_eq!(keyspace.data_type(b"h"), DataType::Hash);
        assert_eq!(keyspace.get_zset(b"z").unwrap().unwrap().score(b"m"), Some(1.5));
        assert_eq!(keyspace.get_stream(b"s").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn unknown_commands_are_skipped() {
        let keyspace = Keyspace::with_shard_count(2);
        assert!(!apply(&keyspace, "bogus", &args(&[b"x"])));
        assert!(!apply(&keyspace, "get", &args(&[b"x"])));
    }
}
