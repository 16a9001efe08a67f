//! String commands: SET/GET, the INCR/DECR counters, and the multi-key
//! MSET/MGET forms.

use bytes::Bytes;

use gridhouse_common::now_ms;

use crate::commands::{arg_eq, parse_int};
use crate::resp::Reply;
use crate::server::Shared;

/// SET key value [EX seconds | PX milliseconds]
pub fn set(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let expires_at = match args.len() {
        2 => 0,
        4 => {
            let amount = match parse_int(&args[3]) {
                Ok(amount) if amount > 0 => amount as u64,
                Ok(_) => return Reply::error("ERR invalid expire time in 'set' command"),
                Err(reply) => return reply,
            };
            if arg_eq(&args[2], "EX") {
                now_ms() + amount * 1000
            } else if arg_eq(&args[2], "PX") {
                now_ms() + amount
            } else {
                return Reply::error("ERR syntax error");
            }
        }
        _ => return Reply::error("ERR syntax error"),
    };

    shared
        .keyspace
        .set_string(args[0].clone(), Bytes::from(args[1].clone()), expires_at);
    Reply::ok()
}

pub fn get(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_string(&args[0]) {
        Ok(Some(value)) => {
            shared.stats.keyspace_hit();
            Reply::Bulk(value)
        }
        Ok(None) => {
            shared.stats.keyspace_miss();
            Reply::Nil
        }
        Err(err) => Reply::from_err(err),
    }
}

pub fn incr(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.incr_by(&args[0], 1) {
        Ok(value) => Reply::Integer(value),
        Err(err) => Reply::from_err(err),
    }
}

pub fn decr(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.incr_by(&args[0], -1) {
        Ok(value) => Reply::Integer(value),
        Err(err) => Reply::from_err(err),
    }
}

/// MSET key value [key value ...]
pub fn mset(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if args.len() % 2 != 0 {
        return Reply::error("ERR wrong number of arguments for 'mset'");
    }
    for pair in args.chunks_exact(2) {
        shared
            .keyspace
            .set_string(pair[0].clone(), Bytes::from(pair[1].clone()), 0);
    }
    Reply::ok()
}

/// MGET key [key ...] — wrong-type keys read as nil, like missing ones.
pub fn mget(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let values = args
        .iter()
        .map(|key| match shared.keyspace.get_string(key) {
            Ok(Some(value)) => {
                shared.stats.keyspace_hit();
                Reply::Bulk(value)
            }
            _ => {
                shared.stats.keyspace_miss();
                Reply::Nil
            }
        })
        .collect();
    Reply::Array(values)
}
