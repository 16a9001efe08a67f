//! Sorted-set commands. Ordered views sort by (score asc, member
//! byte-lex asc); scores render with the shortest round-trip format.

use gridhouse_engine::format_float;

use crate::commands::{arg_eq, drop_if_empty, parse_float, parse_int};
use crate::resp::Reply;
use crate::server::Shared;

/// ZADD key score member [score member ...] — returns the count of newly
/// added members.
pub fn zadd(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if args[1..].len() % 2 != 0 {
        return Reply::error("ERR syntax error");
    }

    // Validate every score before mutating anything.
    let mut pairs = Vec::with_capacity(args[1..].len() / 2);
    for pair in args[1..].chunks_exact(2) {
        match parse_float(&pair[0]) {
            Ok(score) => pairs.push((pair[1].clone(), score)),
            Err(reply) => return reply,
        }
    }

    let zset = match shared.keyspace.get_or_create_zset(&args[0]) {
        Ok(zset) => zset,
        Err(err) => return Reply::from_err(err),
    };
    let added = pairs
        .into_iter()
        .filter(|(member, score)| zset.add(member.clone(), *score))
        .count();
    Reply::Integer(added as i64)
}

/// ZRANGE key start stop [WITHSCORES]
pub fn zrange(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(start), Ok(stop)) => (start, stop),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let with_scores = match args.get(3) {
        Some(flag) if arg_eq(flag, "WITHSCORES") => true,
        Some(_) => return Reply::error("ERR syntax error"),
        None => false,
    };

    match shared.keyspace.get_zset(&args[0]) {
        Ok(Some(zset)) => {
            let entries = zset.range(start, stop);
            let mut items = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
            for (member, score) in entries {
                items.push(Reply::bulk(member));
                if with_scores {
                    items.push(Reply::bulk(format_float(score).into_bytes()));
                }
            }
            Reply::Array(items)
        }
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn zrem(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_zset(&args[0]) {
        Ok(Some(zset)) => {
            let removed = args[1..]
                .iter()
                .filter(|member| zset.remove(member.as_slice()))
                .count();
            drop_if_empty(shared, &args[0], zset.is_empty());
            Reply::Integer(removed as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

pub fn zscore(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_zset(&args[0]) {
        Ok(Some(zset)) => zset
            .score(&args[1])
            .map(|score| Reply::bulk(format_float(score).into_bytes()))
            .unwrap_or(Reply::Nil),
        Ok(None) => Reply::Nil,
        Err(err) => Reply::from_err(err),
    }
}

pub fn zcard(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_zset(&args[0]) {
        Ok(Some(zset)) => Reply::Integer(zset.len() as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

/// ZPOPMIN key [count] — flat member/score array, lowest scores first.
pub fn zpopmin(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let count = match args.get(1) {
        Some(raw) => match parse_int(raw) {
            Ok(count) if count >= 0 => count as usize,
            Ok(_) => return Reply::error("ERR value is out of range, must be positive"),
            Err(reply) => return reply,
        },
        None => 1,
    };

    match shared.keyspace.get_zset(&args[0]) {
        Ok(Some(zset)) => {
            let mut items = Vec::new();
            for _ in 0..count {
                match zset.pop_min() {
                    Some((member, score)) => {
                        items.push(Reply::bulk(member));
                        items.push(Reply::bulk(format_float(score).into_bytes()));
                    }
                    None => break,
                }
            }
            drop_if_empty(shared, &args[0], zset.is_empty());
            Reply::Array(items)
        }
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}
