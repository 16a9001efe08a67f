//! Stream commands over the append-only entry log.

use gridhouse_common::now_ms;
use gridhouse_engine::{StreamEntry, StreamId};

use crate::commands::{arg_eq, parse_int};
use crate::resp::Reply;
use crate::server::Shared;

/// XADD key id field value [field value ...] — `*` asks for an
/// auto-generated id; explicit ids must strictly exceed the last entry.
pub fn xadd(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if args[2..].len() % 2 != 0 {
        return Reply::error("ERR wrong number of arguments for 'xadd'");
    }
    let fields: Vec<(Vec<u8>, Vec<u8>)> = args[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let stream = match shared.keyspace.get_or_create_stream(&args[0]) {
        Ok(stream) => stream,
        Err(err) => return Reply::from_err(err),
    };

    let id = if args[1] == b"*" {
        Ok(stream.add_auto(fields, now_ms()))
    } else {
        StreamId::parse(&args[1], 0).and_then(|id| stream.add(id, fields))
    };

    match id {
        Ok(id) => Reply::bulk(id.to_string().into_bytes()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn xlen(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_stream(&args[0]) {
        Ok(Some(stream)) => Reply::Integer(stream.len() as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

/// XRANGE key start end [COUNT n] — `-` and `+` select the extremes; a
/// bare millisecond bound covers its whole sequence range.
pub fn xrange(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let start = match parse_bound(&args[1], true) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let end = match parse_bound(&args[2], false) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let count = match args.get(3) {
        Some(flag) if arg_eq(flag, "COUNT") => match args.get(4).map(|raw| parse_int(raw)) {
            Some(Ok(count)) if count >= 0 => Some(count as usize),
            Some(Ok(_)) | None => return Reply::error("ERR syntax error"),
            Some(Err(reply)) => return reply,
        },
        Some(_) => return Reply::error("ERR syntax error"),
        None => None,
    };

    match shared.keyspace.get_stream(&args[0]) {
        Ok(Some(stream)) => {
            let entries = stream.range(start, end, count);
            Reply::Array(entries.into_iter().map(encode_entry).collect())
        }
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn xdel(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let mut ids = Vec::with_capacity(args.len() - 1);
    for raw in &args[1..] {
        match StreamId::parse(raw, 0) {
            Ok(id) => ids.push(id),
            Err(err) => return Reply::from_err(err),
        }
    }
    match shared.keyspace.get_stream(&args[0]) {
        Ok(Some(stream)) => Reply::Integer(stream.delete(&ids) as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

/// XTRIM key MAXLEN [~] n
pub fn xtrim(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if !arg_eq(&args[1], "MAXLEN") {
        return Reply::error("ERR syntax error");
    }
    // The approximate marker is accepted and treated as exact.
    let raw_len = if args.len() == 4 {
        if args[2] != b"~" {
            return Reply::error("ERR syntax error");
        }
        &args[3]
    } else {
        &args[2]
    };
    let max_len = match parse_int(raw_len) {
        Ok(len) if len >= 0 => len as usize,
        Ok(_) => return Reply::error("ERR value is out of range, must be positive"),
        Err(reply) => return reply,
    };

    match shared.keyspace.get_stream(&args[0]) {
        Ok(Some(stream)) => Reply::Integer(stream.trim_max_len(max_len) as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

/// `[id, [field, value, ...]]` shape, as Redis encodes stream entries.
fn encode_entry(entry: StreamEntry) -> Reply {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in entry.fields {
        fields.push(Reply::bulk(field));
        fields.push(Reply::bulk(value));
    }
    Reply::Array(vec![
        Reply::bulk(entry.id.to_string().into_bytes()),
        Reply::Array(fields),
    ])
}

fn parse_bound(raw: &[u8], is_start: bool) -> Result<StreamId, Reply> {
    match raw {
        b"-" => Ok(StreamId::MIN),
        b"+" => Ok(StreamId::MAX),
        _ => {
            let default_seq = if is_start { 0 } else { u64::MAX };
            StreamId::parse(raw, default_seq).map_err(Reply::from_err)
        }
    }
}
