//! End-to-end coverage of the request pipeline: commands, TTLs,
//! transactions, pipelining, authentication, and INFO.

mod common;

use std::time::Duration;

use gridhouse_client::{ClientTtl, RespValue};

use common::{config_for, connect, spawn_server};

fn bulk(data: &[u8]) -> RespValue {
    RespValue::Bulk(Some(data.to_vec()))
}

#[test]
fn set_get_ttl_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    // SET k v EX 1 / GET before and after the deadline.
    let reply = client
        .command(&[b"SET", b"k", b"v", b"EX", b"1"])
        .unwrap();
    assert_eq!(reply, RespValue::Simple(b"OK".to_vec()));
    assert_eq!(client.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(matches!(client.ttl(b"k").unwrap(), ClientTtl::ExpiresIn(_)));

    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(client.get(b"k").unwrap(), None);
    assert_eq!(client.ttl(b"k").unwrap(), ClientTtl::Missing);

    server.stop();
}

#[test]
fn basic_string_and_key_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    assert_eq!(client.ping().unwrap(), b"PONG".to_vec());
    assert_eq!(
        client.command(&[b"ECHO", b"hello"]).unwrap(),
        bulk(b"hello")
    );

    client.set(b"a", b"1").unwrap();
    client.set(b"b", b"2").unwrap();
    assert_eq!(
        client.command(&[b"MGET", b"a", b"b", b"missing"]).unwrap(),
        RespValue::Array(Some(vec![bulk(b"1"), bulk(b"2"), RespValue::Bulk(None)]))
    );
    assert_eq!(
        client.command(&[b"INCR", b"a"]).unwrap(),
        RespValue::Integer(2)
    );
    assert_eq!(
        client.command(&[b"DECR", b"a"]).unwrap(),
        RespValue::Integer(1)
    );

    assert_eq!(
        client.command(&[b"EXISTS", b"a", b"missing"]).unwrap(),
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"DBSIZE"]).unwrap(),
        RespValue::Integer(2)
    );
    assert!(client.del(b"a").unwrap());
    assert!(!client.del(b"a").unwrap());

    // KEYS with a glob pattern.
    client.set(b"user:1", b"x").unwrap();
    client.set(b"user:2", b"y").unwrap();
    let RespValue::Array(Some(keys)) = client.command(&[b"KEYS", b"user:*"]).unwrap() else {
        panic!("expected array");
    };
    assert_eq!(keys.len(), 2);

    server.stop();
}

#[test]
fn multi_exec_packages_replies_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    assert_eq!(
        client.command(&[b"MULTI"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );
    assert_eq!(
        client.command(&[b"SET", b"a", b"1"]).unwrap(),
        RespValue::Simple(b"QUEUED".to_vec())
    );
    assert_eq!(
        client.command(&[b"INCR", b"a"]).unwrap(),
        RespValue::Simple(b"QUEUED".to_vec())
    );
    assert_eq!(
        client.command(&[b"GET", b"a"]).unwrap(),
        RespValue::Simple(b"QUEUED".to_vec())
    );

    assert_eq!(
        client.command(&[b"EXEC"]).unwrap(),
        RespValue::Array(Some(vec![
            RespValue::Simple(b"OK".to_vec()),
            RespValue::Integer(2),
            bulk(b"2"),
        ]))
    );

    server.stop();
}

#[test]
fn transaction_errors_and_discard() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    assert!(matches!(
        client.command(&[b"EXEC"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"ERR EXEC without MULTI")
    ));
    assert!(matches!(
        client.command(&[b"DISCARD"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"ERR DISCARD without MULTI")
    ));

    client.command(&[b"MULTI"]).unwrap();
    assert!(matches!(
        client.command(&[b"MULTI"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"ERR MULTI calls can not be nested")
    ));
    client.command(&[b"SET", b"x", b"1"]).unwrap();
    assert_eq!(
        client.command(&[b"DISCARD"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );
    assert_eq!(client.get(b"x").unwrap(), None);

    server.stop();
}

#[test]
fn pipeline_with_bad_command_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    // Inline pipeline: three requests, the middle one unknown.
    client.send_raw(b"PING\r\nBOGUS\r\nPING\r\n").unwrap();
    assert_eq!(client.read_reply().unwrap(), RespValue::Simple(b"PONG".to_vec()));
    assert!(matches!(
        client.read_reply().unwrap(),
        RespValue::Error(message) if message == b"ERR unknown command 'BOGUS'"
    ));
    assert_eq!(client.read_reply().unwrap(), RespValue::Simple(b"PONG".to_vec()));

    server.stop();
}

#[test]
fn pipelined_array_requests_get_every_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    let mut batch = Vec::new();
    gridhouse_client::encode_command(&[b"SET", b"p", b"1"], &mut batch);
    gridhouse_client::encode_command(&[b"INCR", b"p"], &mut batch);
    gridhouse_client::encode_command(&[b"GET", b"p"], &mut batch);
    client.send_raw(&batch).unwrap();

    assert_eq!(client.read_reply().unwrap(), RespValue::Simple(b"OK".to_vec()));
    assert_eq!(client.read_reply().unwrap(), RespValue::Integer(2));
    assert_eq!(client.read_reply().unwrap(), bulk(b"2"));

    server.stop();
}

#[test]
fn wrong_type_operations_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    client.command(&[b"RPUSH", b"l", b"a"]).unwrap();
    assert!(matches!(
        client.command(&[b"GET", b"l"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"WRONGTYPE")
    ));
    assert!(matches!(
        client.command(&[b"SADD", b"l", b"m"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"WRONGTYPE")
    ));

    // SET replaces regardless of the old type.
    client.set(b"l", b"now-a-string").unwrap();
    assert_eq!(client.get(b"l").unwrap(), Some(b"now-a-string".to_vec()));

    server.stop();
}

#[test]
fn container_command_families() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    // Lists.
    assert_eq!(
        client.command(&[b"RPUSH", b"l", b"a", b"b", b"c"]).unwrap(),
        RespValue::Integer(3)
    );
    assert_eq!(
        client.command(&[b"LRANGE", b"l", b"0", b"-1"]).unwrap(),
        RespValue::Array(Some(vec![bulk(b"a"), bulk(b"b"), bulk(b"c")]))
    );
    assert_eq!(client.command(&[b"LPOP", b"l"]).unwrap(), bulk(b"a"));
    assert_eq!(client.command(&[b"RPOP", b"l"]).unwrap(), bulk(b"c"));

    // Sets.
    client.command(&[b"SADD", b"s", b"x", b"y"]).unwrap();
    assert_eq!(
        client.command(&[b"SISMEMBER", b"s", b"x"]).unwrap(),
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"SREM", b"s", b"x"]).unwrap(),
        RespValue::Integer(1)
    );

    // Hashes.
    assert_eq!(
        client.command(&[b"HSET", b"h", b"f1", b"1", b"f2", b"2"]).unwrap(),
        RespValue::Integer(2)
    );
    assert_eq!(client.command(&[b"HGET", b"h", b"f1"]).unwrap(), bulk(b"1"));
    assert_eq!(
        client.command(&[b"HINCRBY", b"h", b"f1", b"41"]).unwrap(),
        RespValue::Integer(42)
    );
    assert_eq!(
        client.command(&[b"HINCRBYFLOAT", b"h", b"f2", b"0.5"]).unwrap(),
        bulk(b"2.5")
    );
    assert_eq!(client.command(&[b"HLEN", b"h"]).unwrap(), RespValue::Integer(2));

    // Sorted sets: score order with lexicographic tiebreak.
    client
        .command(&[b"ZADD", b"z", b"2", b"b", b"1", b"c", b"2", b"a"])
        .unwrap();
    assert_eq!(
        client.command(&[b"ZRANGE", b"z", b"0", b"-1"]).unwrap(),
        RespValue::Array(Some(vec![bulk(b"c"), bulk(b"a"), bulk(b"b")]))
    );
    assert_eq!(client.command(&[b"ZSCORE", b"z", b"c"]).unwrap(), bulk(b"1"));
    assert_eq!(
        client.command(&[b"ZPOPMIN", b"z"]).unwrap(),
        RespValue::Array(Some(vec![bulk(b"c"), bulk(b"1")]))
    );

    // Streams: explicit then auto ids, strictly increasing.
    assert_eq!(
        client.command(&[b"XADD", b"st", b"5-1", b"k", b"v"]).unwrap(),
        bulk(b"5-1")
    );
    assert!(matches!(
        client.command(&[b"XADD", b"st", b"5-1", b"k", b"v"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"ERR The ID specified in XADD")
    ));
    let RespValue::Bulk(Some(auto_id)) =
        client.command(&[b"XADD", b"st", b"*", b"k", b"w"]).unwrap()
    else {
        panic!("expected id");
    };
    assert!(auto_id.contains(&b'-'));
    assert_ne!(auto_id, b"5-1".to_vec());
    assert_eq!(client.command(&[b"XLEN", b"st"]).unwrap(), RespValue::Integer(2));

    server.stop();
}

#[test]
fn auth_gate_blocks_until_password() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.requirepass = Some("sekrit".to_string());
    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);

    assert!(matches!(
        client.command(&[b"GET", b"k"]).unwrap(),
        RespValue::Error(message) if message.starts_with(b"NOAUTH")
    ));
    assert!(matches!(
        client.command(&[b"AUTH", b"wrong"]).unwrap(),
        RespValue::Error(message) if message == b"ERR invalid password"
    ));
    assert_eq!(
        client.command(&[b"AUTH", b"sekrit"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );
    assert_eq!(client.get(b"k").unwrap(), None);

    server.stop();
}

#[test]
fn info_reports_required_fields() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    client.set(b"k", b"v").unwrap();
    client.get(b"k").unwrap();
    client.get(b"missing").unwrap();

    let info = String::from_utf8(client.info().unwrap()).unwrap();
    for field in [
        "redis_version:",
        "os:",
        "tcp_port:",
        "role:master",
        "connected_clients:",
        "used_memory:",
        "total_connections_received:",
        "total_commands_processed:",
        "keyspace_hits:1",
        "keyspace_misses:1",
        "aof_enabled:0",
        "aof_last_rewrite_time_sec:",
        "aof_current_size:",
        "rdb_changes_since_last_save:",
        "master_replid:",
        "master_repl_offset:",
    ] {
        assert!(info.contains(field), "INFO missing {field}:\n{info}");
    }

    server.stop();
}

#[test]
fn arity_and_unknown_command_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));
    let mut client = connect(addr);

    assert!(matches!(
        client.command(&[b"GET"]).unwrap(),
        RespValue::Error(message) if message == b"ERR wrong number of arguments for 'get'"
    ));
    assert!(matches!(
        client.command(&[b"NOPE", b"x"]).unwrap(),
        RespValue::Error(message) if message == b"ERR unknown command 'NOPE'"
    ));

    server.stop();
}
