//! Persistence across restarts: append-only recovery, snapshot
//! save/load, and FLUSHDB's effect on both.

mod common;

use gridhouse_client::RespValue;
use gridhouse_server::SyncPolicy;

use common::{config_for, connect, spawn_server};

fn bulk(data: &[u8]) -> RespValue {
    RespValue::Bulk(Some(data.to_vec()))
}

#[test]
fn aof_recovery_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.aof = true;
    config.aof_sync = SyncPolicy::Always;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);
    client.set(b"k1", b"v1").unwrap();
    client
        .command(&[b"RPUSH", b"L", b"a", b"b", b"c"])
        .unwrap();
    client.command(&[b"HSET", b"h", b"f", b"7"]).unwrap();
    drop(client);
    server.stop();

    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(client.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(
        client.command(&[b"LRANGE", b"L", b"0", b"-1"]).unwrap(),
        RespValue::Array(Some(vec![bulk(b"a"), bulk(b"b"), bulk(b"c")]))
    );
    assert_eq!(client.command(&[b"HGET", b"h", b"f"]).unwrap(), bulk(b"7"));

    server.stop();
}

#[test]
fn spop_recovery_preserves_the_popped_member() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.aof = true;
    config.aof_sync = SyncPolicy::Always;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);
    client
        .command(&[b"SADD", b"s", b"a", b"b", b"c"])
        .unwrap();
    let RespValue::Bulk(Some(popped)) = client.command(&[b"SPOP", b"s"]).unwrap() else {
        panic!("expected a popped member");
    };
    let remaining = members_sorted(&mut client, b"s");
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&popped));
    drop(client);
    server.stop();

    // SPOP is logged as the removal that actually happened, so replay
    // lands on exactly the same membership.
    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(members_sorted(&mut client, b"s"), remaining);

    server.stop();
}

fn members_sorted(client: &mut gridhouse_client::Client, key: &[u8]) -> Vec<Vec<u8>> {
    let RespValue::Array(Some(items)) = client.command(&[b"SMEMBERS", key]).unwrap() else {
        panic!("expected members array");
    };
    let mut members: Vec<Vec<u8>> = items
        .into_iter()
        .map(|item| match item {
            RespValue::Bulk(Some(member)) => member,
            other => panic!("unexpected member reply {other:?}"),
        })
        .collect();
    members.sort();
    members
}

#[test]
fn flushdb_mid_pipeline_does_not_resurrect_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.aof = true;
    config.aof_sync = SyncPolicy::Always;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);

    // One pipelined batch: a write, a FLUSHDB, another write.
    let mut batch = Vec::new();
    gridhouse_client::encode_command(&[b"SET", b"a", b"1"], &mut batch);
    gridhouse_client::encode_command(&[b"FLUSHDB"], &mut batch);
    gridhouse_client::encode_command(&[b"SET", b"b", b"2"], &mut batch);
    client.send_raw(&batch).unwrap();
    for _ in 0..3 {
        assert_eq!(
            client.read_reply().unwrap(),
            RespValue::Simple(b"OK".to_vec())
        );
    }
    drop(client);
    server.stop();

    // The pre-flush write must not come back on replay.
    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(client.get(b"a").unwrap(), None);
    assert_eq!(client.get(b"b").unwrap(), Some(b"2".to_vec()));

    server.stop();
}

#[test]
fn snapshot_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.rdb = true;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);
    client.set(b"k", b"v").unwrap();
    client
        .command(&[b"ZADD", b"z", b"1.5", b"m"])
        .unwrap();
    assert_eq!(
        client.command(&[b"SAVE"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );
    assert!(dir.path().join("dump.rdb").exists());
    drop(client);
    server.stop();

    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(client.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(
        client.command(&[b"ZSCORE", b"z", b"m"]).unwrap(),
        bulk(b"1.5")
    );

    server.stop();
}

#[test]
fn bgsave_returns_immediately_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.rdb = true;

    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    client.set(b"k", b"v").unwrap();
    assert_eq!(
        client.command(&[b"BGSAVE"]).unwrap(),
        RespValue::Simple(b"Background saving started".to_vec())
    );
    assert!(common::wait_until(std::time::Duration::from_secs(5), || {
        dir.path().join("dump.rdb").exists()
    }));

    server.stop();
}

#[test]
fn flushdb_clears_keyspace_and_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.aof = true;
    config.aof_sync = SyncPolicy::Always;
    config.rdb = true;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);
    client.set(b"k", b"v").unwrap();
    client.command(&[b"SAVE"]).unwrap();

    assert_eq!(
        client.command(&[b"FLUSHDB"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );
    assert_eq!(
        client.command(&[b"DBSIZE"]).unwrap(),
        RespValue::Integer(0)
    );
    assert!(!dir.path().join("dump.rdb").exists());
    drop(client);
    server.stop();

    // Restart: nothing comes back.
    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(client.get(b"k").unwrap(), None);
    assert_eq!(
        client.command(&[b"DBSIZE"]).unwrap(),
        RespValue::Integer(0)
    );

    server.stop();
}

#[test]
fn expirations_survive_snapshot_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.rdb = true;

    let (addr, server) = spawn_server(config.clone());
    let mut client = connect(addr);
    client
        .command(&[b"SET", b"short", b"v", b"EX", b"1"])
        .unwrap();
    client
        .command(&[b"SET", b"long", b"v", b"EX", b"600"])
        .unwrap();
    client.command(&[b"SAVE"]).unwrap();
    drop(client);
    server.stop();

    // Let the short TTL lapse while the server is down.
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let (addr, server) = spawn_server(config);
    let mut client = connect(addr);
    assert_eq!(client.get(b"short").unwrap(), None);
    assert_eq!(client.get(b"long").unwrap(), Some(b"v".to_vec()));

    server.stop();
}
