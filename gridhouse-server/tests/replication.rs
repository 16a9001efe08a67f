//! Master/replica behavior: the PSYNC wire handshake, full resync via
//! snapshot, and live write fan-out.

mod common;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use gridhouse_client::{encode_command, RespValue};

use common::{config_for, connect, spawn_server, wait_until};

fn send_command(stream: &mut TcpStream, parts: &[&[u8]]) {
    let mut out = Vec::new();
    encode_command(parts, &mut out);
    stream.write_all(&out).unwrap();
    stream.flush().unwrap();
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end_matches(['\r', '\n']).to_string()
}

#[test]
fn psync_handshake_streams_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = spawn_server(config_for(dir.path()));

    // Seed some state so the snapshot is non-trivial.
    let mut seed = connect(addr);
    seed.set(b"seeded", b"value").unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    send_command(&mut stream, &[b"PING"]);
    assert_eq!(read_line(&mut reader), "+PONG");
    send_command(&mut stream, &[b"REPLCONF", b"listening-port", b"1234"]);
    assert_eq!(read_line(&mut reader), "+OK");
    send_command(&mut stream, &[b"REPLCONF", b"capability", b"eof"]);
    assert_eq!(read_line(&mut reader), "+OK");
    send_command(&mut stream, &[b"PSYNC", b"?", b"-1"]);

    // +FULLRESYNC <40-hex run id> <offset>
    let resync = read_line(&mut reader);
    let words: Vec<&str> = resync.split_whitespace().collect();
    assert_eq!(words.len(), 3, "unexpected resync line {resync:?}");
    assert_eq!(words[0], "+FULLRESYNC");
    assert_eq!(words[1].len(), 40);
    assert!(words[1].chars().all(|c| c.is_ascii_hexdigit()));
    words[2].parse::<u64>().unwrap();

    // `$<len>` then exactly len payload bytes, no trailing CRLF.
    let header = read_line(&mut reader);
    let len: usize = header.strip_prefix('$').unwrap().parse().unwrap();
    assert!(len > 0);
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).unwrap();

    // Writes on the master are now forwarded verbatim to this replica.
    seed.set(b"after", b"1").unwrap();
    let mut forwarded = vec![0u8; 1];
    reader.read_exact(&mut forwarded).unwrap();
    assert_eq!(forwarded[0], b'*');

    server.stop();
}

#[test]
fn slave_full_resync_and_live_fanout() {
    let master_dir = tempfile::tempdir().unwrap();
    let (master_addr, master) = spawn_server(config_for(master_dir.path()));

    let mut master_client = connect(master_addr);
    master_client.set(b"seed", b"from-snapshot").unwrap();

    let slave_dir = tempfile::tempdir().unwrap();
    let mut slave_config = config_for(slave_dir.path());
    slave_config.slaveof = Some(format!("127.0.0.1:{}", master_addr.port()));
    let (slave_addr, slave) = spawn_server(slave_config);

    // Snapshot state arrives via full resync.
    let mut slave_client = connect(slave_addr);
    assert!(wait_until(Duration::from_secs(5), || {
        slave_client.get(b"seed").unwrap() == Some(b"from-snapshot".to_vec())
    }));

    // The slave reports its role.
    let info = String::from_utf8(slave_client.info().unwrap()).unwrap();
    assert!(info.contains("role:slave"), "INFO was:\n{info}");

    // Live writes fan out to the attached replica.
    master_client.set(b"live", b"write").unwrap();
    master_client.command(&[b"RPUSH", b"list", b"a", b"b"]).unwrap();
    master_client.command(&[b"DEL", b"seed"]).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        slave_client.get(b"live").unwrap() == Some(b"write".to_vec())
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        slave_client.get(b"seed").unwrap().is_none()
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        slave_client
            .command(&[b"LRANGE", b"list", b"0", b"-1"])
            .map(|reply| match reply {
                gridhouse_client::RespValue::Array(Some(items)) => items.len() == 2,
                _ => false,
            })
            .unwrap_or(false)
    }));

    // Master INFO sees the replica.
    let info = String::from_utf8(master_client.info().unwrap()).unwrap();
    assert!(info.contains("connected_slaves:1"), "INFO was:\n{info}");

    // SPOP is forwarded as the removal of the member actually popped, so
    // the replica's set matches the master's instead of popping its own.
    master_client
        .command(&[b"SADD", b"bag", b"m1", b"m2", b"m3"])
        .unwrap();
    let RespValue::Bulk(Some(popped)) = master_client.command(&[b"SPOP", b"bag"]).unwrap() else {
        panic!("expected a popped member");
    };
    assert!(wait_until(Duration::from_secs(5), || {
        match slave_client.command(&[b"SMEMBERS", b"bag"]) {
            Ok(RespValue::Array(Some(items))) => {
                items.len() == 2
                    && !items.contains(&RespValue::Bulk(Some(popped.clone())))
            }
            _ => false,
        }
    }));

    // FLUSHDB reaches the replica like any other write.
    master_client.command(&[b"FLUSHDB"]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        slave_client
            .command(&[b"DBSIZE"])
            .map(|reply| reply == RespValue::Integer(0))
            .unwrap_or(false)
    }));

    slave.stop();
    master.stop();
}

#[test]
fn replicaof_command_switches_roles() {
    let master_dir = tempfile::tempdir().unwrap();
    let (master_addr, master) = spawn_server(config_for(master_dir.path()));
    let mut master_client = connect(master_addr);
    master_client.set(b"k", b"v").unwrap();

    let standalone_dir = tempfile::tempdir().unwrap();
    let (standalone_addr, standalone) = spawn_server(config_for(standalone_dir.path()));
    let mut client = connect(standalone_addr);

    let port = master_addr.port().to_string();
    assert_eq!(
        client
            .command(&[b"REPLICAOF", b"127.0.0.1", port.as_bytes()])
            .unwrap(),
        gridhouse_client::RespValue::Simple(b"OK".to_vec())
    );

    assert!(wait_until(Duration::from_secs(5), || {
        client.get(b"k").unwrap() == Some(b"v".to_vec())
    }));

    // Back to master: the link is dropped and the role flips.
    assert_eq!(
        client.command(&[b"REPLICAOF", b"NO", b"ONE"]).unwrap(),
        gridhouse_client::RespValue::Simple(b"OK".to_vec())
    );
    let info = String::from_utf8(client.info().unwrap()).unwrap();
    assert!(info.contains("role:master"), "INFO was:\n{info}");

    standalone.stop();
    master.stop();
}
