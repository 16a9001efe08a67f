//! Client behavior against a scripted in-process TCP endpoint.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use gridhouse_client::{Client, ClientError, ClientTtl, RespValue};

fn spawn_endpoint(
    expected_commands: usize,
    handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream),
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected array",
        ));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected bulk",
            ));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing crlf",
            ));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 || buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid line",
        ));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad length"))
}

fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    let _ = stream.write_all(bytes);
    let _ = stream.flush();
}

#[test]
fn set_get_roundtrip() {
    let addr = spawn_endpoint(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            write_raw(stream, b"+OK\r\n");
        } else {
            assert_eq!(args[0], b"GET");
            write_raw(stream, b"$5\r\nvalue\r\n");
        }
    });

    let mut client = Client::connect(addr).expect("client");
    client.set(b"key", b"value").expect("set");
    assert_eq!(client.get(b"key").expect("get"), Some(b"value".to_vec()));
}

#[test]
fn ttl_delete_and_nil() {
    let addr = spawn_endpoint(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"TTL");
            write_raw(stream, b":5\r\n");
        }
        1 => {
            assert_eq!(args[0], b"DEL");
            write_raw(stream, b":1\r\n");
        }
        _ => {
            assert_eq!(args[0], b"GET");
            write_raw(stream, b"$-1\r\n");
        }
    });

    let mut client = Client::connect(addr).expect("client");
    assert_eq!(
        client.ttl(b"key").expect("ttl"),
        ClientTtl::ExpiresIn(Duration::from_secs(5))
    );
    assert!(client.del(b"key").expect("del"));
    assert_eq!(client.get(b"key").expect("get"), None);
}

#[test]
fn raw_command_returns_arrays() {
    let addr = spawn_endpoint(1, |_, args, stream| {
        assert_eq!(args[0], b"LRANGE");
        write_raw(stream, b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    });

    let mut client = Client::connect(addr).expect("client");
    let reply = client
        .command(&[b"LRANGE", b"l", b"0", b"-1"])
        .expect("command");
    assert_eq!(
        reply,
        RespValue::Array(Some(vec![
            RespValue::Bulk(Some(b"a".to_vec())),
            RespValue::Bulk(Some(b"b".to_vec())),
        ]))
    );
}

#[test]
fn server_errors_surface_in_helpers() {
    let addr = spawn_endpoint(1, |_, args, stream| {
        assert_eq!(args[0], b"GET");
        write_raw(stream, b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n");
    });

    let mut client = Client::connect(addr).expect("client");
    match client.get(b"key") {
        Err(ClientError::Server(message)) => {
            assert!(message.starts_with(b"WRONGTYPE"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn pipelined_raw_replies_arrive_in_order() {
    let addr = spawn_endpoint(2, |idx, args, stream| {
        assert_eq!(args[0], b"PING");
        if idx == 1 {
            // Both replies were already written after the first command;
            // nothing more to send.
            return;
        }
        write_raw(stream, b"+PONG\r\n+PONG\r\n");
    });

    let mut client = Client::connect(addr).expect("client");
    let mut batch = Vec::new();
    gridhouse_client::encode_command(&[b"PING"], &mut batch);
    gridhouse_client::encode_command(&[b"PING"], &mut batch);
    client.send_raw(&batch).expect("send");

    assert_eq!(client.read_reply().expect("first"), RespValue::Simple(b"PONG".to_vec()));
    assert_eq!(client.read_reply().expect("second"), RespValue::Simple(b"PONG".to_vec()));
}
