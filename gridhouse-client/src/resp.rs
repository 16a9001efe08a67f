//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands and parse server replies over a buffered
//! reader, keeping allocations under the caller's control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with a single
//!    reusable line buffer.
//! 2. **Binary-Safe**: Bulk strings are raw bytes, never UTF-8.
//! 3. **Fail Fast**: Invalid framing surfaces as a protocol error
//!    immediately.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// One parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style simple strings.
    Simple(Vec<u8>),
    /// `-ERR ...` replies.
    Error(Vec<u8>),
    /// `:123` integers.
    Integer(i64),
    /// `$...` bulk strings; `None` for the null bulk.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays; `None` for the null array.
    Array(Option<Vec<RespValue>>),
}

/// Encodes a command as a RESP2 array of bulk strings.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_decimal(out, args.len() as u64);
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_decimal(out, arg.len() as u64);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply from the buffered reader.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }
    Ok(RespValue::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Array(None));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}

fn push_decimal(out: &mut Vec<u8>, mut value: u64) {
    // Digits go into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &[u8]) -> RespValue {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line).unwrap()
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn parses_simple_and_error() {
        assert_eq!(parse(b"+OK\r\n"), RespValue::Simple(b"OK".to_vec()));
        assert_eq!(parse(b"-ERR bad\r\n"), RespValue::Error(b"ERR bad".to_vec()));
    }

    #[test]
    fn parses_integers() {
        assert_eq!(parse(b":42\r\n"), RespValue::Integer(42));
        assert_eq!(parse(b":-7\r\n"), RespValue::Integer(-7));
    }

    #[test]
    fn parses_bulk_strings() {
        assert_eq!(parse(b"$5\r\nhello\r\n"), RespValue::Bulk(Some(b"hello".to_vec())));
        assert_eq!(parse(b"$-1\r\n"), RespValue::Bulk(None));
    }

    #[test]
    fn parses_arrays_including_null() {
        assert_eq!(
            parse(b"*2\r\n:1\r\n$1\r\na\r\n"),
            RespValue::Array(Some(vec![
                RespValue::Integer(1),
                RespValue::Bulk(Some(b"a".to_vec())),
            ]))
        );
        assert_eq!(parse(b"*-1\r\n"), RespValue::Array(None));
        assert_eq!(parse(b"*0\r\n"), RespValue::Array(Some(Vec::new())));
    }

    #[test]
    fn rejects_bad_framing() {
        let mut reader = Cursor::new(b"$5\r\nhelloXX".to_vec());
        let mut line = Vec::new();
        assert!(read_response(&mut reader, &mut line).is_err());
    }
}
