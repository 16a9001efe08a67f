//! # RESP2 Wire Codec
//!
//! Purpose: Parse client requests (array and legacy inline forms) out of a
//! growing byte buffer and encode replies without intermediate strings.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `parse_request` consumes exactly one
//!    complete request or reports `Ok(None)` so the caller can read more;
//!    the buffer is never left mid-request.
//! 2. **Bounded Input**: Array and bulk lengths are capped before any
//!    allocation happens.
//! 3. **In-Place Digits**: Integer encoding writes decimal digits into a
//!    stack buffer, never through a heap `String`.
//! 4. **Best-Effort Recovery**: After a protocol error, `recover` drains to
//!    the next newline (bounded) so a pipeline can keep going.

use bytes::{Buf, Bytes, BytesMut};

use gridhouse_common::{GridError, GridResult};

/// Maximum elements in one request array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum length of a single bulk string.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Longest header/inline line tolerated before the input is declared junk.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Bytes drained at most by `recover` after a protocol error.
const RECOVER_LIMIT: usize = 1024;

/// One parsed request: the command name (original casing) and its
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: String,
    pub args: Vec<Vec<u8>>,
}

/// Parses one request from `buf`, consuming it on success.
///
/// Returns `Ok(None)` when the buffer holds only a prefix of a request.
/// Blank inline lines are skipped. On error the buffer is left untouched;
/// call `recover` before parsing again.
pub fn parse_request(buf: &mut BytesMut) -> GridResult<Option<Request>> {
    loop {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first == b'*' {
            return parse_array(buf);
        }

        // Legacy inline form: whitespace-separated tokens up to the line end.
        let Some(newline) = find_newline(buf, 0)? else {
            return Ok(None);
        };
        let line_len = line_len_without_cr(&buf[..newline]);
        let tokens: Vec<Vec<u8>> = buf[..line_len]
            .split(|&b| b == b' ' || b == b'\t')
            .filter(|token| !token.is_empty())
            .map(|token| token.to_vec())
            .collect();
        buf.advance(newline + 1);

        if tokens.is_empty() {
            continue;
        }
        return Ok(Some(request_from_parts(tokens)));
    }
}

fn parse_array(buf: &mut BytesMut) -> GridResult<Option<Request>> {
    let mut pos = 0;

    let Some(header) = read_line(buf, &mut pos)? else {
        return Ok(None);
    };
    let count = parse_len(&header[1..], MAX_ARRAY_LEN, "invalid multibulk length")?;
    if count == 0 {
        return Err(GridError::Protocol("empty command".to_string()));
    }

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(line) = read_line(buf, &mut pos)? else {
            return Ok(None);
        };
        if line.first() != Some(&b'$') {
            return Err(GridError::Protocol("expected bulk string".to_string()));
        }
        let len = parse_len(&line[1..], MAX_BULK_LEN, "invalid bulk length")?;

        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(GridError::Protocol("bulk string missing CRLF".to_string()));
        }
        parts.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }

    buf.advance(pos);
    Ok(Some(request_from_parts(parts)))
}

fn request_from_parts(mut parts: Vec<Vec<u8>>) -> Request {
    let name_bytes = parts.remove(0);
    Request {
        name: String::from_utf8_lossy(&name_bytes).into_owned(),
        args: parts,
    }
}

/// Returns the CRLF-terminated line starting at `*pos` (without the CRLF)
/// and advances `*pos` past it, or `None` when the line is incomplete.
fn read_line<'a>(buf: &'a BytesMut, pos: &mut usize) -> GridResult<Option<&'a [u8]>> {
    let Some(newline) = find_newline(buf, *pos)? else {
        return Ok(None);
    };
    if newline == *pos || buf[newline - 1] != b'\r' {
        return Err(GridError::Protocol("expected CRLF line ending".to_string()));
    }
    let line = &buf[*pos..newline - 1];
    *pos = newline + 1;
    Ok(Some(line))
}

fn find_newline(buf: &BytesMut, from: usize) -> GridResult<Option<usize>> {
    match buf[from..].iter().position(|&b| b == b'\n') {
        Some(offset) => Ok(Some(from + offset)),
        None if buf.len() - from > MAX_LINE_LEN => {
            Err(GridError::Protocol("request line too long".to_string()))
        }
        None => Ok(None),
    }
}

/// Inline lines may end in `\n` or `\r\n`; strip the optional `\r`.
fn line_len_without_cr(line: &[u8]) -> usize {
    if line.last() == Some(&b'\r') {
        line.len() - 1
    } else {
        line.len()
    }
}

fn parse_len(digits: &[u8], max: usize, message: &str) -> GridResult<usize> {
    if digits.is_empty() || digits.len() > 10 {
        return Err(GridError::Protocol(message.to_string()));
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(GridError::Protocol(message.to_string()));
        }
        value = value * 10 + (b - b'0') as usize;
    }
    if value > max {
        return Err(GridError::Protocol(message.to_string()));
    }
    Ok(value)
}

/// Discards unclassifiable bytes after a protocol error: up to the next
/// newline, never more than 1 KiB, so a pipelined connection can resume.
pub fn recover(buf: &mut BytesMut) {
    let limit = buf.len().min(RECOVER_LIMIT);
    match buf[..limit].iter().position(|&b| b == b'\n') {
        Some(idx) => buf.advance(idx + 1),
        None => buf.advance(limit),
    }
}

/// A reply value, encoded by `encode_reply`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Null bulk string (`$-1`).
    Nil,
    Array(Vec<Reply>),
    /// Null array (`*-1`).
    NilArray,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Error(message.into())
    }

    pub fn from_err(err: GridError) -> Reply {
        Reply::Error(err.wire_message())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Encodes a reply into the caller's buffer.
pub fn encode_reply(reply: &Reply, out: &mut BytesMut) {
    match reply {
        Reply::Simple(text) => {
            out.extend_from_slice(b"+");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(text) => {
            out.extend_from_slice(b"-");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Integer(value) => {
            out.extend_from_slice(b":");
            put_decimal(out, *value);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(data) => {
            out.extend_from_slice(b"$");
            put_decimal(out, data.len() as i64);
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            out.extend_from_slice(b"*");
            put_decimal(out, items.len() as i64);
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, out);
            }
        }
        Reply::NilArray => out.extend_from_slice(b"*-1\r\n"),
    }
}

/// Encodes a command as a RESP array of bulk strings. Used for the AOF,
/// the replication stream, and the slave handshake.
pub fn encode_command(parts: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_decimal(out, parts.len() as u64);
    out.extend_from_slice(b"\r\n");
    for part in parts {
        out.push(b'$');
        push_decimal(out, part.len() as u64);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
}

/// Appends the decimal digits of `value` without heap allocation.
fn put_decimal(out: &mut BytesMut, value: i64) {
    if value < 0 {
        out.extend_from_slice(b"-");
    }
    let mut buf = [0u8; 20];
    let len = write_digits(value.unsigned_abs(), &mut buf);
    out.extend_from_slice(&buf[..len]);
}

fn push_decimal(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 20];
    let len = write_digits(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

/// Writes digits most-significant first into `buf`, returning the length.
fn write_digits(mut value: u64, buf: &mut [u8; 20]) -> usize {
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return 1;
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    len
}
