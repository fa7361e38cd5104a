//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies for the pooled
//! connections, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Callers provide buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Append-Only Encoding**: Commands are appended to one write buffer so a
//!    pipeline of N commands is a single contiguous write.

use std::io::BufRead;

use bytes::{BufMut, BytesMut};

use crate::error::{ClientError, ClientResult};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for a null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Returns true for the null bulk string and the null array.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Bulk(None) | RespValue::Array(None))
    }
}

/// Appends one RESP2 array command to the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Largest bulk string accepted from the server (the store's default
/// `proto-max-bulk-len`).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on array slots reserved before elements arrive.
const MAX_ARRAY_PREALLOC: i64 = 1024;

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol("empty reply line".into()));
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        other => Err(ClientError::Protocol(format!(
            "unknown reply prefix {:?}",
            other as char
        ))),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol(format!("bulk length {} exceeds limit", len)));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol("bulk string missing CRLF".into()));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Array(None));
    }

    let mut items = Vec::with_capacity(len.min(MAX_ARRAY_PREALLOC) as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Protocol("connection closed by peer".into()));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let invalid = || ClientError::Protocol("invalid integer in reply".into());
    if data.is_empty() {
        return Err(invalid());
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
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
        out.put_u8(buf[idx]);
    }
}
