//! # RESP Encoding and Parsing
//!
//! Purpose: Encode commands and parse replies for the handshake, the
//! liveness probes, and whatever commands callers push through a borrowed
//! connection.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Callers provide the scratch buffer, keeping the hot
//!    path allocation-free across commands.
//! 2. **Binary-Safe**: Bulk payloads are raw bytes end to end.
//! 3. **Permissive RESP3**: The modern handshake can answer with map, set,
//!    null, boolean, double, and big-number frames; all are parsed, the
//!    exotic scalars as raw text.
//! 4. **Fail Fast**: Broken framing surfaces immediately as a protocol
//!    error.

use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// One parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` style responses.
    Simple(Vec<u8>),
    /// `-ERR ...` responses. Carried as data; command helpers decide whether
    /// an error reply is fatal.
    Error(Vec<u8>),
    /// `:123` responses.
    Integer(i64),
    /// `$...` bulk strings, `None` for the RESP2 null bulk.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays.
    Array(Vec<Reply>),
    /// `%...` RESP3 maps, e.g. the HELLO reply.
    Map(Vec<(Reply, Reply)>),
    /// `~...` RESP3 sets.
    Set(Vec<Reply>),
    /// `_` RESP3 null.
    Null,
    /// `#t` / `#f` RESP3 booleans.
    Bool(bool),
    /// `,3.14` RESP3 doubles, kept as raw text.
    Double(Vec<u8>),
    /// `(...` RESP3 big numbers, kept as raw text.
    BigNumber(Vec<u8>),
}

impl Reply {
    /// The error text when this reply is a server error.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Reply::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }
}

/// Encodes one command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply frame, recursing into aggregates.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(Error::Protocol("empty reply line".into()));
    }

    let payload_start = 1;
    match line_buf[0] {
        b'+' => Ok(Reply::Simple(line_buf[payload_start..].to_vec())),
        b'-' => Ok(Reply::Error(line_buf[payload_start..].to_vec())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[payload_start..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[payload_start..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[payload_start..])?;
            let items = read_items(reader, len, line_buf)?;
            Ok(Reply::Array(items))
        }
        b'%' => {
            let pairs = parse_i64(&line_buf[payload_start..])?;
            // A map of N pairs is 2N frames on the wire.
            let items = read_items(reader, pairs.saturating_mul(2), line_buf)?;
            let mut map = Vec::with_capacity(items.len() / 2);
            let mut items = items.into_iter();
            while let (Some(key), Some(value)) = (items.next(), items.next()) {
                map.push((key, value));
            }
            Ok(Reply::Map(map))
        }
        b'~' => {
            let len = parse_i64(&line_buf[payload_start..])?;
            let items = read_items(reader, len, line_buf)?;
            Ok(Reply::Set(items))
        }
        b'_' => Ok(Reply::Null),
        b'#' => match line_buf.get(payload_start) {
            Some(b't') => Ok(Reply::Bool(true)),
            Some(b'f') => Ok(Reply::Bool(false)),
            _ => Err(Error::Protocol("malformed boolean frame".into())),
        },
        b',' => Ok(Reply::Double(line_buf[payload_start..].to_vec())),
        b'(' => Ok(Reply::BigNumber(line_buf[payload_start..].to_vec())),
        other => Err(Error::Protocol(format!(
            "unknown reply prefix 0x{other:02x}"
        ))),
    }
}

/// Streams one bulk reply's payload into `dest` without buffering it whole.
///
/// Returns the number of payload bytes written. A null bulk writes nothing.
/// Any other frame type, including a server error, is a failure: chunked
/// reads are only meaningful for bulk payloads.
pub fn read_bulk_chunk<R: BufRead, W: Write + ?Sized>(
    reader: &mut R,
    dest: &mut W,
    line_buf: &mut Vec<u8>,
) -> Result<u64> {
    read_line(reader, line_buf)?;
    match line_buf.first() {
        Some(b'$') => {}
        Some(b'-') => {
            return Err(Error::Server(
                String::from_utf8_lossy(&line_buf[1..]).into_owned(),
            ))
        }
        _ => return Err(Error::UnexpectedReply { expected: "bulk" }),
    }

    let len = parse_i64(&line_buf[1..])?;
    if len < 0 {
        return Ok(0);
    }

    let mut remaining = len as u64;
    let mut chunk = [0u8; 1024];
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u64) as usize;
        read_exact(reader, &mut chunk[..take])?;
        dest.write_all(&chunk[..take])?;
        remaining -= take as u64;
    }
    expect_crlf(reader)?;
    Ok(len as u64)
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> Result<Reply> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    read_exact(reader, &mut data)?;
    expect_crlf(reader)?;
    Ok(Reply::Bulk(Some(data)))
}

fn read_items<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> Result<Vec<Reply>> {
    if len <= 0 {
        return Ok(Vec::new());
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(items)
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(Error::Protocol("connection closed mid-reply".into()));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(Error::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn read_exact<R: BufRead>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    use std::io::Read;
    reader.read_exact(buf)?;
    Ok(())
}

fn expect_crlf<R: BufRead>(reader: &mut R) -> Result<()> {
    let mut crlf = [0u8; 2];
    read_exact(reader, &mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(Error::Protocol("bulk payload missing CRLF".into()));
    }
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64> {
    if data.is_empty() {
        return Err(Error::Protocol("empty integer field".into()));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(Error::Protocol("integer field has no digits".into()));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol("non-digit in integer field".into()));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits land in a stack buffer first so encoding stays allocation-free.
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
