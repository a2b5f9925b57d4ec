//! RESP protocol codec.
//!
//! Decoding turns the inbound byte stream into requests (non-empty vectors of
//! binary-safe arguments) and is restartable: a partial frame leaves the
//! buffer untouched so the caller can read more bytes and retry. Encoding
//! turns a [`RespValue`] reply into wire bytes for either protocol version;
//! RESP3-only variants degrade to their RESP2 spellings when the session has
//! not negotiated the newer protocol.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Inline commands are single lines; longer input is a protocol violation.
pub const MAX_INLINE_LENGTH: usize = 64 * 1024;
/// Bulk strings (and therefore values) are capped at 512 MiB.
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    #[error("not enough data to parse an entire frame")]
    Incomplete,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RespError {
    fn protocol(message: impl Into<String>) -> Self {
        RespError::Protocol(message.into())
    }
}

/// A typed server reply.
///
/// The first six variants exist in both protocol versions; the rest are
/// RESP3 types that [`RespValue::encode`] rewrites for RESP2 sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespValue>),
    NullArray,
    Null,
    Boolean(bool),
    Double(f64),
    BigNumber(String),
    Verbatim(String, String),
    Map(Vec<(RespValue, RespValue)>),
    Set(Vec<RespValue>),
    Push(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn bulk_from_string(data: impl Into<String>) -> Self {
        RespValue::BulkString(Bytes::from(data.into()))
    }

    /// Encodes the reply for the given protocol version (2 or 3).
    pub fn encode(&self, protocol_version: u8) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out, protocol_version);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>, protocol_version: u8) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::NullBulkString => {
                if protocol_version >= 3 {
                    out.extend_from_slice(b"_\r\n");
                } else {
                    out.extend_from_slice(b"$-1\r\n");
                }
            }
            RespValue::Array(elements) => {
                out.push(b'*');
                out.extend_from_slice(elements.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for element in elements {
                    element.write_to(out, protocol_version);
                }
            }
            RespValue::NullArray => {
                if protocol_version >= 3 {
                    out.extend_from_slice(b"_\r\n");
                } else {
                    out.extend_from_slice(b"*-1\r\n");
                }
            }
            RespValue::Null => {
                if protocol_version >= 3 {
                    out.extend_from_slice(b"_\r\n");
                } else {
                    out.extend_from_slice(b"$-1\r\n");
                }
            }
            RespValue::Boolean(value) => {
                if protocol_version >= 3 {
                    out.extend_from_slice(if *value { b"#t\r\n" } else { b"#f\r\n" });
                } else {
                    RespValue::Integer(if *value { 1 } else { 0 }).write_to(out, protocol_version);
                }
            }
            RespValue::Double(value) => {
                let rendered = format_double(*value);
                if protocol_version >= 3 {
                    out.push(b',');
                    out.extend_from_slice(rendered.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    RespValue::bulk_from_string(rendered).write_to(out, protocol_version);
                }
            }
            RespValue::BigNumber(digits) => {
                if protocol_version >= 3 {
                    out.push(b'(');
                    out.extend_from_slice(digits.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    RespValue::bulk_from_string(digits.clone()).write_to(out, protocol_version);
                }
            }
            RespValue::Verbatim(format, content) => {
                if protocol_version >= 3 {
                    out.push(b'=');
                    out.extend_from_slice((content.len() + 4).to_string().as_bytes());
                    out.extend_from_slice(b"\r\n");
                    out.extend_from_slice(format.as_bytes());
                    out.push(b':');
                    out.extend_from_slice(content.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    RespValue::bulk_from_string(content.clone()).write_to(out, protocol_version);
                }
            }
            RespValue::Map(pairs) => {
                if protocol_version >= 3 {
                    out.push(b'%');
                    out.extend_from_slice(pairs.len().to_string().as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    out.push(b'*');
                    out.extend_from_slice((pairs.len() * 2).to_string().as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                for (key, value) in pairs {
                    key.write_to(out, protocol_version);
                    value.write_to(out, protocol_version);
                }
            }
            RespValue::Set(elements) => {
                let marker = if protocol_version >= 3 { b'~' } else { b'*' };
                out.push(marker);
                out.extend_from_slice(elements.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for element in elements {
                    element.write_to(out, protocol_version);
                }
            }
            RespValue::Push(elements) => {
                let marker = if protocol_version >= 3 { b'>' } else { b'*' };
                out.push(marker);
                out.extend_from_slice(elements.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for element in elements {
                    element.write_to(out, protocol_version);
                }
            }
        }
    }

    /// Parses one reply value from the cursor. Used by tests and anywhere
    /// the crate needs to read frames it produced itself.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<RespValue, RespError> {
        let marker = read_byte(src)?;

        match marker {
            b'+' => {
                let line = read_line(src)?;
                Ok(RespValue::SimpleString(
                    String::from_utf8(line.to_vec())
                        .map_err(|_| RespError::protocol("invalid UTF-8 in simple string"))?,
                ))
            }
            b'-' => {
                let line = read_line(src)?;
                Ok(RespValue::Error(
                    String::from_utf8(line.to_vec())
                        .map_err(|_| RespError::protocol("invalid UTF-8 in error"))?,
                ))
            }
            b':' => {
                let line = read_line(src)?;
                parse_integer(line).map(RespValue::Integer)
            }
            b'$' => {
                let length = parse_length(read_line(src)?)?;
                if length == -1 {
                    return Ok(RespValue::NullBulkString);
                }
                let data = read_exact(src, length as usize)?;
                Ok(RespValue::BulkString(Bytes::copy_from_slice(data)))
            }
            b'*' => {
                let length = parse_length(read_line(src)?)?;
                if length == -1 {
                    return Ok(RespValue::NullArray);
                }
                let mut elements = Vec::with_capacity(length as usize);
                for _ in 0..length {
                    elements.push(RespValue::parse(src)?);
                }
                Ok(RespValue::Array(elements))
            }
            b'_' => {
                read_line(src)?;
                Ok(RespValue::Null)
            }
            b'#' => {
                let line = read_line(src)?;
                match line {
                    b"t" => Ok(RespValue::Boolean(true)),
                    b"f" => Ok(RespValue::Boolean(false)),
                    _ => Err(RespError::protocol("invalid boolean")),
                }
            }
            b',' => {
                let line = read_line(src)?;
                let text = std::str::from_utf8(line)
                    .map_err(|_| RespError::protocol("invalid double"))?;
                let value = match text {
                    "inf" => f64::INFINITY,
                    "-inf" => f64::NEG_INFINITY,
                    other => other
                        .parse::<f64>()
                        .map_err(|_| RespError::protocol("invalid double"))?,
                };
                Ok(RespValue::Double(value))
            }
            b'(' => {
                let line = read_line(src)?;
                Ok(RespValue::BigNumber(
                    String::from_utf8(line.to_vec())
                        .map_err(|_| RespError::protocol("invalid big number"))?,
                ))
            }
            b'=' => {
                let length = parse_length(read_line(src)?)?;
                if length < 4 {
                    return Err(RespError::protocol("verbatim string too short"));
                }
                let data = read_exact(src, length as usize)?;
                let format = String::from_utf8(data[..3].to_vec())
                    .map_err(|_| RespError::protocol("invalid verbatim format"))?;
                let content = String::from_utf8(data[4..].to_vec())
                    .map_err(|_| RespError::protocol("invalid verbatim content"))?;
                Ok(RespValue::Verbatim(format, content))
            }
            b'%' => {
                let length = parse_length(read_line(src)?)?;
                let mut pairs = Vec::with_capacity(length.max(0) as usize);
                for _ in 0..length {
                    let key = RespValue::parse(src)?;
                    let value = RespValue::parse(src)?;
                    pairs.push((key, value));
                }
                Ok(RespValue::Map(pairs))
            }
            b'~' => {
                let length = parse_length(read_line(src)?)?;
                let mut elements = Vec::with_capacity(length.max(0) as usize);
                for _ in 0..length {
                    elements.push(RespValue::parse(src)?);
                }
                Ok(RespValue::Set(elements))
            }
            b'>' => {
                let length = parse_length(read_line(src)?)?;
                let mut elements = Vec::with_capacity(length.max(0) as usize);
                for _ in 0..length {
                    elements.push(RespValue::parse(src)?);
                }
                Ok(RespValue::Push(elements))
            }
            other => Err(RespError::Protocol(format!(
                "unknown reply type byte '{}'",
                other as char
            ))),
        }
    }
}

/// Doubles render in their shortest round-trip form; infinities use the
/// RESP3 spellings.
fn format_double(value: f64) -> String {
    if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", value)
    }
}

enum Decoded {
    Request(Vec<Bytes>),
    /// More bytes needed; nothing was consumed.
    Incomplete,
    /// A complete but argument-less frame was consumed; keep scanning.
    Empty,
}

/// Decodes one client request from the buffer.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame; the buffer
/// is left untouched in that case so the connection can read more bytes and
/// call again. On success the consumed bytes are drained from the buffer.
/// Empty requests (bare CRLF, `*0`) are consumed and skipped.
pub fn decode_request(buffer: &mut BytesMut) -> Result<Option<Vec<Bytes>>, RespError> {
    loop {
        // Skip blank lines between inline commands.
        while buffer.starts_with(b"\r\n") {
            buffer.advance(2);
        }
        while buffer.starts_with(b"\n") {
            buffer.advance(1);
        }

        if buffer.is_empty() {
            return Ok(None);
        }

        let decoded = match buffer[0] {
            b'*' => decode_array_request(buffer)?,
            b'+' | b'-' | b':' | b'$' | b'_' | b'#' | b',' | b'(' | b'=' | b'%' | b'~'
            | b'>' => {
                return Err(RespError::Protocol(format!(
                    "expected '*', got '{}'",
                    buffer[0] as char
                )))
            }
            _ => decode_inline_request(buffer)?,
        };

        match decoded {
            Decoded::Request(arguments) => return Ok(Some(arguments)),
            Decoded::Incomplete => return Ok(None),
            Decoded::Empty => continue,
        }
    }
}

fn decode_array_request(buffer: &mut BytesMut) -> Result<Decoded, RespError> {
    let mut position = 0usize;

    let Some(header) = scan_line(buffer, &mut position)? else {
        return Ok(Decoded::Incomplete);
    };
    let element_count = parse_length(&header[1..])?;

    if element_count < -1 {
        return Err(RespError::protocol("invalid multibulk length"));
    }

    if element_count <= 0 {
        // `*0` and `*-1` carry no command.
        buffer.advance(position);
        return Ok(Decoded::Empty);
    }

    let mut arguments = Vec::with_capacity(element_count as usize);

    for _ in 0..element_count {
        let Some(length_line) = scan_line(buffer, &mut position)? else {
            return Ok(Decoded::Incomplete);
        };

        if length_line.first() != Some(&b'$') {
            return Err(RespError::Protocol(format!(
                "expected '$', got '{}'",
                length_line.first().copied().unwrap_or(b' ') as char
            )));
        }

        let bulk_length = parse_length(&length_line[1..])?;
        if bulk_length < 0 || bulk_length as usize > MAX_BULK_LENGTH {
            return Err(RespError::protocol("invalid bulk length"));
        }
        let bulk_length = bulk_length as usize;

        if buffer.len() < position + bulk_length + 2 {
            return Ok(Decoded::Incomplete);
        }

        let payload = Bytes::copy_from_slice(&buffer[position..position + bulk_length]);
        if &buffer[position + bulk_length..position + bulk_length + 2] != b"\r\n" {
            return Err(RespError::protocol("expected CRLF after bulk payload"));
        }
        position += bulk_length + 2;
        arguments.push(payload);
    }

    buffer.advance(position);
    Ok(Decoded::Request(arguments))
}

/// Inline commands are a single whitespace-separated line, accepted for
/// telnet ergonomics.
fn decode_inline_request(buffer: &mut BytesMut) -> Result<Decoded, RespError> {
    let Some(newline) = buffer.iter().position(|&b| b == b'\n') else {
        if buffer.len() > MAX_INLINE_LENGTH {
            return Err(RespError::protocol("too big inline request"));
        }
        return Ok(Decoded::Incomplete);
    };

    if newline > MAX_INLINE_LENGTH {
        return Err(RespError::protocol("too big inline request"));
    }

    let mut line_end = newline;
    if line_end > 0 && buffer[line_end - 1] == b'\r' {
        line_end -= 1;
    }

    let arguments = buffer[..line_end]
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|token| !token.is_empty())
        .map(Bytes::copy_from_slice)
        .collect::<Vec<Bytes>>();

    buffer.advance(newline + 1);

    if arguments.is_empty() {
        return Ok(Decoded::Empty);
    }

    Ok(Decoded::Request(arguments))
}

/// Finds the next CRLF-terminated line starting at `*position`, advancing
/// `*position` past the terminator. Returns `None` when the line is not yet
/// complete in the buffer.
fn scan_line<'a>(
    buffer: &'a BytesMut,
    position: &mut usize,
) -> Result<Option<&'a [u8]>, RespError> {
    let start = *position;
    let slice = &buffer[start..];

    let Some(index) = slice.windows(2).position(|window| window == b"\r\n") else {
        if slice.len() > MAX_INLINE_LENGTH {
            return Err(RespError::protocol("line too long"));
        }
        return Ok(None);
    };

    *position = start + index + 2;
    Ok(Some(&slice[..index]))
}

fn parse_length(line: &[u8]) -> Result<i64, RespError> {
    let text =
        std::str::from_utf8(line).map_err(|_| RespError::protocol("invalid length header"))?;
    text.parse::<i64>()
        .map_err(|_| RespError::protocol("invalid length header"))
}

fn parse_integer(line: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(line).map_err(|_| RespError::protocol("invalid integer"))?;
    text.parse::<i64>()
        .map_err(|_| RespError::protocol("invalid integer"))
}

fn read_byte(src: &mut Cursor<&[u8]>) -> Result<u8, RespError> {
    if !src.has_remaining() {
        return Err(RespError::Incomplete);
    }
    Ok(src.get_u8())
}

fn read_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], RespError> {
    let start = src.position() as usize;
    let slice = &src.get_ref()[start..];

    let index = slice
        .windows(2)
        .position(|window| window == b"\r\n")
        .ok_or(RespError::Incomplete)?;

    src.set_position((start + index + 2) as u64);
    Ok(&src.get_ref()[start..start + index])
}

fn read_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], RespError> {
    let start = src.position() as usize;

    if src.get_ref().len() < start + length + 2 {
        return Err(RespError::Incomplete);
    }
    if &src.get_ref()[start + length..start + length + 2] != b"\r\n" {
        return Err(RespError::protocol("expected CRLF after payload"));
    }

    src.set_position((start + length + 2) as u64);
    Ok(&src.get_ref()[start..start + length])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Vec<Bytes>> {
        let mut buffer = BytesMut::from(input);
        let mut requests = Vec::new();
        while let Some(request) = decode_request(&mut buffer).unwrap() {
            requests.push(request);
        }
        requests
    }

    #[test]
    fn test_decode_array_request() {
        let requests = decode_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], vec![Bytes::from("ECHO"), Bytes::from("hello")]);
    }

    #[test]
    fn test_decode_pipelined_requests() {
        let requests = decode_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_decode_inline_request() {
        let requests = decode_all(b"SET key value\r\n");
        assert_eq!(
            requests,
            vec![vec![
                Bytes::from("SET"),
                Bytes::from("key"),
                Bytes::from("value")
            ]]
        );
    }

    #[test]
    fn test_decode_binary_safe_argument() {
        let requests = decode_all(b"*2\r\n$3\r\nGET\r\n$3\r\na\x00b\r\n");
        assert_eq!(requests[0][1], Bytes::from(&b"a\x00b"[..]));
    }

    #[test]
    fn test_decode_partial_frame_is_restartable() {
        let full = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";

        for split in 1..full.len() {
            let mut buffer = BytesMut::from(&full[..split]);
            assert_eq!(
                decode_request(&mut buffer).unwrap(),
                None,
                "split at {} should be incomplete",
                split
            );
            assert_eq!(buffer.len(), split, "partial decode must not consume");

            buffer.extend_from_slice(&full[split..]);
            let request = decode_request(&mut buffer).unwrap().unwrap();
            assert_eq!(request, vec![Bytes::from("ECHO"), Bytes::from("hello")]);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_decode_rejects_typed_top_level_frames() {
        for input in [&b"+OK\r\n"[..], b":1\r\n", b"-ERR nope\r\n", b"$3\r\nfoo\r\n"] {
            let mut buffer = BytesMut::from(input);
            assert!(matches!(
                decode_request(&mut buffer),
                Err(RespError::Protocol(_))
            ));
        }
    }

    #[test]
    fn test_decode_rejects_malformed_lengths() {
        let test_cases: Vec<&[u8]> = vec![
            b"*abc\r\n",
            b"*-2\r\n",
            b"*1\r\n$-1\r\n",
            b"*1\r\n$abc\r\n",
            b"*1\r\n$3\r\nfooX\r\n",
        ];

        for input in test_cases {
            let mut buffer = BytesMut::from(input);
            assert!(
                matches!(decode_request(&mut buffer), Err(RespError::Protocol(_))),
                "input {:?} should fail",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_decode_skips_empty_requests() {
        // A blank line and an empty array precede the real command; one call
        // must step over both.
        let mut buffer = BytesMut::from(&b"\r\n*0\r\n*1\r\n$4\r\nPING\r\n"[..]);
        let request = decode_request(&mut buffer).unwrap().unwrap();
        assert_eq!(request, vec![Bytes::from("PING")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_inline_too_long() {
        let mut line = vec![b'a'; MAX_INLINE_LENGTH + 10];
        line.push(b'\n');
        let mut buffer = BytesMut::from(&line[..]);
        assert!(matches!(
            decode_request(&mut buffer),
            Err(RespError::Protocol(_))
        ));
    }

    #[test]
    fn test_encode_resp2_downgrades() {
        let test_cases = vec![
            (RespValue::Boolean(true), ":1\r\n".as_bytes().to_vec()),
            (RespValue::Boolean(false), ":0\r\n".as_bytes().to_vec()),
            (RespValue::Null, "$-1\r\n".as_bytes().to_vec()),
            (RespValue::Double(1.5), "$3\r\n1.5\r\n".as_bytes().to_vec()),
            (
                RespValue::Map(vec![(
                    RespValue::bulk_from_string("a"),
                    RespValue::Integer(1),
                )]),
                "*2\r\n$1\r\na\r\n:1\r\n".as_bytes().to_vec(),
            ),
            (
                RespValue::Set(vec![RespValue::bulk_from_string("x")]),
                "*1\r\n$1\r\nx\r\n".as_bytes().to_vec(),
            ),
            (
                RespValue::Push(vec![RespValue::bulk_from_string("message")]),
                "*1\r\n$7\r\nmessage\r\n".as_bytes().to_vec(),
            ),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.encode(2), expected, "encoding {:?} for RESP2", value);
        }
    }

    #[test]
    fn test_encode_resp3_native_forms() {
        let test_cases = vec![
            (RespValue::Boolean(true), "#t\r\n".as_bytes().to_vec()),
            (RespValue::Null, "_\r\n".as_bytes().to_vec()),
            (RespValue::Double(1.5), ",1.5\r\n".as_bytes().to_vec()),
            (
                RespValue::Double(f64::INFINITY),
                ",inf\r\n".as_bytes().to_vec(),
            ),
            (
                RespValue::Map(vec![(
                    RespValue::bulk_from_string("a"),
                    RespValue::Integer(1),
                )]),
                "%1\r\n$1\r\na\r\n:1\r\n".as_bytes().to_vec(),
            ),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.encode(3), expected, "encoding {:?} for RESP3", value);
        }
    }

    #[test]
    fn test_reply_round_trip_resp2() {
        let replies = vec![
            RespValue::SimpleString("PONG".to_string()),
            RespValue::Error("ERR boom".to_string()),
            RespValue::Integer(-42),
            RespValue::bulk_from_string("hello"),
            RespValue::NullBulkString,
            RespValue::NullArray,
            RespValue::Array(vec![
                RespValue::bulk_from_string("a"),
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::SimpleString("nested".to_string())]),
            ]),
        ];

        for reply in replies {
            let encoded = reply.encode(2);
            let mut cursor = Cursor::new(encoded.as_slice());
            let decoded = RespValue::parse(&mut cursor).unwrap();
            assert_eq!(decoded, reply, "round trip for {:?}", reply);
            assert_eq!(cursor.position() as usize, encoded.len());
        }
    }

    #[test]
    fn test_reply_round_trip_resp3() {
        let replies = vec![
            RespValue::Null,
            RespValue::Boolean(true),
            RespValue::Double(3.25),
            RespValue::Double(f64::NEG_INFINITY),
            RespValue::BigNumber("123456789012345678901234567890".to_string()),
            RespValue::Verbatim("txt".to_string(), "some text".to_string()),
            RespValue::Map(vec![
                (
                    RespValue::bulk_from_string("server"),
                    RespValue::bulk_from_string("ferrodis"),
                ),
                (RespValue::bulk_from_string("proto"), RespValue::Integer(3)),
            ]),
            RespValue::Set(vec![
                RespValue::bulk_from_string("a"),
                RespValue::bulk_from_string("b"),
            ]),
            RespValue::Push(vec![
                RespValue::bulk_from_string("message"),
                RespValue::bulk_from_string("chan"),
                RespValue::bulk_from_string("payload"),
            ]),
        ];

        for reply in replies {
            let encoded = reply.encode(3);
            let mut cursor = Cursor::new(encoded.as_slice());
            let decoded = RespValue::parse(&mut cursor).unwrap();
            assert_eq!(decoded, reply, "round trip for {:?}", reply);
        }
    }

    #[test]
    fn test_reply_parse_incomplete() {
        let encoded = RespValue::bulk_from_string("hello").encode(2);

        for split in 1..encoded.len() {
            let mut cursor = Cursor::new(&encoded[..split]);
            assert_eq!(
                RespValue::parse(&mut cursor),
                Err(RespError::Incomplete),
                "split at {}",
                split
            );
        }
    }
}
