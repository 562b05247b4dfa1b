/// RESP (Redis Serialization Protocol) parsing and generation
///
/// The parser is incremental and zero-copy: it scans a byte span, reports
/// "need more bytes" or "malformed", and on success returns a `Message` whose
/// payloads are slices of the caller's buffer together with the exact raw
/// span, so a request can be relayed to a backend byte for byte.

use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Range;

/// Most elements one array may carry
pub const MAX_TOKENS: usize = 1024;

/// Largest bulk string accepted, matching the Redis server's own limit
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// RESP data types, payloads borrowed from the parsed buffer
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(Bytes),
    /// Error (-ERR message\r\n)
    Error(Bytes),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<RespValue>>), // None represents NULL array
}

/// Leading tag of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    Error,
    Integer,
    Bulk,
    Array,
}

/// One parsed protocol unit plus the exact bytes it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    raw: Bytes,
    value: RespValue,
}

/// Parse error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RespError {
    #[error("Incomplete data - need more bytes")]
    Incomplete,
    #[error("Malformed RESP data: {reason}")]
    Malformed { reason: &'static str },
}

/// RESP parser for reading Redis protocol messages
pub struct RespParser;

/// RESP encoder for writing Redis protocol messages
pub struct RespEncoder;

/// Intermediate parse tree holding spans into the scanned buffer
#[derive(Debug)]
enum Node {
    Status(Range<usize>),
    Error(Range<usize>),
    Integer(i64),
    Bulk(Option<Range<usize>>),
    Array(Option<Vec<Node>>),
}

type Scan = Result<Option<(Node, usize)>, RespError>;

fn malformed<T>(reason: &'static str) -> Result<T, RespError> {
    Err(RespError::Malformed { reason })
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.value {
            RespValue::SimpleString(_) => MessageKind::Status,
            RespValue::Error(_) => MessageKind::Error,
            RespValue::Integer(_) => MessageKind::Integer,
            RespValue::BulkString(_) => MessageKind::Bulk,
            RespValue::Array(_) => MessageKind::Array,
        }
    }

    /// The exact byte span this message was parsed from
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn value(&self) -> &RespValue {
        &self.value
    }

    /// Number of elements when the message is an array, else 0
    pub fn token_count(&self) -> usize {
        match &self.value {
            RespValue::Array(Some(items)) => items.len(),
            _ => 0,
        }
    }

    /// Payload of the i-th array element. A null bulk yields an empty token;
    /// non-bulk elements yield None.
    pub fn token(&self, index: usize) -> Option<&[u8]> {
        match &self.value {
            RespValue::Array(Some(items)) => match items.get(index)? {
                RespValue::BulkString(Some(data)) => Some(data.as_ref()),
                RespValue::BulkString(None) => Some(&[]),
                _ => None,
            },
            _ => None,
        }
    }

    /// Iterate the bulk payloads of an array message
    pub fn tokens(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.token_count()).filter_map(move |i| self.token(i))
    }

    pub fn integer(&self) -> Option<i64> {
        match self.value {
            RespValue::Integer(n) => Some(n),
            _ => None,
        }
    }

    /// True for the `+OK` status reply
    pub fn is_ok(&self) -> bool {
        matches!(&self.value, RespValue::SimpleString(s) if s.as_ref() == b"OK")
    }
}

impl RespParser {
    /// Parse one message from the front of `buf`.
    ///
    /// Returns `Ok(Some((message, consumed)))` on success and `Ok(None)` when
    /// the buffer holds only a prefix of a message. Empty input has no tag
    /// and is malformed.
    pub fn parse(buf: &Bytes) -> Result<Option<(Message, usize)>, RespError> {
        match Self::scan(buf, 0)? {
            Some((node, end)) => {
                let raw = buf.slice(0..end);
                let value = Self::resolve(buf, node);
                Ok(Some((Message { raw, value }, end)))
            }
            None => Ok(None),
        }
    }

    /// Length of the first complete message in `buf`, without materializing it
    pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, RespError> {
        Ok(Self::scan(buf, 0)?.map(|(_, end)| end))
    }

    fn resolve(buf: &Bytes, node: Node) -> RespValue {
        match node {
            Node::Status(r) => RespValue::SimpleString(buf.slice(r)),
            Node::Error(r) => RespValue::Error(buf.slice(r)),
            Node::Integer(n) => RespValue::Integer(n),
            Node::Bulk(r) => RespValue::BulkString(r.map(|r| buf.slice(r))),
            Node::Array(items) => RespValue::Array(
                items.map(|items| items.into_iter().map(|n| Self::resolve(buf, n)).collect()),
            ),
        }
    }

    fn scan(buf: &[u8], pos: usize) -> Scan {
        let Some(&tag) = buf.get(pos) else {
            if pos == 0 {
                return malformed("empty input");
            }
            return Ok(None);
        };

        match tag {
            b'+' => Ok(Self::scan_line(buf, pos + 1)?.map(|(r, end)| (Node::Status(r), end))),
            b'-' => Ok(Self::scan_line(buf, pos + 1)?.map(|(r, end)| (Node::Error(r), end))),
            b':' => Ok(Self::scan_number(buf, pos + 1)?.map(|(n, end)| (Node::Integer(n), end))),
            b'$' => Self::scan_bulk(buf, pos + 1),
            b'*' => Self::scan_array(buf, pos + 1),
            _ => malformed("unknown type tag"),
        }
    }

    /// Text up to the first CRLF
    fn scan_line(buf: &[u8], start: usize) -> Result<Option<(Range<usize>, usize)>, RespError> {
        let Some(offset) = buf[start..].iter().position(|&b| b == b'\r') else {
            return Ok(None);
        };
        let cr = start + offset;
        match buf.get(cr + 1) {
            None => Ok(None),
            Some(b'\n') => Ok(Some((start..cr, cr + 2))),
            Some(_) => malformed("CR not followed by LF"),
        }
    }

    /// Optionally signed ASCII decimal terminated by CRLF
    fn scan_number(buf: &[u8], start: usize) -> Result<Option<(i64, usize)>, RespError> {
        let mut pos = start;
        while let Some(&b) = buf.get(pos) {
            match b {
                b'\r' => break,
                b'0'..=b'9' => {}
                b'+' | b'-' if pos == start => {}
                _ => return malformed("invalid character in number"),
            }
            pos += 1;
        }
        if pos + 1 >= buf.len() {
            return Ok(None);
        }
        if buf[pos + 1] != b'\n' {
            return malformed("CR not followed by LF");
        }
        match btoi::btoi::<i64>(&buf[start..pos]) {
            Ok(n) => Ok(Some((n, pos + 2))),
            Err(_) => malformed("invalid number"),
        }
    }

    fn scan_bulk(buf: &[u8], start: usize) -> Scan {
        let Some((len, body)) = Self::scan_number(buf, start)? else {
            return Ok(None);
        };
        if len == -1 {
            return Ok(Some((Node::Bulk(None), body)));
        }
        if len < 0 {
            return malformed("negative bulk length");
        }
        if len as u64 > MAX_BULK_LEN as u64 {
            return malformed("bulk length too large");
        }

        let end = body + len as usize;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return malformed("bulk string not terminated by CRLF");
        }
        Ok(Some((Node::Bulk(Some(body..end)), end + 2)))
    }

    fn scan_array(buf: &[u8], start: usize) -> Scan {
        let Some((count, mut pos)) = Self::scan_number(buf, start)? else {
            return Ok(None);
        };
        if count == -1 {
            return Ok(Some((Node::Array(None), pos)));
        }
        if count < 0 {
            return malformed("negative array length");
        }
        if count as u64 > MAX_TOKENS as u64 {
            return malformed("too many array elements");
        }

        // Array elements are bulk strings only
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match buf.get(pos) {
                None => return Ok(None),
                Some(b'$') => {}
                Some(_) => return malformed("array element is not a bulk string"),
            }
            match Self::scan_bulk(buf, pos + 1)? {
                Some((node, end)) => {
                    items.push(node);
                    pos = end;
                }
                None => return Ok(None),
            }
        }
        Ok(Some((Node::Array(Some(items)), pos)))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s);
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s);
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => Self::integer_into(buf, *n),
            RespValue::BulkString(Some(data)) => Self::bulk_into(buf, data),
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                Self::array_header_into(buf, elements.len());
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    pub fn integer_into(buf: &mut BytesMut, n: i64) {
        buf.put_u8(b':');
        buf.extend_from_slice(n.to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }

    pub fn bulk_into(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u8(b'$');
        buf.extend_from_slice(data.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.put_slice(b"\r\n");
    }

    pub fn array_header_into(buf: &mut BytesMut, len: usize) {
        buf.put_u8(b'*');
        buf.extend_from_slice(len.to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }

    /// Encode a command as an array of bulk strings
    pub fn encode_command(parts: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
        Self::array_header_into(&mut buf, parts.len());
        for part in parts {
            Self::bulk_into(&mut buf, part);
        }
        buf.freeze()
    }
}
