/// Multi-key fan-out and reply merging
///
/// A multi-key request is split into single-key backend requests, each of
/// which completes independently. Replies are stored by argument position so
/// the merged reply never depends on completion order.
use bytes::{Bytes, BytesMut};

use crate::protocol::resp::{Message, RespEncoder, RespParser};
use crate::protocol::reply;

/// Merge semantics of a multi-key command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiKind {
    /// Array of every per-key reply
    Get,
    /// `+OK` only when every pair was stored
    Set,
    /// Sum of deleted counts
    Del,
}

impl MultiKind {
    fn sub_command(&self) -> &'static [u8] {
        match self {
            MultiKind::Get => b"GET",
            MultiKind::Set => b"SET",
            MultiKind::Del => b"DEL",
        }
    }

    /// Arguments consumed per key
    fn stride(&self) -> usize {
        match self {
            MultiKind::Set => 2,
            _ => 1,
        }
    }
}

/// One single-key request carved out of a multi-key one
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub index: usize,
    pub key: Bytes,
    pub request: Bytes,
}

/// Number of keys a multi-key request names; zero means an arity error
pub fn key_count(kind: MultiKind, request: &Message) -> usize {
    request.token_count().saturating_sub(1) / kind.stride()
}

/// Split `request` into one backend request per key. An odd trailing MSET
/// argument is ignored.
pub fn split(kind: MultiKind, request: &Message) -> Vec<SubRequest> {
    let count = key_count(kind, request);
    let stride = kind.stride();
    let mut subs = Vec::with_capacity(count);

    for index in 0..count {
        let first = 1 + index * stride;
        let key = request.token(first).unwrap_or_default();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(1 + stride);
        parts.push(kind.sub_command());
        for offset in 0..stride {
            parts.push(request.token(first + offset).unwrap_or_default());
        }
        subs.push(SubRequest {
            index,
            key: Bytes::copy_from_slice(key),
            request: RespEncoder::encode_command(&parts),
        });
    }
    subs
}

/// Per-command completion state. Completes once every position has a reply.
#[derive(Debug)]
pub struct Aggregation {
    kind: MultiKind,
    replies: Vec<Option<Bytes>>,
    completed: usize,
}

impl Aggregation {
    pub fn new(kind: MultiKind, count: usize) -> Self {
        Self {
            kind,
            replies: vec![None; count],
            completed: 0,
        }
    }

    pub fn target(&self) -> usize {
        self.replies.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.replies.len()
    }

    /// Record the reply for `index`. Returns true when this completion
    /// finished the aggregation. Duplicate or out-of-range completions are
    /// ignored.
    pub fn complete(&mut self, index: usize, reply: Bytes) -> bool {
        match self.replies.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(reply);
                self.completed += 1;
                self.is_complete()
            }
            _ => false,
        }
    }

    /// Build the client reply. Positions that never completed count as
    /// request errors.
    pub fn merge(self) -> Bytes {
        let kind = self.kind;
        let replies: Vec<Bytes> = self
            .replies
            .into_iter()
            .map(|slot| slot.unwrap_or_else(reply::unavailable))
            .collect();

        match kind {
            MultiKind::Get => {
                let mut buf = BytesMut::with_capacity(16 + replies.iter().map(Bytes::len).sum::<usize>());
                RespEncoder::array_header_into(&mut buf, replies.len());
                for r in &replies {
                    buf.extend_from_slice(r);
                }
                buf.freeze()
            }
            MultiKind::Set => replies
                .into_iter()
                .find(|r| !is_ok(r))
                .unwrap_or_else(|| Bytes::from_static(reply::OK)),
            MultiKind::Del => {
                let total: i64 = replies.iter().map(integer).sum();
                let mut buf = BytesMut::with_capacity(24);
                RespEncoder::integer_into(&mut buf, total);
                buf.freeze()
            }
        }
    }
}

fn is_ok(reply: &Bytes) -> bool {
    matches!(RespParser::parse(reply), Ok(Some((message, _))) if message.is_ok())
}

/// Integer value of a reply; anything else contributes zero
fn integer(reply: &Bytes) -> i64 {
    match RespParser::parse(reply) {
        Ok(Some((message, _))) => message.integer().unwrap_or(0),
        _ => 0,
    }
}
