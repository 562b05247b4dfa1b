/// Per-client connection state machine
///
/// Reads bytes, answers every complete request in arrival order, then
/// writes the batch of replies before reading again. Malformed input gets
/// one protocol error reply and closes the connection.
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::CancelaResult;
use crate::protocol::reply;
use crate::protocol::resp::{MessageKind, RespError, RespParser};
use crate::proxy::Proxy;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Where a session stands after draining its receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    NeedMore,
    Close,
}

pub struct ClientSession<S> {
    id: String,
    stream: S,
    proxy: Arc<Proxy>,
    incoming: BytesMut,
    outgoing: BytesMut,
    authenticated: bool,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: impl Into<String>, stream: S, proxy: Arc<Proxy>) -> Self {
        let authenticated = !proxy.requires_auth();
        Self {
            id: id.into(),
            stream,
            proxy,
            incoming: BytesMut::with_capacity(READ_BUFFER_SIZE),
            outgoing: BytesMut::new(),
            authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Serve the connection until the client leaves or sends garbage
    pub async fn run(mut self) -> CancelaResult<()> {
        loop {
            let drain = self.drain().await;
            if !self.outgoing.is_empty() {
                self.stream.write_all(&self.outgoing).await?;
                self.stream.flush().await?;
                self.outgoing.clear();
            }
            if drain == Drain::Close {
                debug!("Client {} closed after protocol error", self.id);
                return Ok(());
            }

            if self.stream.read_buf(&mut self.incoming).await? == 0 {
                debug!("Client {} disconnected", self.id);
                return Ok(());
            }
        }
    }

    /// Answer every complete request sitting in the receive buffer
    async fn drain(&mut self) -> Drain {
        while !self.incoming.is_empty() {
            let len = match RespParser::frame_len(&self.incoming) {
                Ok(Some(len)) => len,
                Ok(None) | Err(RespError::Incomplete) => return Drain::NeedMore,
                Err(RespError::Malformed { reason }) => {
                    debug!("Client {} sent malformed request: {}", self.id, reason);
                    self.outgoing.extend_from_slice(reply::PROTO_ERROR);
                    return Drain::Close;
                }
            };

            let frame = self.incoming.split_to(len).freeze();
            let request = match RespParser::parse(&frame) {
                Ok(Some((request, _))) => request,
                _ => {
                    self.outgoing.extend_from_slice(reply::PROTO_ERROR);
                    return Drain::Close;
                }
            };

            if request.kind() != MessageKind::Array || request.token_count() == 0 {
                self.outgoing.extend_from_slice(reply::PROTO_NOT_SUPPORT);
                continue;
            }

            let reply = self.proxy.dispatch(&request, &mut self.authenticated).await;
            self.outgoing.extend_from_slice(&reply);
        }

        Drain::NeedMore
    }
}
