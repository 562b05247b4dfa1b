/// Backend round trip
///
/// Sends the verbatim request bytes and accumulates the reply until the
/// parser reports one complete message. Works over any async byte stream so
/// it can be driven by a pooled TCP connection or by a scripted mock.
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{CancelaError, CancelaResult};
use crate::protocol::RespParser;

const READ_BUFFER_SIZE: usize = 4096;

/// Round trip progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Sending,
    AwaitingReply,
    Decoding,
    Done,
    Failed,
}

/// One request/reply exchange on a backend stream
pub struct BackendSession<'a, S> {
    stream: &'a mut S,
    state: SessionState,
    reply: BytesMut,
}

impl<'a, S> BackendSession<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            state: SessionState::Sending,
            reply: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the exchange and return the raw bytes of the backend reply.
    ///
    /// A peer close before the reply completes, an I/O error, or a malformed
    /// reply all fail the session; the caller decides whether the connection
    /// can be repaired.
    pub async fn execute(mut self, request: &[u8]) -> CancelaResult<Bytes> {
        match self.run(request).await {
            Ok(reply) => {
                self.state = SessionState::Done;
                Ok(reply)
            }
            Err(e) => {
                debug!("Backend session failed in {:?}: {}", self.state, e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    async fn run(&mut self, request: &[u8]) -> CancelaResult<Bytes> {
        self.stream.write_all(request).await?;
        self.stream.flush().await?;
        self.state = SessionState::AwaitingReply;

        loop {
            let n = self.stream.read_buf(&mut self.reply).await?;
            if n == 0 {
                return Err(CancelaError::backend("connection closed by backend"));
            }

            self.state = SessionState::Decoding;
            match RespParser::frame_len(&self.reply) {
                Ok(Some(len)) => {
                    trace!("Backend reply complete ({} bytes)", len);
                    return Ok(self.reply.split_to(len).freeze());
                }
                Ok(None) => self.state = SessionState::AwaitingReply,
                Err(e) => return Err(CancelaError::protocol(format!("backend reply: {}", e))),
            }
        }
    }
}
