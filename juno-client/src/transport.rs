//! # Transport
//!
//! Purpose: Open byte streams to the store and run one request/response
//! exchange over them.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` is the seam where socket setup lives;
//!    TLS or proxies plug in here without touching the pool or session.
//! 2. **Strict Exchange Order**: A request is fully written and flushed before
//!    its response is read, and the response must echo the request's opaque.
//! 3. **Buffer Reuse**: Each connection owns its read and write buffers.

use std::io;
use std::time::Instant;

use bytes::BytesMut;
use futures::future::BoxFuture;
use juno_common::{FrameError, OperationMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{JunoError, JunoResult};

/// Byte stream a connection runs over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens streams to `host:port` addresses.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>>;

    /// Whether streams from this connector are encrypted.
    fn is_secure(&self) -> bool {
        false
    }
}

/// Plain TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            // Requests are small; do not let Nagle hold them back.
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// One open stream plus its reusable buffers.
pub(crate) struct Connection {
    stream: BoxedStream,
    peer: String,
    opened_at: Instant,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    pub(crate) fn new(stream: BoxedStream, peer: String) -> Self {
        Connection {
            stream,
            peer,
            opened_at: Instant::now(),
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: BytesMut::with_capacity(1024),
        }
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Writes `request` and reads the matching response.
    ///
    /// The caller bounds this with the response timeout; a connection whose
    /// exchange did not complete must not be reused.
    pub(crate) async fn exchange(
        &mut self,
        request: &mut OperationMessage,
    ) -> JunoResult<OperationMessage> {
        self.write_buf.clear();
        request.write_buf(&mut self.write_buf)?;
        self.stream
            .write_all(&self.write_buf)
            .await
            .map_err(|err| JunoError::connection(&self.peer, err))?;
        self.stream
            .flush()
            .await
            .map_err(|err| JunoError::connection(&self.peer, err))?;

        let response = self.read_message().await?;
        if response.opaque() != request.opaque() {
            return Err(FrameError::OpaqueMismatch {
                expected: request.opaque(),
                got: response.opaque(),
            }
            .into());
        }
        Ok(response)
    }

    async fn read_message(&mut self) -> JunoResult<OperationMessage> {
        loop {
            if let Some(size) = OperationMessage::peek_size(&self.read_buf)? {
                if self.read_buf.len() >= size {
                    let frame = self.read_buf.split_to(size);
                    return Ok(OperationMessage::read_buf(&frame)?);
                }
                self.read_buf.reserve(size - self.read_buf.len());
            }

            let read = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|err| JunoError::connection(&self.peer, err))?;
            if read == 0 {
                return Err(JunoError::connection(
                    &self.peer,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use juno_common::{MetaField, OpCode, OpStatus};
    use tokio::io::duplex;

    use super::*;

    async fn serve_one(mut server: tokio::io::DuplexStream, opaque_shift: u32) {
        let mut buf = vec![0u8; 1024];
        let mut filled = 0;
        loop {
            let n = server.read(&mut buf[filled..]).await.unwrap();
            filled += n;
            if let Ok(Some(size)) = OperationMessage::peek_size(&buf[..filled]) {
                if filled >= size {
                    break;
                }
            }
        }
        let request = OperationMessage::read_buf(&buf[..filled]).unwrap();
        let mut response = OperationMessage::response_to(&request, OpStatus::Ok);
        response.header.opaque = request.opaque() + opaque_shift;
        response.meta.push(MetaField::Version(1));
        let bytes = response.to_bytes().unwrap();
        // Split the write to exercise partial reads.
        server.write_all(&bytes[..10]).await.unwrap();
        server.write_all(&bytes[10..]).await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_reads_matching_response() {
        let (client, server) = duplex(4096);
        tokio::spawn(serve_one(server, 0));

        let mut conn = Connection::new(Box::new(client), "duplex".into());
        let mut request = OperationMessage::request(OpCode::Get, 41);
        let response = conn.exchange(&mut request).await.unwrap();
        assert_eq!(response.opaque(), 41);
        assert_eq!(response.meta.version(), Some(1));
    }

    #[tokio::test]
    async fn test_exchange_rejects_foreign_opaque() {
        let (client, server) = duplex(4096);
        tokio::spawn(serve_one(server, 1));

        let mut conn = Connection::new(Box::new(client), "duplex".into());
        let mut request = OperationMessage::request(OpCode::Get, 7);
        let err = conn.exchange(&mut request).await.unwrap_err();
        assert!(matches!(
            err,
            JunoError::Frame(FrameError::OpaqueMismatch { expected: 7, got: 8 })
        ));
    }

    #[tokio::test]
    async fn test_exchange_reports_closed_peer() {
        let (client, server) = duplex(4096);
        drop(server);

        let mut conn = Connection::new(Box::new(client), "duplex".into());
        let mut request = OperationMessage::request(OpCode::Nop, 1);
        let err = conn.exchange(&mut request).await.unwrap_err();
        assert!(matches!(err, JunoError::Connection { .. }));
    }
}
