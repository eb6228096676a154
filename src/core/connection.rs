use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::cluster::NodeAddress;
use crate::proto::codec::{self, Decoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

use super::multiplexed::MultiplexedConnection;

const READ_CHUNK: usize = 4096;

/// Read half of a RESP connection.
///
/// Buffers partial reads until the decoder sees a complete frame.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: Decoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps the read half of a stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: Decoder::new(),
        }
    }

    /// Reads the next complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the peer closed the connection or the read
    /// failed, and [`Error::Protocol`] on malformed input.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(frame);
            }
            self.buf.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::broken_pipe("connection closed by peer"));
            }
        }
    }
}

/// Write half of a RESP connection.
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps the write half of a stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Encodes and flushes one frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        codec::encode(frame, &mut self.buf);
        let data = self.buf.split();
        self.inner.write_all(&data).await?;
        self.inner.flush().await
    }
}

/// Opens a TCP connection to `address` and wraps it in a multiplexed handle.
///
/// # Errors
///
/// Returns [`Error::Io`] if the connect fails or does not finish within
/// `timeout`.
pub async fn connect(address: &NodeAddress, timeout: Duration) -> Result<MultiplexedConnection> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address.to_string()))
        .await
        .map_err(|_| Error::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", address),
            ),
        })??;
    stream.set_nodelay(true)?;
    Ok(MultiplexedConnection::new(stream, address.clone()))
}
