use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument};

use crate::cluster::NodeAddress;
use crate::proto::frame::Frame;
use crate::{Error, Result};

use super::connection::{FrameReader, FrameWriter};

const DEFAULT_QUEUE_SIZE: usize = 1024;

type Waiter = oneshot::Sender<Result<Frame>>;

/// A request sent to the multiplexer.
struct Request {
    frame: Frame,
    response_tx: Waiter,
}

/// A handle to a multiplexed connection with one cluster node.
///
/// The handle is cheap to clone. Replies are matched to requests in the
/// order they were written, which RESP guarantees per connection.
#[derive(Clone)]
pub struct MultiplexedConnection {
    sender: mpsc::Sender<Request>,
    address: NodeAddress,
}

impl MultiplexedConnection {
    /// Spawns the writer and reader tasks for `stream`.
    pub fn new<S>(stream: S, address: NodeAddress) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (request_tx, request_rx) = mpsc::channel(DEFAULT_QUEUE_SIZE);
        let (waiter_tx, waiter_rx) = mpsc::channel(DEFAULT_QUEUE_SIZE);

        tokio::spawn(run_writer(FrameWriter::new(write_half), request_rx, waiter_tx));
        tokio::spawn(run_reader(FrameReader::new(read_half), waiter_rx));

        Self {
            sender: request_tx,
            address,
        }
    }

    /// Returns the node this connection talks to.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Returns true once the background tasks have stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Sends a command frame and awaits its reply.
    ///
    /// Error replies come back as `Ok(Frame::Error(..))`; only transport
    /// problems surface as `Err`.
    #[instrument(skip(self, frame), fields(node = %self.address), level = "debug")]
    pub async fn send_command(&self, frame: Frame) -> Result<Frame> {
        let (response_tx, response_rx) = oneshot::channel();
        let request = Request { frame, response_tx };

        self.sender
            .send(request)
            .await
            .map_err(|_| Error::broken_pipe("connection closed"))?;

        response_rx
            .await
            .map_err(|_| Error::broken_pipe("connection closed"))?
    }
}

impl fmt::Debug for MultiplexedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedConnection")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_writer<W>(
    mut writer: FrameWriter<W>,
    mut request_rx: mpsc::Receiver<Request>,
    waiter_tx: mpsc::Sender<Waiter>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = request_rx.recv().await {
        debug!(?req.frame, "sending frame");
        if let Err(e) = writer.write_frame(&req.frame).await {
            error!(error = ?e, "failed to write frame");
            let _ = req.response_tx.send(Err(Error::Io { source: e }));
            return;
        }

        if waiter_tx.send(req.response_tx).await.is_err() {
            return;
        }
    }
}

async fn run_reader<R>(mut reader: FrameReader<R>, mut waiter_rx: mpsc::Receiver<Waiter>)
where
    R: AsyncRead + Unpin,
{
    while let Some(tx) = waiter_rx.recv().await {
        match reader.read_frame().await {
            Ok(frame) => {
                debug!(?frame, "received frame");
                let _ = tx.send(Ok(frame));
            }
            Err(e) => {
                error!(error = ?e, "failed to read frame");
                let _ = tx.send(Err(e));
                // The stream is unusable after a read error; dropping the
                // receiver fails every queued waiter.
                return;
            }
        }
    }
}
