//! Synchronous in-memory pipe feeding a streaming request body.
//!
//! Each [`PipeWriter::write`] hands one chunk to the [`PipeReader`] and waits
//! until the HTTP transport has taken it, so the caller's `send` applies
//! backpressure all the way to the connection. The read side can be closed
//! from outside (when the call fails), which unblocks a pending writer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame};
use rerpc_core::BoxError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Error returned by a write or read on a pipe whose other end is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("read/write on closed pipe")]
pub struct ClosedPipe;

struct Chunk {
    data: Bytes,
    consumed: oneshot::Sender<()>,
}

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(1);
    let closed = CancellationToken::new();
    (
        PipeWriter {
            tx: Some(tx),
            closed: closed.clone(),
        },
        PipeReader { rx, closed },
    )
}

/// Write end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Chunk>>,
    closed: CancellationToken,
}

impl PipeWriter {
    /// Write one chunk and wait until the reader has taken it.
    pub async fn write(&self, data: Bytes) -> Result<(), ClosedPipe> {
        let tx = self.tx.as_ref().ok_or(ClosedPipe)?;
        let (consumed, taken) = oneshot::channel();

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ClosedPipe),
            sent = tx.send(Chunk { data, consumed }) => sent.map_err(|_| ClosedPipe)?,
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ClosedPipe),
            ack = taken => ack.map_err(|_| ClosedPipe),
        }
    }

    /// Close the write end; the reader sees end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none() || self.closed.is_cancelled()
    }
}

/// Read end of a [`pipe`], usable as an HTTP request body.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Chunk>,
    closed: CancellationToken,
}

impl PipeReader {
    /// Handle that closes this reader, failing pending and future writes.
    pub fn closer(&self) -> PipeCloser {
        PipeCloser(self.closed.clone())
    }
}

/// Closes the read end of a [`pipe`] from outside the body.
#[derive(Clone, Debug)]
pub struct PipeCloser(CancellationToken);

impl PipeCloser {
    pub fn close(&self) {
        self.0.cancel();
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl Body for PipeReader {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.closed.is_cancelled() {
            return Poll::Ready(Some(Err(ClosedPipe.into())));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                // The writer may have given up already.
                let _ = chunk.consumed.send(());
                Poll::Ready(Some(Ok(Frame::data(chunk.data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        // Writers blocked on a dropped body must not wait forever.
        self.closed.cancel();
    }
}
