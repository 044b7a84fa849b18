//! Response writers for server streams.
//!
//! [`ResponseWriter`] is the capability a [`ServerStream`](crate::ServerStream)
//! writes through. [`response_channel`] provides one that produces an
//! [`http::Response`] for any hyper-compatible server.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use rerpc_core::BoxError;
use tokio::sync::{mpsc, oneshot};

/// Where a server stream writes its response.
///
/// The head (status and headers) is committed by the first `write_header`,
/// `write` or `flush`; header changes after that are ignored. Trailers are
/// sent once the writer is dropped.
pub trait ResponseWriter: Send + 'static {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn trailers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the head with `status`. Ignored once the head is committed.
    fn write_header(&mut self, status: StatusCode);

    /// Write body bytes, committing the head with 200 if needed.
    fn write(&mut self, data: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Push buffered output to the client. Writers that don't buffer keep
    /// the default no-op.
    fn flush(&mut self) {}
}

/// The client stopped reading the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("response body receiver dropped")]
pub struct ResponseClosed;

type TrailerSlot = Arc<Mutex<Option<HeaderMap>>>;

/// Create a writer and a receiver for the response it commits.
///
/// `buffer` is how many body chunks may be queued before `write` waits.
pub fn response_channel(
    buffer: usize,
) -> (ChannelWriter, oneshot::Receiver<http::Response<ResponseBody>>) {
    let (head_tx, head_rx) = oneshot::channel();
    let (data_tx, data_rx) = mpsc::channel(buffer.max(1));
    let trailers = TrailerSlot::default();
    let body = ResponseBody {
        data: data_rx,
        trailers: trailers.clone(),
    };
    let writer = ChannelWriter {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        trailers: HeaderMap::new(),
        pending: Some((head_tx, body)),
        data: data_tx,
        trailer_slot: trailers,
    };
    (writer, head_rx)
}

/// [`ResponseWriter`] backed by channels; see [`response_channel`].
pub struct ChannelWriter {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    /// Head sender and body, until the head is committed.
    pending: Option<(oneshot::Sender<http::Response<ResponseBody>>, ResponseBody)>,
    data: mpsc::Sender<Bytes>,
    trailer_slot: TrailerSlot,
}

impl ChannelWriter {
    pub fn is_committed(&self) -> bool {
        self.pending.is_none()
    }

    fn commit(&mut self) {
        let Some((head, body)) = self.pending.take() else {
            return;
        };
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        if head.send(response).is_err() {
            tracing::debug!("response receiver dropped before the head was committed");
        }
    }
}

impl ResponseWriter for ChannelWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    fn write_header(&mut self, status: StatusCode) {
        if !self.is_committed() {
            self.status = status;
            self.commit();
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<(), BoxError> {
        self.commit();
        self.data.send(data).await.map_err(|_| ResponseClosed.into())
    }

    fn flush(&mut self) {
        self.commit();
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.commit();
        let trailers = std::mem::take(&mut self.trailers);
        if !trailers.is_empty() {
            *self
                .trailer_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(trailers);
        }
        // `data` is dropped after this, ending the body.
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("status", &self.status)
            .field("committed", &self.is_committed())
            .finish_non_exhaustive()
    }
}

/// Body of a response produced by a [`ChannelWriter`]: the written chunks,
/// then the trailers.
pub struct ResponseBody {
    data: mpsc::Receiver<Bytes>,
    trailers: TrailerSlot,
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.data.poll_recv(cx) {
            Poll::Ready(Some(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(None) => {
                let trailers = self
                    .trailers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}
