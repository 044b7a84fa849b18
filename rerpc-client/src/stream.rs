//! Client side of a streaming call.
//!
//! The outgoing request body is the read end of a [`pipe`](crate::pipe::pipe),
//! so the caller can start sending messages before the server has answered.
//! A background task builds the request, hands it to the [`Doer`] and
//! validates the response head. Once it is done it fires a ready signal,
//! after which the response (or the call's terminal error) is frozen.

use std::sync::{Arc, Mutex, PoisonError};

use http::header::{CONTENT_TYPE, TE};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use rerpc_core::{
    ACCEPT_ENCODING_VALUE, AnyError, BodyReader, BoxError, CallContext, Code, Error,
    GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_TIMEOUT, Marshaler, Message, Stream,
    TYPE_DEFAULT_GRPC, Unmarshaler, discard, encode_timeout, extract_error,
    negotiate_compression,
};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;

use crate::config::ClientStreamConfig;
use crate::pipe::{PipeCloser, PipeReader, PipeWriter, pipe};
use crate::transport::Doer;

/// The response body and the unmarshaler reading it.
struct ResponseStream {
    reader: BodyReader,
    unmarshaler: Unmarshaler,
}

/// Outcome of the dispatch task, published once.
#[derive(Default)]
struct Shared {
    response_err: Mutex<Option<Error>>,
    response: Mutex<Option<ResponseStream>>,
}

impl Shared {
    fn response_err(&self) -> Option<Error> {
        self.response_err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record `err` unless an error is already recorded; returns the
    /// recorded error.
    fn set_response_err(&self, err: Error) -> Error {
        self.response_err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(err)
            .clone()
    }

    fn set_response(&self, response: ResponseStream) {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
    }

    fn take_response(&self) -> Option<ResponseStream> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_resolved(&self) -> bool {
        self.response_err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
            || self
                .response
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }
}

/// Fires the ready signal when the dispatch task ends, however it ends.
struct ReadyGuard {
    shared: Arc<Shared>,
    ready: watch::Sender<bool>,
    closer: PipeCloser,
}

impl ReadyGuard {
    fn fail(&self, err: Error) {
        tracing::debug!(code = %err.code(), error = %err, "rpc failed");
        self.shared.set_response_err(err);
        // Pending and future writes now fail and pick up the error above.
        self.closer.close();
    }
}

impl Drop for ReadyGuard {
    fn drop(&mut self) {
        if !self.shared.is_resolved() {
            self.fail(Error::internal("request task ended without a response"));
        }
        self.ready.send_replace(true);
    }
}

struct SendSide {
    writer: PipeWriter,
    marshaler: Marshaler,
}

#[derive(Default)]
struct RecvSide {
    /// Whether the response was taken from [`Shared`].
    loaded: bool,
    response: Option<ResponseStream>,
}

/// A gRPC client stream over HTTP.
///
/// Send-side and receive-side calls may run concurrently from different
/// tasks through an `Arc<ClientStream>`.
///
/// # Example
///
/// ```ignore
/// let ctx = CallContext::new()
///     .with_timeout(Duration::from_secs(5))
///     .with_call_meta(Arc::new(CallMeta::default()));
/// let stream = ClientStream::new(ctx, transport, uri, ClientStreamConfig::default()).await;
///
/// stream.send(&request).await?;
/// stream.close_send(None).await?;
/// while let Some(reply) = stream.receive::<Reply>().await? {
///     println!("{reply:?}");
/// }
/// stream.close_receive().await?;
/// ```
pub struct ClientStream {
    ctx: CallContext,
    send: tokio::sync::Mutex<SendSide>,
    recv: tokio::sync::Mutex<RecvSide>,
    shared: Arc<Shared>,
    ready: watch::Receiver<bool>,
    task: AbortHandle,
}

impl ClientStream {
    /// Start a call to `uri`.
    ///
    /// Returns once the request has been built and handed off for dispatch,
    /// or once dispatch failed; failures surface from `send` and `receive`.
    pub async fn new<D: Doer>(
        ctx: CallContext,
        doer: Arc<D>,
        uri: Uri,
        config: ClientStreamConfig,
    ) -> Self {
        let (writer, body) = pipe();
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready) = watch::channel(false);
        let (prepared_tx, prepared) = oneshot::channel();

        let guard = ReadyGuard {
            shared: shared.clone(),
            ready: ready_tx,
            closer: body.closer(),
        };
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            match dispatch(task_ctx.clone(), doer, uri, config, body, prepared_tx).await {
                Ok(response) => guard.shared.set_response(response),
                Err(err) => guard.fail(err),
            }
            let closer = guard.closer.clone();
            drop(guard);

            // The request body lives as long as the call's context.
            task_ctx.done().await;
            closer.close();
        });

        // An error here means dispatch failed before the request was built.
        let _ = prepared.await;

        Self {
            ctx,
            send: tokio::sync::Mutex::new(SendSide {
                writer,
                marshaler: Marshaler::new(TYPE_DEFAULT_GRPC, config.is_gzip_request()),
            }),
            recv: tokio::sync::Mutex::new(RecvSide::default()),
            shared,
            ready,
            task: task.abort_handle(),
        }
    }

    async fn wait_ready(&self) {
        let mut ready = self.ready.clone();
        // The guard always sends `true` before the sender is dropped.
        let _ = ready.wait_for(|ready| *ready).await;
    }
}

impl ClientStream {
    /// Record the context's terminal error, if it has ended.
    fn context_err(&self) -> Option<Error> {
        self.ctx
            .err()
            .map(|reason| self.shared.set_response_err(reason.into()))
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("ready", &*self.ready.borrow())
            .field("response_err", &self.shared.response_err())
            .finish_non_exhaustive()
    }
}

impl Stream for ClientStream {
    fn context(&self) -> &CallContext {
        &self.ctx
    }

    async fn send<M: Message>(&self, msg: &M) -> Result<(), Error> {
        let send = self.send.lock().await;
        let data = send.marshaler.marshal(msg)?;
        match send.writer.write(data).await {
            Ok(()) => Ok(()),
            Err(closed) => {
                // The dispatch task closed the pipe; report why.
                self.wait_ready().await;
                Err(self
                    .shared
                    .response_err()
                    .or_else(|| self.context_err())
                    .unwrap_or_else(|| Error::wrap(Code::Unknown, closed)))
            }
        }
    }

    async fn close_send(&self, _err: Option<AnyError>) -> Result<(), Error> {
        self.send.lock().await.writer.close();
        Ok(())
    }

    async fn receive<M: Message>(&self) -> Result<Option<M>, Error> {
        self.wait_ready().await;
        if let Some(err) = self.shared.response_err() {
            return Err(err);
        }

        let mut recv = self.recv.lock().await;
        let recv = &mut *recv;
        if !recv.loaded {
            recv.loaded = true;
            recv.response = self.shared.take_response();
        }
        let Some(response) = recv.response.as_mut() else {
            return Err(self
                .shared
                .set_response_err(Error::internal("no response available")));
        };

        let outcome = tokio::select! {
            biased;
            reason = self.ctx.done() => {
                return Err(self.shared.set_response_err(reason.into()));
            }
            outcome = response.unmarshaler.unmarshal(&mut response.reader) => outcome,
        };
        match outcome {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => match response.reader.trailers().and_then(extract_error) {
                Some(err) => Err(self.shared.set_response_err(err)),
                None => Ok(None),
            },
            Err(err) => {
                // Trailers carry the server's reason, which beats ours.
                if !drain(&self.ctx, &mut response.reader).await {
                    return Err(self
                        .context_err()
                        .unwrap_or_else(|| self.shared.set_response_err(err)));
                }
                let err = response
                    .reader
                    .trailers()
                    .and_then(extract_error)
                    .unwrap_or(err);
                Err(self.shared.set_response_err(err))
            }
        }
    }

    async fn close_receive(&self) -> Result<(), Error> {
        self.wait_ready().await;

        let mut recv = self.recv.lock().await;
        let recv = &mut *recv;
        if !recv.loaded {
            recv.loaded = true;
            recv.response = self.shared.take_response();
        }
        let Some(response) = recv.response.as_mut() else {
            // The call failed before a response existed.
            return Ok(());
        };
        drain(&self.ctx, &mut response.reader).await;
        response.reader.close()
    }
}

/// Drain `reader` unless the context ends first. Returns `false` if it did.
async fn drain(ctx: &CallContext, reader: &mut BodyReader) -> bool {
    tokio::select! {
        biased;
        _ = ctx.done() => false,
        _ = discard(reader) => true,
    }
}

/// Classify a failure that may have been caused by the context.
fn context_error(ctx: &CallContext, err: BoxError) -> Error {
    match ctx.err() {
        Some(reason) => Error::wrap_boxed(reason.code(), err),
        None => Error::wrap_boxed(Code::Unknown, err),
    }
}

fn insert_default(headers: &mut HeaderMap, name: &'static str, value: &'static str) {
    if !headers.contains_key(name) {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

async fn dispatch<D: Doer>(
    ctx: CallContext,
    doer: Arc<D>,
    uri: Uri,
    config: ClientStreamConfig,
    body: PipeReader,
    prepared: oneshot::Sender<()>,
) -> Result<ResponseStream, Error> {
    let meta = ctx
        .call_meta()
        .cloned()
        .ok_or_else(|| Error::internal("no call metadata available on context"))?;

    let mut headers = meta.request_headers().clone();
    if let Some(remaining) = ctx.remaining() {
        if remaining.is_zero() {
            return Err(Error::deadline_exceeded(format!(
                "no time to make RPC: timeout is {remaining:?}"
            )));
        }
        // Durations this far out don't fit the header; send no hint.
        if let Ok(timeout) = encode_timeout(remaining) {
            if let Ok(value) = HeaderValue::try_from(timeout) {
                headers.insert(GRPC_TIMEOUT, value);
            }
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TYPE_DEFAULT_GRPC));
    }
    headers.insert(TE, HeaderValue::from_static("trailers"));
    insert_default(&mut headers, GRPC_ACCEPT_ENCODING, ACCEPT_ENCODING_VALUE);
    if config.is_gzip_request() {
        headers.insert(GRPC_ENCODING, HeaderValue::from_static("gzip"));
    }

    let mut request = http::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(body)
        .map_err(|e| Error::wrap(Code::Internal, e))?;
    *request.headers_mut() = headers;

    if let Some(reason) = ctx.err() {
        return Err(reason.into());
    }
    // Let the constructor return; `send` can write from now on.
    let _ = prepared.send(());

    tracing::trace!(uri = %request.uri(), "dispatching request");
    let response = tokio::select! {
        biased;
        reason = ctx.done() => return Err(reason.into()),
        result = doer.execute(request) => result.map_err(|err| context_error(&ctx, err))?,
    };

    // Published before validation so callers can inspect them on failure.
    meta.set_response_headers(response.headers().clone());

    if response.status() != StatusCode::OK {
        let code = Code::from_http_status(response.status()).unwrap_or(Code::Unknown);
        return Err(Error::new(code, format!("HTTP status {}", response.status())));
    }
    let encoding = response
        .headers()
        .get(GRPC_ENCODING)
        .map(|value| String::from_utf8_lossy(value.as_bytes()));
    negotiate_compression(encoding.as_deref())?;
    // Trailers-only responses carry the status in the headers.
    if let Some(err) = extract_error(response.headers()) {
        return Err(err);
    }

    Ok(ResponseStream {
        reader: BodyReader::from_boxed(response.into_body()),
        unmarshaler: Unmarshaler::new(TYPE_DEFAULT_GRPC, config.message_limits()),
    })
}
