//! End-to-end tests of `ClientStream` against an in-process `ServerStream`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use rerpc::{ChannelWriter, ServerStream, ServerStreamConfig, response_channel};
use rerpc_client::{ClientStream, ClientStreamConfig, Doer, RequestBody};
use rerpc_core::{
    BoxBody, BoxError, CallContext, CallMeta, Code, Error, GRPC_ENCODING, MessageLimits, Stream,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct Ping {
    #[prost(string, tag = "1")]
    text: String,
}

fn ping(text: &str) -> Ping {
    Ping { text: text.into() }
}

type Handler = Box<dyn Fn(ServerStream<ChannelWriter>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Serves each request with a `ServerStream` running `handler`.
struct Loopback {
    handler: Handler,
    config: ServerStreamConfig,
    calls: AtomicUsize,
}

impl Loopback {
    fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ServerStream<ChannelWriter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            handler: Box::new(move |stream| handler(stream).boxed()),
            config: ServerStreamConfig::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn config(mut self, config: ServerStreamConfig) -> Self {
        self.config = config;
        self
    }
}

impl Doer for Loopback {
    async fn execute(
        &self,
        request: http::Request<RequestBody>,
    ) -> Result<http::Response<BoxBody>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (writer, head) = response_channel(4);
        let stream = ServerStream::from_request(request, writer, self.config);
        tokio::spawn((self.handler)(stream));
        let response = head.await?;
        Ok(response.map(|body| body.map_err(Into::into).boxed_unsync()))
    }
}

/// Answers every request with a fixed response.
struct Canned {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Canned {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn header(self, name: &'static str, value: &'static str) -> Self {
        self.raw_header(name, HeaderValue::from_static(value))
    }

    fn raw_header(mut self, name: &'static str, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Doer for Canned {
    async fn execute(
        &self,
        _request: http::Request<RequestBody>,
    ) -> Result<http::Response<BoxBody>, BoxError> {
        let body = Full::new(self.body.clone()).map_err(Into::into).boxed_unsync();
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        Ok(response)
    }
}

async fn echo(stream: ServerStream<ChannelWriter>) {
    while let Ok(Some(msg)) = stream.receive::<Ping>().await {
        if stream.send(&msg).await.is_err() {
            break;
        }
    }
    let _ = stream.close_send(None).await;
}

fn call_ctx() -> (CallContext, Arc<CallMeta>) {
    let meta = Arc::new(CallMeta::default());
    (CallContext::new().with_call_meta(meta.clone()), meta)
}

fn uri() -> http::Uri {
    http::Uri::from_static("http://localhost/test.v1.PingService/Ping")
}

#[tokio::test]
async fn test_bidi_echo() {
    let doer = Arc::new(Loopback::new(echo));
    let (ctx, meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer.clone(), uri(), ClientStreamConfig::default()).await;

    stream.send(&ping("one")).await.unwrap();
    assert_eq!(stream.receive::<Ping>().await.unwrap().unwrap().text, "one");
    stream.send(&ping("two")).await.unwrap();
    assert_eq!(stream.receive::<Ping>().await.unwrap().unwrap().text, "two");

    stream.close_send(None).await.unwrap();
    assert!(stream.receive::<Ping>().await.unwrap().is_none());
    stream.close_receive().await.unwrap();

    assert_eq!(doer.calls.load(Ordering::SeqCst), 1);
    let headers = meta.response_headers().unwrap();
    assert_eq!(headers[http::header::CONTENT_TYPE], "application/grpc");
    assert!(!headers.contains_key(GRPC_ENCODING));
}

#[tokio::test]
async fn test_server_streams_many_replies() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        let Ok(Some(req)) = stream.receive::<Ping>().await else {
            return;
        };
        for i in 0..3 {
            let _ = stream.send(&ping(&format!("{}-{i}", req.text))).await;
        }
        let _ = stream.close_send(None).await;
    }));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    stream.send(&ping("n")).await.unwrap();
    stream.close_send(None).await.unwrap();

    let mut replies = Vec::new();
    while let Some(reply) = stream.receive::<Ping>().await.unwrap() {
        replies.push(reply.text);
    }
    assert_eq!(replies, ["n-0", "n-1", "n-2"]);
}

#[tokio::test]
async fn test_gzip_both_directions() {
    let doer = Arc::new(
        Loopback::new(echo).config(ServerStreamConfig::default().gzip_response(true)),
    );
    let (ctx, meta) = call_ctx();
    let config = ClientStreamConfig::default().gzip_request(true);
    let stream = ClientStream::new(ctx, doer, uri(), config).await;

    let text = "compress me ".repeat(64);
    stream.send(&ping(&text)).await.unwrap();
    assert_eq!(stream.receive::<Ping>().await.unwrap().unwrap().text, text);
    stream.close_send(None).await.unwrap();
    assert!(stream.receive::<Ping>().await.unwrap().is_none());

    assert_eq!(meta.response_headers().unwrap()[GRPC_ENCODING], "gzip");
}

#[tokio::test]
async fn test_trailer_error_is_replayed() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        let _ = stream.receive::<Ping>().await;
        let err = Error::not_found("no such ping");
        let _ = stream.close_send(Some(err.into())).await;
    }));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    stream.send(&ping("where")).await.unwrap();
    stream.close_send(None).await.unwrap();

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), Some("no such ping"));

    let again = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(again.code(), Code::NotFound);
    assert_eq!(again.message(), Some("no such ping"));
    stream.close_receive().await.unwrap();
}

#[tokio::test]
async fn test_response_too_large() {
    let doer = Arc::new(Loopback::new(echo));
    let (ctx, _meta) = call_ctx();
    let config = ClientStreamConfig::default().limits(MessageLimits::new(16));
    let stream = ClientStream::new(ctx, doer, uri(), config).await;

    stream.send(&ping(&"x".repeat(64))).await.unwrap();
    stream.close_send(None).await.unwrap();
    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn test_trailer_error_beats_local_decode_error() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        let _ = stream.receive::<Ping>().await;
        let _ = stream.send(&ping(&"x".repeat(64))).await;
        let err = Error::new(Code::DataLoss, "disk gone");
        let _ = stream.close_send(Some(err.into())).await;
    }));
    let (ctx, _meta) = call_ctx();
    let config = ClientStreamConfig::default().limits(MessageLimits::new(16));
    let stream = ClientStream::new(ctx, doer, uri(), config).await;

    stream.send(&ping("big please")).await.unwrap();
    stream.close_send(None).await.unwrap();
    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::DataLoss);
    assert_eq!(err.message(), Some("disk gone"));
}

#[tokio::test]
async fn test_deadline_ends_receive_after_headers() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        if let Ok(Some(msg)) = stream.receive::<Ping>().await {
            let _ = stream.send(&msg).await;
        }
        // Stall with the response open.
        std::future::pending::<()>().await;
    }));
    let meta = Arc::new(CallMeta::default());
    let ctx = CallContext::new()
        .with_call_meta(meta)
        .with_timeout(Duration::from_millis(200));
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    stream.send(&ping("hi")).await.unwrap();
    assert_eq!(stream.receive::<Ping>().await.unwrap().unwrap().text, "hi");

    let err = tokio::time::timeout(Duration::from_secs(3), stream.receive::<Ping>())
        .await
        .expect("receive outlived the deadline")
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    // The deadline is the call's terminal error from now on.
    let again = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(again.code(), Code::DeadlineExceeded);
    let err = stream.send(&ping("late")).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    stream.close_receive().await.unwrap();
}

#[tokio::test]
async fn test_cancel_unblocks_pending_send() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        // Answer without ever reading the request body.
        let _ = stream.send(&ping("early")).await;
        std::future::pending::<()>().await;
    }));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx.clone(), doer, uri(), ClientStreamConfig::default()).await;
    assert_eq!(stream.receive::<Ping>().await.unwrap().unwrap().text, "early");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
    });
    let err = tokio::time::timeout(Duration::from_secs(3), stream.send(&ping("unread")))
        .await
        .expect("send outlived cancellation")
        .unwrap_err();
    assert_eq!(err.code(), Code::Canceled);

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Canceled);
}

#[tokio::test]
async fn test_expired_deadline_never_dispatches() {
    let doer = Arc::new(Loopback::new(echo));
    let meta = Arc::new(CallMeta::default());
    let ctx = CallContext::new()
        .with_call_meta(meta)
        .with_timeout(Duration::ZERO);
    let stream = ClientStream::new(ctx, doer.clone(), uri(), ClientStreamConfig::default()).await;

    let err = stream.send(&ping("late")).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert_eq!(doer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deadline_is_propagated() {
    let doer = Arc::new(Loopback::new(|stream: ServerStream<ChannelWriter>| async move {
        let text = match stream.context().remaining() {
            Some(remaining) if remaining <= Duration::from_secs(30) => "bounded",
            Some(_) => "too long",
            None => "none",
        };
        let _ = stream.receive::<Ping>().await;
        let _ = stream.send(&ping(text)).await;
        let _ = stream.close_send(None).await;
    }));
    let meta = Arc::new(CallMeta::default());
    let ctx = CallContext::new()
        .with_call_meta(meta)
        .with_timeout(Duration::from_secs(30));
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    stream.send(&ping("deadline?")).await.unwrap();
    assert_eq!(
        stream.receive::<Ping>().await.unwrap().unwrap().text,
        "bounded"
    );
}

#[tokio::test]
async fn test_cancel_while_waiting_for_response() {
    let doer = Arc::new(Loopback::new(echo));
    let token = CancellationToken::new();
    let (ctx, _meta) = call_ctx();
    let ctx = ctx.with_cancellation_token(token.clone());
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    // The echo server never answers before the first message.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Canceled);
}

#[tokio::test]
async fn test_missing_call_meta() {
    let doer = Arc::new(Loopback::new(echo));
    let stream =
        ClientStream::new(CallContext::new(), doer.clone(), uri(), ClientStreamConfig::default())
            .await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.message(), Some("no call metadata available on context"));
    // No response was ever produced, so there is nothing to close.
    stream.close_receive().await.unwrap();
    assert_eq!(doer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_http_status_maps_to_code() {
    let doer = Arc::new(Canned::new(StatusCode::NOT_FOUND).header("x-served-by", "edge"));
    let (ctx, meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    // Headers are published even for failed calls.
    assert_eq!(meta.response_headers().unwrap()["x-served-by"], "edge");
}

#[tokio::test]
async fn test_unmapped_http_status_is_unknown() {
    let doer = Arc::new(Canned::new(StatusCode::IM_A_TEAPOT));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Unknown);
}

#[tokio::test]
async fn test_unsupported_response_encoding() {
    let doer = Arc::new(Canned::new(StatusCode::OK).header("grpc-encoding", "br"));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().unwrap().contains("identity, gzip"));
}

#[tokio::test]
async fn test_non_ascii_response_encoding_rejected() {
    let value = HeaderValue::from_bytes(b"gz\xffip").unwrap();
    let doer = Arc::new(Canned::new(StatusCode::OK).raw_header("grpc-encoding", value));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().unwrap().contains("identity, gzip"));
}

#[tokio::test]
async fn test_trailers_only_error() {
    let doer = Arc::new(
        Canned::new(StatusCode::OK)
            .header("grpc-status", "7")
            .header("grpc-message", "go%20away"),
    );
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    let err = stream.receive::<Ping>().await.unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(err.message(), Some("go away"));
    stream.close_receive().await.unwrap();
}

#[tokio::test]
async fn test_send_after_failure_reports_cause() {
    let doer = Arc::new(Canned::new(StatusCode::SERVICE_UNAVAILABLE));
    let (ctx, _meta) = call_ctx();
    let stream = ClientStream::new(ctx, doer, uri(), ClientStreamConfig::default()).await;

    // The canned server never reads the body, so the write fails once the
    // call has failed.
    let err = stream.send(&ping("anyone?")).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}
