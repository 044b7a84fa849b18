//! Server side of a streaming call.
//!
//! A router builds one [`ServerStream`] per inbound request. The content type
//! fixed at construction decides how `close_send` reports the handler's
//! outcome: gRPC writes status trailers, Twirp writes a JSON error body.

use bytes::Bytes;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use http_body::Body;
use rerpc_core::{
    AnyError, BodyReader, BoxError, CallContext, Code, Error, GRPC_ACCEPT_ENCODING,
    GRPC_ENCODING, Marshaler, Message, MessageLimits, Stream, TYPE_JSON, TwirpStatus,
    Unmarshaler, WireFormat, discard, header_str, set_grpc_status,
};

use crate::writer::ResponseWriter;

/// Settings for a [`ServerStream`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStreamConfig {
    limits: MessageLimits,
    gzip_response: bool,
}

impl ServerStreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum size of a single request message.
    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Gzip gRPC response messages when the client accepts gzip.
    pub fn gzip_response(mut self, enabled: bool) -> Self {
        self.gzip_response = enabled;
        self
    }

    pub fn message_limits(&self) -> MessageLimits {
        self.limits
    }

    pub fn is_gzip_response(&self) -> bool {
        self.gzip_response
    }
}

struct SendSide<W> {
    writer: W,
    marshaler: Marshaler,
}

struct RecvSide {
    reader: BodyReader,
    unmarshaler: Unmarshaler,
}

/// A stream serving one inbound call.
///
/// The response ends when the stream (and with it the writer) is dropped.
pub struct ServerStream<W> {
    ctx: CallContext,
    content_type: String,
    send: tokio::sync::Mutex<SendSide<W>>,
    recv: tokio::sync::Mutex<RecvSide>,
}

impl<W: ResponseWriter> ServerStream<W> {
    pub fn new(
        ctx: CallContext,
        mut writer: W,
        reader: BodyReader,
        content_type: impl Into<String>,
        config: ServerStreamConfig,
    ) -> Self {
        let content_type = content_type.into();
        let format = WireFormat::from_content_type(&content_type);
        let gzip = config.is_gzip_response() && format == Some(WireFormat::Grpc);

        if format.is_some() {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                writer.headers_mut().insert(CONTENT_TYPE, value);
            }
        }
        if gzip {
            writer
                .headers_mut()
                .insert(GRPC_ENCODING, HeaderValue::from_static("gzip"));
        }

        Self {
            ctx,
            send: tokio::sync::Mutex::new(SendSide {
                writer,
                marshaler: Marshaler::new(&content_type, gzip),
            }),
            recv: tokio::sync::Mutex::new(RecvSide {
                reader,
                unmarshaler: Unmarshaler::new(&content_type, config.message_limits()),
            }),
            content_type,
        }
    }

    /// Build a stream from an inbound request.
    ///
    /// The deadline comes from `grpc-timeout`. Responses are gzipped only if
    /// configured and the client lists `gzip` in `grpc-accept-encoding`.
    pub fn from_request<B>(request: http::Request<B>, writer: W, config: ServerStreamConfig) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let ctx = CallContext::from_request_headers(request.headers());
        let content_type = header_str(request.headers(), CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_string();
        let accepts_gzip = header_str(request.headers(), GRPC_ACCEPT_ENCODING)
            .is_some_and(|accepted| accepted.split(',').any(|enc| enc.trim() == "gzip"));
        let config = config.gzip_response(config.is_gzip_response() && accepts_gzip);

        Self::new(
            ctx,
            writer,
            BodyReader::new(request.into_body()),
            content_type,
            config,
        )
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl<W> std::fmt::Debug for ServerStream<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStream")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl<W: ResponseWriter> Stream for ServerStream<W> {
    fn context(&self) -> &CallContext {
        &self.ctx
    }

    async fn send<M: Message>(&self, msg: &M) -> Result<(), Error> {
        let mut send = self.send.lock().await;
        let send = &mut *send;
        let result = match send.marshaler.marshal(msg) {
            Ok(data) => send
                .writer
                .write(data)
                .await
                .map_err(|e| Error::wrap_boxed(Code::Unknown, e)),
            Err(err) => Err(err),
        };
        send.writer.flush();
        result
    }

    async fn close_send(&self, err: Option<AnyError>) -> Result<(), Error> {
        let mut send = self.send.lock().await;
        let result = match WireFormat::from_content_type(&self.content_type) {
            Some(format) if format.is_twirp() => {
                send_error_twirp(&mut send.writer, err.as_ref()).await
            }
            Some(_) => set_grpc_status(send.writer.trailers_mut(), err.as_ref()),
            None => Err(Error::invalid_argument(format!(
                "unsupported Content-Type {:?}",
                self.content_type
            ))),
        };
        send.writer.flush();
        result
    }

    async fn receive<M: Message>(&self) -> Result<Option<M>, Error> {
        let mut recv = self.recv.lock().await;
        let recv = &mut *recv;
        recv.unmarshaler.unmarshal(&mut recv.reader).await
    }

    async fn close_receive(&self) -> Result<(), Error> {
        let mut recv = self.recv.lock().await;
        discard(&mut recv.reader).await;
        recv.reader.close()
    }
}

/// Report `err` as a Twirp JSON error body. Success writes nothing.
async fn send_error_twirp<W: ResponseWriter>(
    writer: &mut W,
    err: Option<&AnyError>,
) -> Result<(), Error> {
    let Some(err) = err else {
        return Ok(());
    };
    let status = TwirpStatus::from_error(err);
    // Twirp errors are always JSON, whatever the request's encoding.
    writer
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TYPE_JSON));

    match serde_json::to_vec(&status) {
        Ok(body) => {
            writer.write_header(err.code().http_status());
            writer
                .write(Bytes::from(body))
                .await
                .map_err(|e| Error::wrap_boxed(Code::Unknown, e))
        }
        Err(e) => {
            tracing::warn!(code = %status.code, error = %e, "failed to encode twirp error");
            writer.write_header(http::StatusCode::INTERNAL_SERVER_ERROR);
            // Nothing more can be reported to the client.
            let _ = writer.write(Bytes::from(status.fallback_body())).await;
            Err(Error::new(
                Code::Internal,
                format!("couldn't marshal Twirp status to JSON: {e}"),
            ))
        }
    }
}
