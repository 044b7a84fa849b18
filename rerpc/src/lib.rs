//! gRPC and Twirp server streams for rerpc.
//!
//! A [`ServerStream`] reads request messages from an inbound HTTP body and
//! writes replies through a [`ResponseWriter`]. How the final outcome reaches
//! the client depends on the request's content type:
//!
//! - gRPC (`application/grpc`, `application/grpc+proto`): `grpc-status`,
//!   `grpc-message` and `grpc-status-details-bin` trailers, sent on success too.
//! - Twirp (`application/protobuf`, `application/json`): a JSON error body
//!   with a matching HTTP status. Success writes nothing.
//!
//! ## Example
//!
//! ```ignore
//! use rerpc::{ServerStream, ServerStreamConfig, response_channel};
//! use rerpc_core::Stream;
//!
//! async fn handle(request: http::Request<hyper::body::Incoming>)
//!     -> http::Response<rerpc::ResponseBody>
//! {
//!     let (writer, head) = response_channel(16);
//!     tokio::spawn(async move {
//!         let stream = ServerStream::from_request(request, writer, ServerStreamConfig::default());
//!         let outcome = echo(&stream).await;
//!         let _ = stream.close_send(outcome.err().map(Into::into)).await;
//!     });
//!     head.await.expect("stream dropped without a response")
//! }
//! ```

mod stream;
mod writer;

pub use stream::{ServerStream, ServerStreamConfig};
pub use writer::{ChannelWriter, ResponseBody, ResponseClosed, ResponseWriter, response_channel};

// Re-export core types
pub use rerpc_core::{AnyError, CallContext, Code, Error, Message, MessageLimits, Stream};
