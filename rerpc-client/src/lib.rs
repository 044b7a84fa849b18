//! gRPC streaming client for rerpc.
//!
//! A [`ClientStream`] speaks gRPC over any [`Doer`], an HTTP capability that
//! executes one request and returns the streamed response. [`HyperTransport`]
//! is the stock `Doer`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rerpc_client::{ClientStream, ClientStreamConfig, HyperTransport};
//! use rerpc_core::{CallContext, CallMeta, Stream};
//!
//! let transport = Arc::new(HyperTransport::builder().http2_only(true).build());
//! let ctx = CallContext::new().with_call_meta(Arc::new(CallMeta::default()));
//! let uri = "http://localhost:3000/echo.v1.EchoService/Echo".parse()?;
//!
//! let stream = ClientStream::new(ctx, transport, uri, ClientStreamConfig::default()).await;
//! stream.send(&EchoRequest { message: "hello".into() }).await?;
//! stream.close_send(None).await?;
//! let reply: Option<EchoResponse> = stream.receive().await?;
//! stream.close_receive().await?;
//! ```

mod config;
pub mod pipe;
mod stream;
pub mod transport;

pub use config::ClientStreamConfig;
pub use stream::ClientStream;
pub use transport::{Doer, HyperTransport, HyperTransportBuilder, RequestBody};

// Re-export core types
pub use rerpc_core::{AnyError, CallContext, CallMeta, Code, Error, Message, Stream};
