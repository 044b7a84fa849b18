//! HTTP transport for the client stream.
//!
//! A [`ClientStream`](crate::ClientStream) hands its request to a [`Doer`]
//! exactly once. [`HyperTransport`] is the stock implementation, built on
//! hyper_util's legacy client.

use std::future::Future;

use rerpc_core::{BoxBody, BoxError};

use crate::pipe::PipeReader;

mod hyper;

pub use hyper::{HyperTransport, HyperTransportBuilder};

/// Body of every outgoing request: the read end of the stream's pipe.
pub type RequestBody = PipeReader;

/// Executes an HTTP request.
///
/// The response body is streamed; implementations must return as soon as the
/// response head is available.
pub trait Doer: Send + Sync + 'static {
    fn execute(
        &self,
        request: http::Request<RequestBody>,
    ) -> impl Future<Output = Result<http::Response<BoxBody>, BoxError>> + Send;
}
