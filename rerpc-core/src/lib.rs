//! Core protocol types for rerpc.
//!
//! This crate provides shared types and functions used by both the server
//! (`rerpc`) and client (`rerpc-client`) crates.
//!
//! ## Modules
//!
//! - [`error`]: Status codes and error types
//! - [`status`]: Conversion of errors to and from gRPC trailers and Twirp bodies
//! - [`compression`]: `grpc-encoding` negotiation
//! - [`codec`]: Per-message compression codecs
//! - [`envelope`]: gRPC length-prefixed framing
//! - [`marshal`]: Message (un)marshaling per content type
//! - [`body`]: Body reader and bounded drain
//! - [`context`]: Deadlines, cancellation and call metadata
//! - [`timeout`]: `grpc-timeout` encoding
//! - [`stream`]: The bidirectional `Stream` trait

mod body;
mod codec;
mod compression;
mod context;
mod envelope;
mod error;
mod header;
mod limits;
mod marshal;
mod protocol;
mod status;
mod stream;
mod timeout;

pub use body::*;
pub use codec::*;
pub use compression::*;
pub use context::*;
pub use envelope::*;
pub use error::*;
pub use header::*;
pub use limits::*;
pub use marshal::*;
pub use protocol::*;
pub use status::*;
pub use stream::*;
pub use timeout::*;
