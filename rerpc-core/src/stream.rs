//! The bidirectional message stream shared by clients and servers.

use std::future::Future;

use crate::context::CallContext;
use crate::error::{AnyError, Error};
use crate::marshal::Message;

/// A bidirectional stream of messages.
///
/// One task drives the send side (`send`, `close_send`) and one drives the
/// receive side (`receive`, `close_receive`); they may be the same task or
/// run concurrently on a shared `Arc<impl Stream>`. `context` is safe from
/// either.
pub trait Stream: Send + Sync {
    fn context(&self) -> &CallContext;

    /// Send a message.
    fn send<M: Message>(&self, msg: &M) -> impl Future<Output = Result<(), Error>> + Send;

    /// Finish the send side.
    ///
    /// Servers report `err` (or success, for `None`) to the client in the
    /// protocol's error location. Clients ignore it.
    fn close_send(&self, err: Option<AnyError>) -> impl Future<Output = Result<(), Error>> + Send;

    /// Receive the next message. `Ok(None)` means the peer finished cleanly.
    fn receive<M: Message>(&self) -> impl Future<Output = Result<Option<M>, Error>> + Send;

    /// Finish the receive side, discarding anything unread.
    fn close_receive(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
