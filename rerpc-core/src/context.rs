//! Per-call context: deadline, cancellation and call metadata.
//!
//! A [`CallContext`] travels with every stream. Clients read the deadline to
//! fill `grpc-timeout` and race the transport against [`CallContext::done`];
//! servers derive one from the inbound `grpc-timeout` header.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Code, Error};
use crate::header::header_str;
use crate::protocol::GRPC_TIMEOUT;
use crate::timeout::decode_timeout;

/// Why a context is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// The code a call terminated by this condition fails with.
    pub fn code(&self) -> Code {
        match self {
            ContextError::Canceled => Code::Canceled,
            ContextError::DeadlineExceeded => Code::DeadlineExceeded,
        }
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Error::wrap(err.code(), err)
    }
}

/// Header containers for one call.
///
/// The call layer fills the request headers before the stream is built; the
/// client stream publishes the response headers once the server answers.
#[derive(Debug, Default)]
pub struct CallMeta {
    request_headers: Mutex<HeaderMap>,
    response_headers: Mutex<Option<HeaderMap>>,
}

impl CallMeta {
    pub fn new(request_headers: HeaderMap) -> Self {
        Self {
            request_headers: Mutex::new(request_headers),
            response_headers: Mutex::new(None),
        }
    }

    /// Outgoing (client) or inbound (server) request headers.
    pub fn request_headers(&self) -> MutexGuard<'_, HeaderMap> {
        self.request_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Response headers, once known.
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_response_headers(&self, headers: HeaderMap) {
        *self
            .response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(headers);
    }
}

/// Deadline, cancellation and metadata of a single call.
///
/// Cloning is cheap; clones share cancellation and metadata.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: CancellationToken,
    meta: Option<Arc<CallMeta>>,
}

impl CallContext {
    /// A context with no deadline and no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_call_meta(mut self, meta: Arc<CallMeta>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Share cancellation with `token`.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Build a server-side context from inbound request headers.
    ///
    /// The deadline comes from `grpc-timeout`; a malformed value is ignored.
    /// The headers are recorded as the call's request headers.
    pub fn from_request_headers(headers: &HeaderMap) -> Self {
        let mut ctx = Self::new().with_call_meta(Arc::new(CallMeta::new(headers.clone())));
        if let Some(value) = header_str(headers, GRPC_TIMEOUT) {
            match decode_timeout(value) {
                Ok(timeout) => ctx = ctx.with_timeout(timeout),
                Err(err) => tracing::debug!(error = %err, "ignoring grpc-timeout"),
            }
        }
        ctx
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn call_meta(&self) -> Option<&Arc<CallMeta>> {
        self.meta.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the call and every clone of this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context is done, or `None` if it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context is canceled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}
