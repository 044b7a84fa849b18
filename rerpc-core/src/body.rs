//! Buffered reading of HTTP bodies, and the bounded drain.

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};

use crate::error::{BoxError, Code, Error};

/// Type-erased body used on both sides of a stream.
pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Most bytes [`discard`] throws away from a body with no declared limit.
pub const DRAIN_LIMIT: u64 = 4 * 1024 * 1024;

/// Pull-based reader over an HTTP body.
///
/// Buffers partially consumed frames, captures trailers when the body
/// reaches them, and optionally stops after a declared number of bytes.
pub struct BodyReader {
    body: BoxBody,
    buf: Bytes,
    limit: Option<u64>,
    trailers: Option<HeaderMap>,
    eof: bool,
}

impl BodyReader {
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self::from_boxed(body.map_err(Into::into).boxed_unsync())
    }

    pub fn from_boxed(body: BoxBody) -> Self {
        Self {
            body,
            buf: Bytes::new(),
            limit: None,
            trailers: None,
            eof: false,
        }
    }

    /// A reader that is already at end of stream.
    pub fn empty() -> Self {
        Self::from_boxed(empty_body())
    }

    /// Stop reading after `limit` more bytes.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Bytes left before the declared limit, if one was declared.
    pub fn remaining_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Trailers, once the body has been read up to them.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// Read at most `max` bytes. `Ok(None)` means end of stream.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, Error> {
        let max = match self.limit {
            Some(0) => return Ok(None),
            Some(limit) => max.min(usize::try_from(limit).unwrap_or(usize::MAX)),
            None => max,
        };
        if max == 0 {
            return Ok(Some(Bytes::new()));
        }
        if self.buf.is_empty() && !self.fill().await? {
            return Ok(None);
        }

        let chunk = self.buf.split_to(max.min(self.buf.len()));
        if let Some(limit) = self.limit.as_mut() {
            *limit -= chunk.len() as u64;
        }
        Ok(Some(chunk))
    }

    /// Read `n` bytes, or fewer if the body ends first.
    pub async fn read_up_to(&mut self, n: usize) -> Result<Bytes, Error> {
        let Some(first) = self.read_chunk(n).await? else {
            return Ok(Bytes::new());
        };
        if first.len() == n {
            return Ok(first);
        }

        let mut out = BytesMut::with_capacity(n);
        out.extend_from_slice(&first);
        while out.len() < n {
            match self.read_chunk(n - out.len()).await? {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => break,
            }
        }
        Ok(out.freeze())
    }

    /// Read until end of stream, or until more than `cap` bytes are buffered.
    ///
    /// Callers compare the returned length against `cap` to detect an
    /// oversized body without buffering all of it.
    pub async fn read_to_end(&mut self, cap: Option<usize>) -> Result<Bytes, Error> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read_chunk(usize::MAX).await? {
            out.extend_from_slice(&chunk);
            if cap.is_some_and(|cap| out.len() > cap) {
                break;
            }
        }
        Ok(out.freeze())
    }

    /// Release the body. Further reads return end of stream.
    pub fn close(&mut self) -> Result<(), Error> {
        self.body = empty_body();
        self.buf = Bytes::new();
        self.eof = true;
        Ok(())
    }

    /// Poll frames until data is buffered. Returns `false` at end of stream.
    async fn fill(&mut self) -> Result<bool, Error> {
        while !self.eof {
            match self.body.frame().await {
                None => self.eof = true,
                Some(Err(err)) => return Err(Error::wrap_boxed(Code::Unknown, err)),
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) if !data.is_empty() => {
                        self.buf = data;
                        return Ok(true);
                    }
                    Ok(_) => {}
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            self.trailers
                                .get_or_insert_with(HeaderMap::new)
                                .extend(trailers);
                        }
                    }
                },
            }
        }
        Ok(false)
    }
}

/// A body with no frames.
pub fn empty_body() -> BoxBody {
    Empty::<Bytes>::new().map_err(Into::into).boxed_unsync()
}

impl std::fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader")
            .field("buffered", &self.buf.len())
            .field("limit", &self.limit)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

/// Throw away the unread rest of a body, returning how many bytes were read.
///
/// A reader with a declared limit is drained up to that limit; any other
/// reader is drained for at most [`DRAIN_LIMIT`] bytes. Read errors end the
/// drain early.
pub async fn discard(reader: &mut BodyReader) -> u64 {
    let budget = reader.remaining_limit().unwrap_or(DRAIN_LIMIT);
    let mut discarded = 0;
    while discarded < budget {
        let max = usize::try_from(budget - discarded).unwrap_or(usize::MAX);
        match reader.read_chunk(max).await {
            Ok(Some(chunk)) => discarded += chunk.len() as u64,
            Ok(None) => break,
            Err(err) => {
                tracing::trace!(error = %err, "body error while discarding");
                break;
            }
        }
    }
    discarded
}
