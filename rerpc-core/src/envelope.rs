//! gRPC length-prefixed message framing.
//!
//! Every streamed gRPC message travels in an envelope:
//!
//! ```text
//! [flags:1][length:4][payload:length]
//! ```

use bytes::Bytes;

use crate::codec::{DecompressError, GzipCodec};
use crate::error::{Code, Error};
use crate::limits::MessageLimits;

/// gRPC envelope flags.
pub mod envelope_flags {
    /// Uncompressed message.
    pub const MESSAGE: u8 = 0x00;
    /// Compressed message.
    pub const COMPRESSED: u8 = 0x01;
}

/// Envelope header size (flags + length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Wrap payload in a length-prefixed envelope.
///
/// # Arguments
/// - `payload`: The message bytes to wrap
/// - `compressed`: Whether the payload is compressed (sets flag 0x01)
pub fn wrap_envelope(payload: &[u8], compressed: bool) -> Vec<u8> {
    let flags = if compressed {
        envelope_flags::COMPRESSED
    } else {
        envelope_flags::MESSAGE
    };

    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse envelope header from bytes.
///
/// Returns `(flags, length)` if successful.
pub fn parse_envelope_header(data: &[u8]) -> Result<(u8, u32), Error> {
    let [flags, a, b, c, d, ..] = *data else {
        return Err(Error::invalid_argument(format!(
            "incomplete envelope header: expected {} bytes, got {}",
            ENVELOPE_HEADER_SIZE,
            data.len()
        )));
    };
    Ok((flags, u32::from_be_bytes([a, b, c, d])))
}

/// Validate envelope flags and decompress the payload if needed.
///
/// Inflation stops as soon as the output exceeds `limits`.
pub fn process_envelope_payload(
    flags: u8,
    payload: Bytes,
    limits: MessageLimits,
) -> Result<Bytes, Error> {
    match flags {
        envelope_flags::MESSAGE => Ok(payload),
        envelope_flags::COMPRESSED => GzipCodec::default()
            .decompress(&payload, limits.max_message_size())
            .map_err(|e| match e {
                e @ DecompressError::TooLarge(_) => Error::resource_exhausted(e.to_string()),
                DecompressError::Io(e) => {
                    Error::new(Code::InvalidArgument, format!("decompression failed: {e}"))
                }
            }),
        _ => Err(Error::invalid_argument(format!(
            "invalid gRPC frame flags: 0x{:02x}",
            flags
        ))),
    }
}

/// Compress payload bytes with `codec`.
///
/// Returns `(compressed_bytes, was_compressed)`.
pub fn compress_payload(payload: Bytes, codec: Option<&GzipCodec>) -> Result<(Bytes, bool), Error> {
    let Some(codec) = codec else {
        return Ok((payload, false)); // identity
    };

    let compressed = codec
        .compress(&payload)
        .map_err(|e| Error::new(Code::Internal, format!("compression failed: {e}")))?;

    Ok((compressed, true))
}
