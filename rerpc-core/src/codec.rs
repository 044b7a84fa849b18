//! Per-message gzip compression.
//!
//! gRPC compresses each length-prefixed message individually. gzip is the
//! only non-identity encoding.

use bytes::Bytes;
use std::io::{self, Read, Write};

use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Failure to inflate a message.
#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("decompressed message exceeds maximum allowed size of {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Gzip codec using flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipCodec {
    /// The `grpc-encoding` name.
    pub fn name(&self) -> &'static str {
        "gzip"
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    /// Inflate `data`, giving up as soon as the output grows past `max`.
    pub fn decompress(&self, data: &[u8], max: Option<usize>) -> Result<Bytes, DecompressError> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        match max {
            Some(max) => {
                let bound = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
                (&mut decoder).take(bound).read_to_end(&mut decompressed)?;
                if decompressed.len() > max {
                    return Err(DecompressError::TooLarge(max));
                }
            }
            None => {
                decoder.read_to_end(&mut decompressed)?;
            }
        }
        Ok(Bytes::from(decompressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_codec_compress_decompress() {
        let codec = GzipCodec::default();
        assert_eq!(codec.name(), "gzip");

        let original = b"Hello, World! This is a test message.";
        let compressed = codec.compress(original).unwrap();
        assert_ne!(&compressed[..], &original[..]);

        let decompressed = codec.decompress(&compressed, None).unwrap();
        assert_eq!(&decompressed[..], &original[..]);
    }

    #[test]
    fn test_decompress_stops_at_limit() {
        let codec = GzipCodec::default();
        let compressed = codec.compress(&vec![0u8; 1024 * 1024]).unwrap();
        assert!(compressed.len() < 16 * 1024);

        let err = codec.decompress(&compressed, Some(1024)).unwrap_err();
        assert!(matches!(err, DecompressError::TooLarge(1024)));
    }

    #[test]
    fn test_decompress_exactly_at_limit() {
        let codec = GzipCodec::default();
        let compressed = codec.compress(&[7u8; 1024]).unwrap();
        let decompressed = codec.decompress(&compressed, Some(1024)).unwrap();
        assert_eq!(decompressed.len(), 1024);
    }

    #[test]
    fn test_decompress_invalid_gzip() {
        let codec = GzipCodec::default();
        let err = codec.decompress(b"not valid gzip data", None).unwrap_err();
        assert!(matches!(err, DecompressError::Io(_)));
    }
}
