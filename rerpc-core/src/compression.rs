//! Compression negotiation.
//!
//! Peers advertise the encoding of their messages in `grpc-encoding`. Only
//! `identity` and `gzip` are supported; anything else fails the call.

use crate::error::{Code, Error};

/// Value of `grpc-accept-encoding` sent by clients.
pub const ACCEPT_ENCODING_VALUE: &str = "gzip";

/// The accepted encodings, as listed in negotiation errors.
pub const SUPPORTED_ENCODINGS: &str = "identity, gzip";

/// Supported compression encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionEncoding {
    #[default]
    Identity,
    Gzip,
}

impl CompressionEncoding {
    /// Parse a `grpc-encoding` header value.
    /// Returns `None` for unsupported encodings.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("identity") | Some("") => Some(Self::Identity),
            Some("gzip") => Some(Self::Gzip),
            _ => None,
        }
    }

    /// Get the header value string for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
        }
    }
}

/// Validate an advertised encoding.
///
/// A missing header means identity. Unsupported encodings fail with
/// [`Code::Internal`] and a message listing what the peer may use instead.
pub fn negotiate_compression(advertised: Option<&str>) -> Result<CompressionEncoding, Error> {
    CompressionEncoding::from_header(advertised).ok_or_else(|| {
        Error::new(
            Code::Internal,
            format!(
                "unknown compression {:?}: accepted grpc-encoding values are {}",
                advertised.unwrap_or_default(),
                SUPPORTED_ENCODINGS
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header() {
        assert_eq!(
            CompressionEncoding::from_header(None),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("gzip")),
            Some(CompressionEncoding::Gzip)
        );
        assert_eq!(CompressionEncoding::from_header(Some("zstd")), None);
    }

    #[test]
    fn test_negotiate_defaults_to_identity() {
        let encoding = negotiate_compression(None).unwrap();
        assert_eq!(encoding, CompressionEncoding::Identity);
        assert_eq!(negotiate_compression(Some("")).unwrap(), CompressionEncoding::Identity);
    }

    #[test]
    fn test_negotiate_gzip() {
        let encoding = negotiate_compression(Some("gzip")).unwrap();
        assert_eq!(encoding.as_str(), "gzip");
    }

    #[test]
    fn test_negotiate_rejects_brotli() {
        let err = negotiate_compression(Some("br")).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        let message = err.message().unwrap();
        assert!(message.contains(r#""br""#));
        assert!(message.ends_with("accepted grpc-encoding values are identity, gzip"));
    }
}
