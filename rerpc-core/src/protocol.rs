//! Content types and wire header names.

/// Content type of gRPC requests that don't name a codec.
pub const TYPE_DEFAULT_GRPC: &str = "application/grpc";
/// Content type of gRPC requests with an explicit protobuf codec.
pub const TYPE_PROTO_GRPC: &str = "application/grpc+proto";
/// Content type of Twirp JSON requests, and of every Twirp error body.
pub const TYPE_JSON: &str = "application/json";
/// Content type of Twirp protobuf requests.
pub const TYPE_PROTO_TWIRP: &str = "application/protobuf";

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";
pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Message encodings a content type selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Length-prefixed protobuf messages, status in trailers.
    Grpc,
    /// A single bare protobuf message.
    TwirpProto,
    /// A single JSON message.
    TwirpJson,
}

impl WireFormat {
    /// Look up the wire format for a content type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            TYPE_DEFAULT_GRPC | TYPE_PROTO_GRPC => Some(WireFormat::Grpc),
            TYPE_PROTO_TWIRP => Some(WireFormat::TwirpProto),
            TYPE_JSON => Some(WireFormat::TwirpJson),
            _ => None,
        }
    }

    /// Whether errors for this format travel in a Twirp JSON body.
    pub fn is_twirp(&self) -> bool {
        !matches!(self, WireFormat::Grpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_from_content_type() {
        assert_eq!(
            WireFormat::from_content_type(TYPE_DEFAULT_GRPC),
            Some(WireFormat::Grpc)
        );
        assert_eq!(
            WireFormat::from_content_type(TYPE_PROTO_GRPC),
            Some(WireFormat::Grpc)
        );
        assert_eq!(
            WireFormat::from_content_type(TYPE_JSON),
            Some(WireFormat::TwirpJson)
        );
        assert!(WireFormat::from_content_type(TYPE_PROTO_TWIRP).unwrap().is_twirp());
        assert_eq!(WireFormat::from_content_type("text/plain"), None);
    }
}
