//! Encoding helpers for text and binary header values.

use base64::Engine;
use http::HeaderValue;

/// Percent-encode a `grpc-message` value.
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Decode a percent-encoded `grpc-message` value.
///
/// Malformed escapes are kept literally and invalid UTF-8 is replaced, so a
/// peer's status message is never lost.
pub fn percent_decode(value: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned()
}

/// Encode bytes for a `-bin` header (standard alphabet, unpadded).
pub fn encode_binary_header(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD_NO_PAD.encode(data)
}

/// Decode a `-bin` header value. Padded and unpadded values are accepted.
pub fn decode_binary_header(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(value)
        .or_else(|_| {
            // Some peers pad
            base64::engine::general_purpose::STANDARD.decode(value)
        })
}

/// Header value as text, or `None` if absent or not visible ASCII.
pub fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build a header value from text produced by the encoders above.
///
/// Both encoders emit visible ASCII only, so this cannot fail for their
/// output; anything else falls back to an empty value.
pub fn ascii_value(value: String) -> HeaderValue {
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
