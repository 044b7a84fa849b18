//! Protocol error codes and error types.
//!
//! This module provides the error model shared by client and server streams:
//! - [`Code`]: The closed set of RPC outcome codes
//! - [`TwirpCode`]: String error kinds used by Twirp JSON error bodies
//! - [`ErrorDetail`]: Opaque typed blobs attached to errors
//! - [`Error`]: A coded error, the only error type streams return
//! - [`AnyError`]: Either a coded [`Error`] or an arbitrary error, handed to
//!   `close_send` by handlers

use std::str::FromStr;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Boxed error type used at transport boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// RPC status codes, shared by the gRPC and Twirp protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Look up a code by its numeric wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        let code = match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// Like [`Code::from_u32`], but maps values outside the closed set to
    /// [`Code::Unknown`].
    pub fn from_wire(value: i64) -> Self {
        u32::try_from(value)
            .ok()
            .and_then(Self::from_u32)
            .unwrap_or(Code::Unknown)
    }

    /// HTTP status written for this code when an error is reported in a
    /// response body (Twirp).
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            Code::Canceled => StatusCode::REQUEST_TIMEOUT,
            Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Aborted => StatusCode::CONFLICT,
            Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    /// Map a non-200 HTTP status seen by a gRPC client to a code.
    ///
    /// Follows the gRPC HTTP-to-status mapping. Statuses without an entry
    /// return `None`; callers fall back to [`Code::Unknown`].
    pub fn from_http_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::BAD_REQUEST => Some(Code::Internal),
            StatusCode::UNAUTHORIZED => Some(Code::Unauthenticated),
            StatusCode::FORBIDDEN => Some(Code::PermissionDenied),
            StatusCode::NOT_FOUND => Some(Code::Unimplemented),
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Some(Code::Unavailable),
            _ => None,
        }
    }

    /// The Twirp error kind for this code.
    ///
    /// `Ok` has no Twirp counterpart; an error carrying it is reported as
    /// `unknown`.
    pub fn twirp(&self) -> TwirpCode {
        match self {
            Code::Ok | Code::Unknown => TwirpCode::Unknown,
            Code::Canceled => TwirpCode::Canceled,
            Code::InvalidArgument => TwirpCode::InvalidArgument,
            Code::DeadlineExceeded => TwirpCode::DeadlineExceeded,
            Code::NotFound => TwirpCode::NotFound,
            Code::AlreadyExists => TwirpCode::AlreadyExists,
            Code::PermissionDenied => TwirpCode::PermissionDenied,
            Code::ResourceExhausted => TwirpCode::ResourceExhausted,
            Code::FailedPrecondition => TwirpCode::FailedPrecondition,
            Code::Aborted => TwirpCode::Aborted,
            Code::OutOfRange => TwirpCode::OutOfRange,
            Code::Unimplemented => TwirpCode::Unimplemented,
            Code::Internal => TwirpCode::Internal,
            Code::Unavailable => TwirpCode::Unavailable,
            Code::DataLoss => TwirpCode::DataLoss,
            Code::Unauthenticated => TwirpCode::Unauthenticated,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Code::Ok),
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// Twirp error kinds.
///
/// Twirp has two kinds with no [`Code`] equivalent (`malformed`, `bad_route`);
/// an [`Error`] can carry one of them as an override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwirpCode {
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "invalid_argument")]
    InvalidArgument,
    #[serde(rename = "malformed")]
    Malformed,
    #[serde(rename = "deadline_exceeded")]
    DeadlineExceeded,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "bad_route")]
    BadRoute,
    #[serde(rename = "already_exists")]
    AlreadyExists,
    #[serde(rename = "permission_denied")]
    PermissionDenied,
    #[serde(rename = "unauthenticated")]
    Unauthenticated,
    #[serde(rename = "resource_exhausted")]
    ResourceExhausted,
    #[serde(rename = "failed_precondition")]
    FailedPrecondition,
    #[serde(rename = "aborted")]
    Aborted,
    #[serde(rename = "out_of_range")]
    OutOfRange,
    #[serde(rename = "unimplemented")]
    Unimplemented,
    #[serde(rename = "internal")]
    Internal,
    #[serde(rename = "unavailable")]
    Unavailable,
    #[serde(rename = "dataloss")]
    DataLoss,
}

impl TwirpCode {
    /// Get the wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TwirpCode::Canceled => "canceled",
            TwirpCode::Unknown => "unknown",
            TwirpCode::InvalidArgument => "invalid_argument",
            TwirpCode::Malformed => "malformed",
            TwirpCode::DeadlineExceeded => "deadline_exceeded",
            TwirpCode::NotFound => "not_found",
            TwirpCode::BadRoute => "bad_route",
            TwirpCode::AlreadyExists => "already_exists",
            TwirpCode::PermissionDenied => "permission_denied",
            TwirpCode::Unauthenticated => "unauthenticated",
            TwirpCode::ResourceExhausted => "resource_exhausted",
            TwirpCode::FailedPrecondition => "failed_precondition",
            TwirpCode::Aborted => "aborted",
            TwirpCode::OutOfRange => "out_of_range",
            TwirpCode::Unimplemented => "unimplemented",
            TwirpCode::Internal => "internal",
            TwirpCode::Unavailable => "unavailable",
            TwirpCode::DataLoss => "dataloss",
        }
    }
}

impl std::fmt::Display for TwirpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque typed blob attached to an error.
///
/// This maps to `google.protobuf.Any` on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Fully-qualified type URL (e.g., "type.googleapis.com/google.rpc.RetryInfo").
    type_url: String,
    /// Protobuf-encoded message bytes.
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail with a type URL and protobuf-encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Get the type URL.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Get the protobuf-encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl From<prost_types::Any> for ErrorDetail {
    fn from(any: prost_types::Any) -> Self {
        Self::new(any.type_url, any.value)
    }
}

impl From<ErrorDetail> for prost_types::Any {
    fn from(detail: ErrorDetail) -> Self {
        prost_types::Any {
            type_url: detail.type_url,
            value: detail.value,
        }
    }
}

/// A coded RPC error.
///
/// Carries a [`Code`], an optional message, opaque details, and optionally the
/// error it wraps. "No error" is never represented by this type; streams use
/// `Result<_, Error>` and `Option<AnyError>` for that.
///
/// # Example
///
/// ```
/// use rerpc_core::{Code, Error};
///
/// let err = Error::new(Code::NotFound, "user not found");
/// assert_eq!(err.code(), Code::NotFound);
/// assert_eq!(err.message(), Some("user not found"));
/// assert_eq!(err.to_string(), "not_found: user not found");
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    twirp_code: Option<TwirpCode>,
}

impl Error {
    /// Create a new error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: vec![],
            source: None,
            twirp_code: None,
        }
    }

    /// Create a new error with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: vec![],
            source: None,
            twirp_code: None,
        }
    }

    /// Wrap an error with a code. The wrapped error's text becomes the message.
    pub fn wrap<E>(code: Code, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::wrap_boxed(code, Box::new(err))
    }

    /// Wrap an already-boxed error with a code.
    pub fn wrap_boxed(code: Code, err: BoxError) -> Self {
        Self {
            code,
            message: Some(err.to_string()),
            details: vec![],
            source: Some(Arc::from(err)),
            twirp_code: None,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the error message, without the code prefix.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Twirp kind overriding the one derived from [`Error::code`], if any.
    pub fn twirp_code(&self) -> Option<TwirpCode> {
        self.twirp_code
    }

    /// Add an error detail with type URL and protobuf-encoded bytes.
    pub fn add_detail<S: Into<String>>(mut self, type_url: S, value: Vec<u8>) -> Self {
        self.details.push(ErrorDetail::new(type_url, value));
        self
    }

    /// Add a pre-constructed ErrorDetail.
    pub fn add_error_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Replace all details.
    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    /// Report this error to Twirp clients with a specific kind.
    pub fn with_twirp_code(mut self, code: TwirpCode) -> Self {
        self.twirp_code = Some(code);
        self
    }

    // Convenience constructors for the codes local code raises most.

    /// Create an unknown error.
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a deadline exceeded error.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Create a resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// An error handed to a stream by application code.
///
/// Handlers may fail with a coded [`Error`] or with anything else; the latter
/// is reported to peers as [`Code::Unknown`].
#[derive(Debug)]
pub enum AnyError {
    Coded(Error),
    Opaque(BoxError),
}

impl AnyError {
    /// Wrap an arbitrary error.
    pub fn opaque<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        AnyError::Opaque(err.into())
    }

    /// The coded error, if this is one.
    pub fn as_coded(&self) -> Option<&Error> {
        match self {
            AnyError::Coded(err) => Some(err),
            AnyError::Opaque(_) => None,
        }
    }

    /// The code peers will see for this error.
    pub fn code(&self) -> Code {
        match self {
            AnyError::Coded(err) => err.code(),
            AnyError::Opaque(_) => Code::Unknown,
        }
    }
}

impl std::fmt::Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyError::Coded(err) => std::fmt::Display::fmt(err, f),
            AnyError::Opaque(err) => std::fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for AnyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnyError::Coded(err) => std::error::Error::source(err),
            AnyError::Opaque(err) => std::error::Error::source(&**err),
        }
    }
}

impl From<Error> for AnyError {
    fn from(err: Error) -> Self {
        AnyError::Coded(err)
    }
}

/// Code of an optional error; `None` is [`Code::Ok`].
pub fn code_of(err: Option<&AnyError>) -> Code {
    err.map_or(Code::Ok, AnyError::code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_as_str() {
        assert_eq!(Code::Ok.as_str(), "ok");
        assert_eq!(Code::InvalidArgument.as_str(), "invalid_argument");
        assert_eq!(Code::Unauthenticated.as_str(), "unauthenticated");
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!("ok".parse(), Ok(Code::Ok));
        assert_eq!("invalid_argument".parse(), Ok(Code::InvalidArgument));
        assert_eq!("cancelled".parse(), Ok(Code::Canceled));
        assert_eq!("unknown_code".parse::<Code>(), Err(ParseCodeError(())));
    }

    #[test]
    fn test_code_from_u32() {
        assert_eq!(Code::from_u32(0), Some(Code::Ok));
        assert_eq!(Code::from_u32(5), Some(Code::NotFound));
        assert_eq!(Code::from_u32(16), Some(Code::Unauthenticated));
        assert_eq!(Code::from_u32(17), None);
        assert_eq!(Code::from_wire(-1), Code::Unknown);
        assert_eq!(Code::from_wire(13), Code::Internal);
    }

    #[test]
    fn test_code_http_tables() {
        assert_eq!(Code::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Code::FailedPrecondition.http_status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            Code::from_http_status(StatusCode::NOT_FOUND),
            Some(Code::Unimplemented)
        );
        assert_eq!(
            Code::from_http_status(StatusCode::GATEWAY_TIMEOUT),
            Some(Code::Unavailable)
        );
        assert_eq!(Code::from_http_status(StatusCode::IM_A_TEAPOT), None);
    }

    #[test]
    fn test_twirp_codes() {
        assert_eq!(Code::DataLoss.twirp().as_str(), "dataloss");
        assert_eq!(Code::Ok.twirp(), TwirpCode::Unknown);
        let json = serde_json::to_string(&TwirpCode::BadRoute).unwrap();
        assert_eq!(json, r#""bad_route""#);
    }

    #[test]
    fn test_error_wrap_keeps_source() {
        let io = std::io::Error::other("pipe broke");
        let err = Error::wrap(Code::Unknown, io);
        assert_eq!(err.message(), Some("pipe broke"));
        assert_eq!(err.to_string(), "unknown: pipe broke");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_from_code_display() {
        let err = Error::from_code(Code::Internal);
        assert!(err.message().is_none());
        assert_eq!(err.to_string(), "internal");
    }

    #[test]
    fn test_any_error_code() {
        let coded: AnyError = Error::not_found("gone").into();
        assert_eq!(coded.code(), Code::NotFound);
        assert!(coded.as_coded().is_some());

        let opaque = AnyError::opaque("boom");
        assert_eq!(opaque.code(), Code::Unknown);
        assert!(opaque.as_coded().is_none());
        assert_eq!(opaque.to_string(), "boom");

        assert_eq!(code_of(None), Code::Ok);
        assert_eq!(code_of(Some(&coded)), Code::NotFound);
    }

    #[test]
    fn test_error_detail_any_conversion() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.RetryInfo", vec![1, 2, 3]);
        let any: prost_types::Any = detail.clone().into();
        assert_eq!(any.type_url, "type.googleapis.com/google.rpc.RetryInfo");
        assert_eq!(ErrorDetail::from(any), detail);
    }
}
