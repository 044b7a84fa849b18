//! Status codec: converts errors to and from their wire forms.
//!
//! gRPC carries errors in `grpc-status`, `grpc-message` and
//! `grpc-status-details-bin` (a serialized [`Status`]). Twirp carries them in a
//! JSON body, see [`TwirpStatus`].

use http::HeaderMap;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::error::{AnyError, Code, Error, ErrorDetail, TwirpCode, code_of};
use crate::header::{
    ascii_value, decode_binary_header, encode_binary_header, percent_decode, percent_encode,
};
use crate::protocol::{GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS_BIN};

/// The `google.rpc.Status` wire message.
#[derive(Clone, PartialEq, Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

/// Build the wire status for an error.
///
/// Opaque errors become `Unknown` with their full text. Coded errors keep
/// their code and details; the message is the error's own message, so the
/// code is not repeated in it.
pub fn status_from_error(err: &AnyError) -> Status {
    match err {
        AnyError::Opaque(err) => Status {
            code: Code::Unknown as i32,
            message: err.to_string(),
            details: vec![],
        },
        AnyError::Coded(err) => Status {
            code: err.code() as i32,
            message: err
                .message()
                .map_or_else(|| err.to_string(), str::to_owned),
            details: err.details().iter().cloned().map(Into::into).collect(),
        },
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        coded(Code::from_wire(status.code.into()), status.message)
            .with_details(status.details.into_iter().map(ErrorDetail::from).collect())
    }
}

fn coded(code: Code, message: String) -> Error {
    if message.is_empty() {
        Error::from_code(code)
    } else {
        Error::new(code, message)
    }
}

/// Extract a peer-reported error from gRPC headers or trailers.
///
/// Returns `None` when `grpc-status` is absent, empty or `0`. A present
/// `grpc-status-details-bin` is authoritative over the plain headers.
pub fn extract_error(headers: &HeaderMap) -> Option<Error> {
    let raw = headers.get(GRPC_STATUS)?;
    let status = String::from_utf8_lossy(raw.as_bytes());
    if status.is_empty() || status == "0" {
        return None;
    }

    let Ok(code) = status.parse::<u32>() else {
        return Some(Error::unknown(format!(
            "gRPC protocol error: got invalid error code {status:?}"
        )));
    };
    let message = headers
        .get(GRPC_MESSAGE)
        .map(|v| percent_decode(&String::from_utf8_lossy(v.as_bytes())))
        .unwrap_or_default();
    let err = coded(Code::from_wire(code.into()), message);

    let details = match headers.get(GRPC_STATUS_DETAILS_BIN) {
        Some(v) if !v.is_empty() => v,
        _ => return Some(err),
    };
    let binary = match std::str::from_utf8(details.as_bytes())
        .map_err(|e| e.to_string())
        .and_then(|text| decode_binary_header(text).map_err(|e| e.to_string()))
    {
        Ok(binary) => binary,
        Err(e) => {
            return Some(Error::unknown(format!(
                "server returned invalid grpc-status-details-bin trailer: {e}"
            )));
        }
    };
    match Status::decode(binary.as_slice()) {
        // Prefer the protobuf-encoded status to the plain headers.
        Ok(status) => Some(status.into()),
        Err(e) => Some(Error::unknown(format!(
            "server returned invalid protobuf for error details: {e}"
        ))),
    }
}

/// Write the gRPC status of a finished call into `trailers`.
///
/// Success is written explicitly (`grpc-status: 0` with empty message and
/// details). If the status cannot be serialized, `Internal` is written
/// instead and returned to the caller.
pub fn set_grpc_status(trailers: &mut HeaderMap, err: Option<&AnyError>) -> Result<(), Error> {
    let err = match err {
        Some(err) if code_of(Some(err)) != Code::Ok => err,
        _ => {
            trailers.insert(GRPC_STATUS, http::HeaderValue::from_static("0"));
            trailers.insert(GRPC_MESSAGE, http::HeaderValue::from_static(""));
            trailers.insert(GRPC_STATUS_DETAILS_BIN, http::HeaderValue::from_static(""));
            return Ok(());
        }
    };

    let status = status_from_error(err);
    let mut bin = Vec::with_capacity(status.encoded_len());
    if let Err(e) = status.encode(&mut bin) {
        tracing::warn!(code = status.code, error = %e, "failed to encode grpc status");
        trailers.insert(GRPC_STATUS, http::HeaderValue::from(Code::Internal as i32));
        trailers.insert(
            GRPC_MESSAGE,
            ascii_value(percent_encode(&format!(
                "error marshaling protobuf status with code {}",
                status.code
            ))),
        );
        return Err(Error::wrap(Code::Internal, e));
    }

    trailers.insert(GRPC_STATUS, http::HeaderValue::from(status.code));
    trailers.insert(GRPC_MESSAGE, ascii_value(percent_encode(&status.message)));
    trailers.insert(
        GRPC_STATUS_DETAILS_BIN,
        ascii_value(encode_binary_header(&bin)),
    );
    Ok(())
}

/// Twirp JSON error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwirpStatus {
    pub code: TwirpCode,
    pub msg: String,
}

impl TwirpStatus {
    /// Build the body for an error. A coded error's Twirp override wins over
    /// the kind derived from its code.
    pub fn from_error(err: &AnyError) -> Self {
        let status = status_from_error(err);
        let code = err
            .as_coded()
            .and_then(Error::twirp_code)
            .unwrap_or_else(|| Code::from_wire(status.code.into()).twirp());
        Self {
            code,
            msg: status.message,
        }
    }

    /// Hand-built body written when `self` cannot be serialized.
    pub fn fallback_body(&self) -> String {
        format!(
            r#"{{"code": "{}", "msg": "error marshaling error with code {}"}}"#,
            Code::Internal.twirp(),
            self.code
        )
    }
}
