//! Message marshaling for each wire format.
//!
//! gRPC messages are enveloped (and optionally gzipped) one by one, so a body
//! carries any number of them. Twirp bodies carry exactly one bare protobuf or
//! JSON message.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::body::BodyReader;
use crate::codec::GzipCodec;
use crate::envelope::{
    ENVELOPE_HEADER_SIZE, compress_payload, parse_envelope_header, process_envelope_payload,
    wrap_envelope,
};
use crate::error::{Code, Error};
use crate::limits::MessageLimits;
use crate::protocol::WireFormat;

/// Messages streams can carry: protobuf for the binary formats, serde for
/// Twirp JSON.
pub trait Message:
    prost::Message + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Message for T where
    T: prost::Message + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

fn unsupported(content_type: &str) -> Error {
    Error::invalid_argument(format!("unsupported Content-Type {content_type:?}"))
}

/// Serializes outgoing messages for one content type.
#[derive(Clone, Debug)]
pub struct Marshaler {
    content_type: String,
    format: Option<WireFormat>,
    codec: Option<GzipCodec>,
}

impl Marshaler {
    /// `gzip` compresses gRPC messages; Twirp bodies are never compressed.
    pub fn new(content_type: &str, gzip: bool) -> Self {
        Self {
            content_type: content_type.to_string(),
            format: WireFormat::from_content_type(content_type),
            codec: gzip.then(GzipCodec::default),
        }
    }

    pub fn marshal<M: Message>(&self, msg: &M) -> Result<Bytes, Error> {
        match self.format {
            Some(WireFormat::Grpc) => {
                let (payload, compressed) =
                    compress_payload(Bytes::from(msg.encode_to_vec()), self.codec.as_ref())?;
                Ok(Bytes::from(wrap_envelope(&payload, compressed)))
            }
            Some(WireFormat::TwirpProto) => Ok(Bytes::from(msg.encode_to_vec())),
            Some(WireFormat::TwirpJson) => serde_json::to_vec(msg)
                .map(Bytes::from)
                .map_err(|e| Error::new(Code::Internal, format!("couldn't marshal JSON: {e}"))),
            None => Err(unsupported(&self.content_type)),
        }
    }
}

/// Reads incoming messages of one content type from a body.
#[derive(Clone, Debug)]
pub struct Unmarshaler {
    content_type: String,
    format: Option<WireFormat>,
    limits: MessageLimits,
    done: bool,
}

impl Unmarshaler {
    pub fn new(content_type: &str, limits: MessageLimits) -> Self {
        Self {
            content_type: content_type.to_string(),
            format: WireFormat::from_content_type(content_type),
            limits,
            done: false,
        }
    }

    /// Read the next message. `Ok(None)` is a clean end of stream.
    pub async fn unmarshal<M: Message>(
        &mut self,
        reader: &mut BodyReader,
    ) -> Result<Option<M>, Error> {
        match self.format {
            Some(WireFormat::Grpc) => self.unmarshal_grpc(reader).await,
            Some(format) => {
                if self.done {
                    return Ok(None);
                }
                self.done = true;
                self.unmarshal_twirp(format, reader).await.map(Some)
            }
            None => Err(unsupported(&self.content_type)),
        }
    }

    async fn unmarshal_grpc<M: Message>(
        &self,
        reader: &mut BodyReader,
    ) -> Result<Option<M>, Error> {
        let header = reader.read_up_to(ENVELOPE_HEADER_SIZE).await?;
        if header.is_empty() {
            return Ok(None);
        }
        let (flags, size) = parse_envelope_header(&header)?;
        let size = size as usize;
        self.limits.check_size(size)?;

        let payload = reader.read_up_to(size).await?;
        if payload.len() < size {
            return Err(Error::invalid_argument(format!(
                "protocol error: promised {} bytes in enveloped message, got {} bytes",
                size,
                payload.len()
            )));
        }

        let payload = process_envelope_payload(flags, payload, self.limits)?;

        M::decode(payload)
            .map(Some)
            .map_err(|e| Error::invalid_argument(format!("can't unmarshal protobuf: {e}")))
    }

    async fn unmarshal_twirp<M: Message>(
        &self,
        format: WireFormat,
        reader: &mut BodyReader,
    ) -> Result<M, Error> {
        let body = reader.read_to_end(self.limits.max_message_size()).await?;
        self.limits.check_size(body.len())?;

        if format == WireFormat::TwirpJson {
            serde_json::from_slice(&body)
                .map_err(|e| Error::invalid_argument(format!("can't unmarshal JSON: {e}")))
        } else {
            M::decode(body)
                .map_err(|e| Error::invalid_argument(format!("can't unmarshal protobuf: {e}")))
        }
    }
}
