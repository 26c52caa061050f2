//! Method descriptors.
//!
//! A [`MethodDescriptor`] is everything the runtime needs to know about one
//! RPC method: where it lives, what shape of call it is and how to turn
//! messages into bytes and back. The runtime never looks inside messages;
//! schema tooling (or hand-written bindings) provides the serializer pair.
//!
//! ```
//! use courier_client::{CallShape, MethodDescriptor};
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct Ping {
//!     #[prost(string, tag = "1")]
//!     text: String,
//! }
//!
//! static PING: MethodDescriptor<Ping, Ping> =
//!     MethodDescriptor::prost("demo.v1.PingService", "Ping", CallShape::Unary);
//!
//! assert_eq!(PING.path(), "/demo.v1.PingService/Ping");
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

/// The four call shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request, one response.
    Unary,
    /// One request, a stream of responses.
    ServerStream,
    /// A stream of requests, one response.
    ClientStream,
    /// Streams in both directions.
    Bidi,
}

impl CallShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStream => "server_stream",
            CallShape::ClientStream => "client_stream",
            CallShape::Bidi => "bidi_stream",
        }
    }

    /// True when the caller sends more than one message.
    pub fn is_client_streaming(&self) -> bool {
        matches!(self, CallShape::ClientStream | CallShape::Bidi)
    }

    /// True when the server may answer with more than one message.
    pub fn is_server_streaming(&self) -> bool {
        matches!(self, CallShape::ServerStream | CallShape::Bidi)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How messages are serialized on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MessageEncoding {
    #[default]
    Proto,
    Json,
}

impl MessageEncoding {
    /// The gRPC-Web content type for this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            MessageEncoding::Proto => "application/grpc-web+proto",
            MessageEncoding::Json => "application/grpc-web+json",
        }
    }
}

/// Serialization failures reported by descriptor functions.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Serializes a request message.
pub type Serializer<T> = fn(&T) -> Result<Bytes, MessageError>;
/// Deserializes a response message.
pub type Deserializer<T> = fn(&[u8]) -> Result<T, MessageError>;

/// Static description of one RPC method.
pub struct MethodDescriptor<Req, Res> {
    service: &'static str,
    method: &'static str,
    shape: CallShape,
    encoding: MessageEncoding,
    serialize: Serializer<Req>,
    deserialize: Deserializer<Res>,
}

impl<Req, Res> MethodDescriptor<Req, Res> {
    /// Build a descriptor from explicit serializer functions.
    pub const fn new(
        service: &'static str,
        method: &'static str,
        shape: CallShape,
        encoding: MessageEncoding,
        serialize: Serializer<Req>,
        deserialize: Deserializer<Res>,
    ) -> Self {
        Self {
            service,
            method,
            shape,
            encoding,
            serialize,
            deserialize,
        }
    }

    /// Fully qualified service name, e.g. `chat.v1.ChatService`.
    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// The HTTP path: `/{service}/{method}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    pub fn encoding(&self) -> MessageEncoding {
        self.encoding
    }

    pub fn encode(&self, message: &Req) -> Result<Bytes, MessageError> {
        (self.serialize)(message)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Res, MessageError> {
        (self.deserialize)(bytes)
    }

    pub(crate) fn serializer(&self) -> Serializer<Req> {
        self.serialize
    }

    pub(crate) fn deserializer(&self) -> Deserializer<Res> {
        self.deserialize
    }
}

impl<Req, Res> MethodDescriptor<Req, Res>
where
    Req: prost::Message,
    Res: prost::Message + Default,
{
    /// A descriptor for protobuf messages.
    pub const fn prost(service: &'static str, method: &'static str, shape: CallShape) -> Self {
        Self::new(
            service,
            method,
            shape,
            MessageEncoding::Proto,
            encode_prost::<Req>,
            decode_prost::<Res>,
        )
    }
}

impl<Req, Res> MethodDescriptor<Req, Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
{
    /// A descriptor for JSON messages.
    pub const fn json(service: &'static str, method: &'static str, shape: CallShape) -> Self {
        Self::new(
            service,
            method,
            shape,
            MessageEncoding::Json,
            encode_json::<Req>,
            decode_json::<Res>,
        )
    }
}

impl<Req, Res> Clone for MethodDescriptor<Req, Res> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Res> Copy for MethodDescriptor<Req, Res> {}

impl<Req, Res> fmt::Debug for MethodDescriptor<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

fn encode_prost<T: prost::Message>(message: &T) -> Result<Bytes, MessageError> {
    Ok(Bytes::from(message.encode_to_vec()))
}

fn decode_prost<T: prost::Message + Default>(bytes: &[u8]) -> Result<T, MessageError> {
    T::decode(bytes).map_err(|e| MessageError::Decode(format!("protobuf: {e}")))
}

fn encode_json<T: Serialize>(message: &T) -> Result<Bytes, MessageError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| MessageError::Encode(format!("json: {e}")))
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    serde_json::from_slice(bytes).map_err(|e| MessageError::Decode(format!("json: {e}")))
}
