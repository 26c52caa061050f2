//! gRPC status codes, statuses and wire-level errors.
//!
//! This module provides:
//! - [`Code`]: gRPC status codes as carried in `grpc-status`
//! - [`ErrorDetail`]: Self-describing error details from `grpc-status-details-bin`
//! - [`Status`]: The terminal status of a call (code, message, details, trailers)
//! - [`FrameError`]: Framing errors raised by the frame codec

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use prost::Message;

/// Trailer/header name for the numeric status code.
pub const GRPC_STATUS: &str = "grpc-status";
/// Trailer/header name for the percent-encoded status message.
pub const GRPC_MESSAGE: &str = "grpc-message";
/// Trailer/header name for the base64-encoded `google.rpc.Status` details.
pub const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";

/// gRPC status codes.
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

    /// Map the numeric wire value to a code. Values outside the known range
    /// become [`Code::Unknown`].
    pub fn from_i32(value: i32) -> Code {
        match value {
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
            _ => Code::Unknown,
        }
    }

    /// The numeric value written to `grpc-status`.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Derive a code from a non-2xx HTTP status, following the gRPC
    /// HTTP-to-status mapping.
    pub fn from_http_status(status: http::StatusCode) -> Code {
        match status.as_u16() {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// Returns whether this error code indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// ```
    /// use courier_core::Code;
    ///
    /// assert!(Code::Unavailable.is_retryable());
    /// assert!(!Code::NotFound.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code: {0:?}")]
pub struct ParseCodeError(String);

impl FromStr for Code {
    type Err = ParseCodeError;

    /// Accepts both the numeric form used in `grpc-status` and the
    /// snake_case names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.trim().parse::<i32>() {
            return Ok(Code::from_i32(n));
        }
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
            other => Err(ParseCodeError(other.to_string())),
        }
    }
}

/// A self-describing error detail (`google.protobuf.Any`).
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

    /// Get the fully-qualified type URL.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Get the protobuf-encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

#[derive(Clone, PartialEq, prost::Message)]
struct RpcStatusProto {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<AnyProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct AnyProto {
    #[prost(string, tag = "1")]
    type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    value: Vec<u8>,
}

/// The terminal status of a call.
///
/// Carries the code and message from `grpc-status` / `grpc-message`, any
/// details from `grpc-status-details-bin`, and the remaining trailer
/// metadata.
///
/// ```
/// use courier_core::{Code, Status};
///
/// let status = Status::new(Code::NotFound, "room not found");
/// let headers = status.to_header_map();
/// let parsed = Status::from_header_map(&headers).unwrap().unwrap();
/// assert_eq!(parsed.code(), Code::NotFound);
/// assert_eq!(parsed.message(), "room not found");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Status {
    code: Option<Code>,
    message: String,
    details: Vec<ErrorDetail>,
    metadata: HeaderMap,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            details: Vec::new(),
            metadata: HeaderMap::new(),
        }
    }

    /// The OK status.
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code.unwrap_or(Code::Ok)
    }

    /// Get the status message (empty when none was sent).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the decoded error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Trailer metadata other than the reserved `grpc-*` entries.
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Returns true for [`Code::Ok`].
    pub fn is_ok(&self) -> bool {
        self.code() == Code::Ok
    }

    /// Add an error detail.
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Replace the trailer metadata.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Extract a status from a header map (a trailer block or the headers of
    /// a trailers-only response).
    ///
    /// Returns `Ok(None)` when the map carries no `grpc-status`.
    pub fn from_header_map(headers: &HeaderMap) -> Result<Option<Status>, FrameError> {
        let Some(raw) = headers.get(GRPC_STATUS) else {
            return Ok(None);
        };
        let code = raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(Code::from_i32)
            .ok_or_else(|| {
                FrameError::MalformedTrailer(format!("invalid grpc-status value: {raw:?}"))
            })?;

        let message = headers
            .get(GRPC_MESSAGE)
            .map(|v| percent_decode(v.as_bytes()))
            .unwrap_or_default();

        let details = match headers.get(GRPC_STATUS_DETAILS) {
            Some(v) => decode_status_details(v.as_bytes())?,
            None => Vec::new(),
        };

        let mut metadata = HeaderMap::new();
        for (name, value) in headers {
            let n = name.as_str();
            if n != GRPC_STATUS && n != GRPC_MESSAGE && n != GRPC_STATUS_DETAILS {
                metadata.append(name.clone(), value.clone());
            }
        }

        Ok(Some(Status {
            code: Some(code),
            message,
            details,
            metadata,
        }))
    }

    /// Render this status as trailer headers.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = self.metadata.clone();
        headers.insert(
            HeaderName::from_static(GRPC_STATUS),
            HeaderValue::from(self.code().as_i32()),
        );
        if !self.message.is_empty() {
            // percent_encode only emits visible ASCII
            if let Ok(value) = HeaderValue::from_str(&percent_encode(&self.message)) {
                headers.insert(HeaderName::from_static(GRPC_MESSAGE), value);
            }
        }
        if !self.details.is_empty() {
            let proto = RpcStatusProto {
                code: self.code().as_i32(),
                message: self.message.clone(),
                details: self
                    .details
                    .iter()
                    .map(|d| AnyProto {
                        type_url: d.type_url.clone(),
                        value: d.value.clone(),
                    })
                    .collect(),
            };
            let encoded =
                base64::engine::general_purpose::STANDARD_NO_PAD.encode(proto.encode_to_vec());
            if let Ok(value) = HeaderValue::from_str(&encoded) {
                headers.insert(HeaderName::from_static(GRPC_STATUS_DETAILS), value);
            }
        }
        headers
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code())
        } else {
            write!(f, "{}: {}", self.code(), self.message)
        }
    }
}

fn decode_status_details(raw: &[u8]) -> Result<Vec<ErrorDetail>, FrameError> {
    let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(raw)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw))
        .map_err(|e| FrameError::MalformedTrailer(format!("invalid {GRPC_STATUS_DETAILS}: {e}")))?;
    let proto = RpcStatusProto::decode(bytes.as_slice())
        .map_err(|e| FrameError::MalformedTrailer(format!("invalid {GRPC_STATUS_DETAILS}: {e}")))?;
    Ok(proto
        .details
        .into_iter()
        .map(|any| ErrorDetail::new(any.type_url, any.value))
        .collect())
}

/// Percent-encode a `grpc-message` value. Bytes outside visible ASCII and
/// `%` itself are escaped.
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &b in message.as_bytes() {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Decode a percent-encoded `grpc-message`. Invalid escapes are kept verbatim.
fn percent_decode(raw: &[u8]) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            if let (Some(hi), Some(lo)) = (hex(raw[i + 1]), hex(raw[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Framing errors raised while encoding or decoding frames.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Unknown flags byte in a frame header.
    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// Length prefix above the configured limit.
    #[error("frame length {length} exceeds limit of {limit} bytes")]
    TooLarge { length: usize, limit: usize },

    /// The byte stream ended in the middle of a frame.
    #[error("stream ended with {0} bytes of incomplete frame data")]
    Truncated(usize),

    /// A header or trailer block could not be parsed.
    #[error("malformed trailer: {0}")]
    MalformedTrailer(String),

    /// A trailer block without `grpc-status`.
    #[error("trailer is missing grpc-status")]
    MissingStatus,

    /// Decompression failed or the encoding is not supported.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Compression failed.
    #[error("compression failed: {0}")]
    Compression(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_from_i32() {
        assert_eq!(Code::from_i32(0), Code::Ok);
        assert_eq!(Code::from_i32(5), Code::NotFound);
        assert_eq!(Code::from_i32(16), Code::Unauthenticated);
        assert_eq!(Code::from_i32(99), Code::Unknown);
        assert_eq!(Code::from_i32(-1), Code::Unknown);
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!("14".parse::<Code>().unwrap(), Code::Unavailable);
        assert_eq!("not_found".parse::<Code>().unwrap(), Code::NotFound);
        assert_eq!("cancelled".parse::<Code>().unwrap(), Code::Canceled);
        assert!("bogus".parse::<Code>().is_err());
    }

    #[test]
    fn test_code_from_http_status() {
        use http::StatusCode;
        assert_eq!(Code::from_http_status(StatusCode::BAD_REQUEST), Code::Internal);
        assert_eq!(Code::from_http_status(StatusCode::UNAUTHORIZED), Code::Unauthenticated);
        assert_eq!(Code::from_http_status(StatusCode::FORBIDDEN), Code::PermissionDenied);
        assert_eq!(Code::from_http_status(StatusCode::NOT_FOUND), Code::Unimplemented);
        assert_eq!(Code::from_http_status(StatusCode::TOO_MANY_REQUESTS), Code::Unavailable);
        assert_eq!(Code::from_http_status(StatusCode::SERVICE_UNAVAILABLE), Code::Unavailable);
        assert_eq!(Code::from_http_status(StatusCode::IM_A_TEAPOT), Code::Unknown);
    }

    #[test]
    fn test_status_header_roundtrip() {
        let mut meta = HeaderMap::new();
        meta.insert("x-room", HeaderValue::from_static("lobby"));
        let status = Status::new(Code::PermissionDenied, "not a member")
            .with_detail(ErrorDetail::new("type.googleapis.com/google.rpc.ErrorInfo", vec![1, 2, 3]))
            .with_metadata(meta);

        let headers = status.to_header_map();
        assert_eq!(headers.get(GRPC_STATUS).unwrap(), "7");

        let parsed = Status::from_header_map(&headers).unwrap().unwrap();
        assert_eq!(parsed.code(), Code::PermissionDenied);
        assert_eq!(parsed.message(), "not a member");
        assert_eq!(parsed.details().len(), 1);
        assert_eq!(parsed.details()[0].value(), &[1, 2, 3]);
        assert_eq!(parsed.metadata().get("x-room").unwrap(), "lobby");
        assert!(parsed.metadata().get(GRPC_STATUS).is_none());
    }

    #[test]
    fn test_status_missing_grpc_status() {
        let headers = HeaderMap::new();
        assert!(Status::from_header_map(&headers).unwrap().is_none());
    }

    #[test]
    fn test_status_invalid_grpc_status() {
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_STATUS, HeaderValue::from_static("abc"));
        assert!(matches!(
            Status::from_header_map(&headers),
            Err(FrameError::MalformedTrailer(_))
        ));
    }

    #[test]
    fn test_percent_encoding() {
        assert_eq!(percent_encode("hi there"), "hi there");
        assert_eq!(percent_encode("100%"), "100%25");
        assert_eq!(percent_encode("héllo"), "h%C3%A9llo");
        assert_eq!(percent_decode(b"h%C3%A9llo"), "héllo");
        assert_eq!(percent_decode(b"100%25"), "100%");
        assert_eq!(percent_decode(b"bad %zz escape %"), "bad %zz escape %");
    }
}
