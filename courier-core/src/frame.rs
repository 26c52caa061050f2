//! gRPC-Web frames and the frame codec.
//!
//! Every message on a gRPC-Web response body is carried in a frame:
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! Data frames carry one serialized message. Trailer frames (flag `0x80`)
//! carry an HTTP/1-style header block with `grpc-status` and friends and end
//! the stream. Header frames (flag `0x40`) carry initial metadata in the same
//! block format; real servers send initial metadata as HTTP headers, so the
//! client synthesizes these and only test servers and bridges put them on
//! the wire.
//!
//! [`FrameDecoder`] is restartable: push network fragments in as they arrive
//! and call [`FrameDecoder::decode`] until it reports [`Decoded::Incomplete`].

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{FrameError, Status};

/// Size of the frame prefix (flags + length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default upper bound for a single frame payload (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Identifier of a logical call on a channel.
///
/// Allocated from a channel-wide counter and never reused while the channel
/// lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CallId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The flags byte of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Uncompressed data.
    pub const NONE: FrameFlags = FrameFlags(0x00);
    /// Compressed data, encoding from `grpc-encoding`.
    pub const COMPRESSED: FrameFlags = FrameFlags(0x01);
    /// Header block with initial metadata.
    pub const HEADERS: FrameFlags = FrameFlags(0x40);
    /// Header block with trailers; ends the stream.
    pub const TRAILER: FrameFlags = FrameFlags(0x80);

    /// Validate a flags byte read off the wire.
    pub fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0x00 | 0x01 | 0x40 | 0x80 => Ok(FrameFlags(bits)),
            other => Err(FrameError::InvalidFlags(other)),
        }
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: FrameFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn is_compressed(&self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub const fn is_end_stream(&self) -> bool {
        self.contains(Self::TRAILER)
    }
}

/// What a frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Initial response metadata.
    Headers,
    /// One serialized message.
    Data,
    /// Trailer block with `grpc-status: 0`.
    Trailer,
    /// Trailer block with a non-zero `grpc-status`.
    Error,
}

impl FrameKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameKind::Trailer | FrameKind::Error)
    }
}

/// A single frame of a call. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    call_id: CallId,
    kind: FrameKind,
    flags: FrameFlags,
    payload: Bytes,
}

impl Frame {
    /// A data frame with an uncompressed message.
    pub fn data(call_id: CallId, payload: impl Into<Bytes>) -> Self {
        Self {
            call_id,
            kind: FrameKind::Data,
            flags: FrameFlags::NONE,
            payload: payload.into(),
        }
    }

    /// A data frame whose payload is already compressed.
    pub fn compressed_data(call_id: CallId, payload: impl Into<Bytes>) -> Self {
        Self {
            call_id,
            kind: FrameKind::Data,
            flags: FrameFlags::COMPRESSED,
            payload: payload.into(),
        }
    }

    /// A headers frame carrying initial metadata.
    pub fn headers(call_id: CallId, headers: &HeaderMap) -> Self {
        Self {
            call_id,
            kind: FrameKind::Headers,
            flags: FrameFlags::HEADERS,
            payload: encode_header_block(headers),
        }
    }

    /// A terminal frame for `status`: [`FrameKind::Trailer`] when the status
    /// is OK, [`FrameKind::Error`] otherwise.
    pub fn trailer(call_id: CallId, status: &Status) -> Self {
        let kind = if status.is_ok() {
            FrameKind::Trailer
        } else {
            FrameKind::Error
        };
        Self {
            call_id,
            kind,
            flags: FrameFlags::TRAILER,
            payload: encode_header_block(&status.to_header_map()),
        }
    }

    /// A terminal frame built from a trailer map, e.g. native HTTP trailers
    /// or the headers of a trailers-only response.
    pub fn from_trailer_map(call_id: CallId, trailers: &HeaderMap) -> Result<Self, FrameError> {
        let status = Status::from_header_map(trailers)?.ok_or(FrameError::MissingStatus)?;
        let kind = if status.is_ok() {
            FrameKind::Trailer
        } else {
            FrameKind::Error
        };
        Ok(Self {
            call_id,
            kind,
            flags: FrameFlags::TRAILER,
            payload: encode_header_block(trailers),
        })
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    /// Parse the header block of a headers, trailer or error frame.
    pub fn metadata(&self) -> Result<HeaderMap, FrameError> {
        match self.kind {
            FrameKind::Data => Ok(HeaderMap::new()),
            _ => parse_header_block(&self.payload),
        }
    }

    /// The status carried by a trailer or error frame.
    pub fn status(&self) -> Result<Status, FrameError> {
        if !self.kind.is_terminal() {
            return Err(FrameError::MissingStatus);
        }
        let block = parse_header_block(&self.payload)?;
        Status::from_header_map(&block)?.ok_or(FrameError::MissingStatus)
    }
}

/// Encode a frame into a new contiguous buffer.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Append the encoded frame to `buf`.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
    buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
    buf.put_u8(frame.flags.bits());
    buf.put_u32(frame.payload.len() as u32);
    buf.extend_from_slice(&frame.payload);
}

/// Result of one [`FrameDecoder::decode`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// More bytes are needed before the next frame is complete.
    Incomplete,
}

/// Incremental decoder for one response stream.
///
/// Each decoder belongs to a single call: every frame it yields is stamped
/// with that call's id.
#[derive(Debug)]
pub struct FrameDecoder {
    call_id: CallId,
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            buffer: BytesMut::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Reject frames whose length prefix exceeds `limit`.
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Append a network fragment.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to take the next complete frame off the buffer.
    pub fn decode(&mut self) -> Result<Decoded, FrameError> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(Decoded::Incomplete);
        }

        let flags = FrameFlags::from_bits(self.buffer[0])?;
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if length > self.max_message_size {
            return Err(FrameError::TooLarge {
                length,
                limit: self.max_message_size,
            });
        }

        let frame_size = FRAME_HEADER_SIZE + length;
        if self.buffer.len() < frame_size {
            self.buffer.reserve(frame_size - self.buffer.len());
            return Ok(Decoded::Incomplete);
        }

        let mut frame_bytes = self.buffer.split_to(frame_size);
        let payload = frame_bytes.split_off(FRAME_HEADER_SIZE).freeze();

        let kind = if flags == FrameFlags::TRAILER {
            let block = parse_header_block(&payload)?;
            let status = Status::from_header_map(&block)?.ok_or(FrameError::MissingStatus)?;
            if status.is_ok() {
                FrameKind::Trailer
            } else {
                FrameKind::Error
            }
        } else if flags == FrameFlags::HEADERS {
            parse_header_block(&payload)?;
            FrameKind::Headers
        } else {
            FrameKind::Data
        };

        Ok(Decoded::Frame(Frame {
            call_id: self.call_id,
            kind,
            flags,
            payload,
        }))
    }

    /// Check that the stream ended on a frame boundary.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated(self.buffer.len()))
        }
    }
}

fn encode_header_block(headers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::new();
    for (name, value) in headers {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.freeze()
}

/// Parse an HTTP/1-style header block (`name: value\r\n` lines).
pub fn parse_header_block(block: &[u8]) -> Result<HeaderMap, FrameError> {
    let mut headers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            FrameError::MalformedTrailer(format!(
                "missing ':' in line {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;
        let name = line[..colon].trim_ascii().to_ascii_lowercase();
        let value = line[colon + 1..].trim_ascii();
        let name = HeaderName::from_bytes(&name)
            .map_err(|e| FrameError::MalformedTrailer(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_bytes(value)
            .map_err(|e| FrameError::MalformedTrailer(format!("invalid header value: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}
