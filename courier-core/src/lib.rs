//! Wire types for the courier gRPC-Web client.
//!
//! This crate holds everything that is independent of a live connection:
//!
//! - [`error`]: Status codes, call statuses and framing errors
//! - [`frame`]: The frame model and the restartable frame codec
//! - [`compression`]: Per-message compression

pub mod compression;
pub mod error;
pub mod frame;

pub use compression::*;
pub use error::*;
pub use frame::{
    CallId, DEFAULT_MAX_MESSAGE_SIZE, Decoded, FRAME_HEADER_SIZE, Frame, FrameDecoder, FrameFlags,
    FrameKind, encode, encode_into, parse_header_block,
};
