//! gRPC-Web client runtime.
//!
//! This crate multiplexes many concurrent RPCs over one logical channel to a
//! gRPC-Web endpoint. Each call has its own ordered inbox of frames and its own
//! lifecycle; a failure on one call never leaks into another, while the loss
//! of the shared connection fails every call on it.
//!
//! ## Layers
//!
//! - [`Channel`]: Connection lifecycle, request framing and one read loop per call
//! - [`Multiplexer`]: Registry of live [`Call`]s, routing frames to their [`Inbox`]
//! - [`Client`]: Typed facade, one entry point per [`CallShape`]
//!
//! ## Example
//!
//! ```ignore
//! use courier_client::{CallOptions, CallShape, ChannelBuilder, Client, MethodDescriptor};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! static HISTORY: MethodDescriptor<HistoryRequest, ChatMessage> =
//!     MethodDescriptor::prost("chat.v1.ChatService", "History", CallShape::ServerStream);
//!
//! let client = ChannelBuilder::new("https://chat.example.com")
//!     .default_deadline(Duration::from_secs(30))
//!     .build_client()?;
//!
//! let mut stream = client
//!     .server_streaming(&HISTORY, &HistoryRequest { room: "general".into() }, CallOptions::new())
//!     .await?;
//!
//! while let Some(message) = stream.next().await {
//!     println!("{:?}", message?);
//! }
//! ```
//!
//! ## Cancellation
//!
//! A call ends early when its deadline passes, when the
//! [`CancellationToken`] passed in [`CallOptions`] fires, or when the caller
//! drops its [`Streaming`] or [`ResponseFuture`]. Frames still queued in the
//! inbox are discarded and the call reports [`ClientError::Cancelled`] or
//! [`ClientError::DeadlineExceeded`].
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tls` (default) | rustls with ring and the platform's native roots |
//! | `tls-aws-lc` | aws-lc-rs crypto provider |
//! | `tls-webpki-roots` | Bundled Mozilla roots |
//! | `compression-gzip` | Per-message gzip |
//!
//! ## Retry Logic
//!
//! Retries are opt-in and never applied to streaming calls implicitly:
//!
//! ```ignore
//! use courier_client::{RetryPolicy, retry_with_policy};
//!
//! let policy = RetryPolicy::new().max_retries(3);
//! let response = retry_with_policy(&policy, || {
//!     client.unary(&SEND, &request, CallOptions::new())
//! })
//! .await?;
//! ```

mod builder;
mod cancel;
mod channel;
mod client;
pub mod config;
mod descriptor;
mod error;
mod mux;
mod response;
pub mod transport;

pub use builder::{ChannelBuildError, ChannelBuilder};
pub use cancel::CancellationToken;
pub use channel::{CallHandle, Channel, ChannelState, CloseReason, USER_AGENT};
pub use client::{Client, RequestSink, ResponseFuture, Streaming};
pub use config::{CallOptions, ChannelConfig, ExponentialBackoff, RetryPolicy, retry_with_policy};
pub use descriptor::{
    CallShape, Deserializer, MessageEncoding, MessageError, MethodDescriptor, Serializer,
};
pub use error::ClientError;
pub use mux::{Call, CallState, Inbox, Multiplexer};
pub use response::{Metadata, Response};
pub use transport::{HyperTransport, HyperTransportBuilder, TransportBody};

pub use courier_core::{
    CallId, Code, CompressionEncoding, ErrorDetail, Frame, FrameDecoder, FrameError, FrameKind,
    Status,
};

// Re-export prost so generated bindings can depend on one crate.
pub use prost;
