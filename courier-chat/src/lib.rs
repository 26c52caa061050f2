//! Typed bindings for `chat.v1.ChatService` on top of `courier-client`.
//!
//! ```ignore
//! use courier_chat::{ChatServiceClient, SendRequest};
//! use courier_client::CallOptions;
//!
//! let client = ChatServiceClient::new("http://localhost:8080")?;
//! let response = client
//!     .send(&SendRequest { room_id: "general".into(), text: "hi".into() }, CallOptions::new())
//!     .await?;
//! ```

use courier_client::{
    CallOptions, CallShape, ChannelBuildError, ChannelBuilder, Client, ClientError,
    MethodDescriptor, Response, Streaming,
};

pub mod v1;

pub use v1::stream_envelope::Payload;
pub use v1::{
    ChatMessage, HistoryRequest, HistoryResponse, SendRequest, SendResponse, StreamEnvelope, User,
};

/// Fully qualified service name.
pub const CHAT_SERVICE_NAME: &str = "chat.v1.ChatService";

/// Post a message to a room.
pub static SEND: MethodDescriptor<SendRequest, SendResponse> =
    MethodDescriptor::prost(CHAT_SERVICE_NAME, "Send", CallShape::Unary);

/// Fetch a room's recent messages.
pub static HISTORY: MethodDescriptor<HistoryRequest, HistoryResponse> =
    MethodDescriptor::prost(CHAT_SERVICE_NAME, "History", CallShape::Unary);

/// Follow a room: backlog first, then live messages until cancelled.
pub static CHAT_STREAM: MethodDescriptor<HistoryRequest, StreamEnvelope> =
    MethodDescriptor::prost(CHAT_SERVICE_NAME, "ChatStream", CallShape::ServerStream);

/// Client for `chat.v1.ChatService`.
#[derive(Clone, Debug)]
pub struct ChatServiceClient {
    inner: Client,
}

impl ChatServiceClient {
    /// Connect to `base_url` with default channel settings.
    pub fn new<S: Into<String>>(base_url: S) -> Result<Self, ChannelBuildError> {
        Ok(Self::from_client(ChannelBuilder::new(base_url).build_client()?))
    }

    /// Start from a channel builder for custom settings.
    pub fn builder<S: Into<String>>(base_url: S) -> ChannelBuilder {
        ChannelBuilder::new(base_url)
    }

    pub fn from_client(inner: Client) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub async fn send(
        &self,
        request: &SendRequest,
        options: CallOptions,
    ) -> Result<Response<SendResponse>, ClientError> {
        self.inner.unary(&SEND, request, options).await
    }

    pub async fn history(
        &self,
        request: &HistoryRequest,
        options: CallOptions,
    ) -> Result<Response<HistoryResponse>, ClientError> {
        self.inner.unary(&HISTORY, request, options).await
    }

    /// Subscribe to a room. Drop the stream (or cancel it) to leave.
    pub async fn chat_stream(
        &self,
        request: &HistoryRequest,
        options: CallOptions,
    ) -> Result<Streaming<StreamEnvelope>, ClientError> {
        self.inner
            .server_streaming(&CHAT_STREAM, request, options)
            .await
    }

    /// Gracefully close the underlying channel.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl From<Client> for ChatServiceClient {
    fn from(inner: Client) -> Self {
        Self::from_client(inner)
    }
}
