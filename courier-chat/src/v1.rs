// Message types for package `chat.v1`, laid out the way prost-build emits them.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub display_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub room_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub sender: ::core::option::Option<User>,
    #[prost(string, tag = "4")]
    pub text: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub sent_at_unix: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendRequest {
    #[prost(string, tag = "1")]
    pub room_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub text: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendResponse {
    #[prost(message, optional, tag = "1")]
    pub message: ::core::option::Option<ChatMessage>,
}

/// Selects a room and, optionally, how many recent messages to return.
///
/// A `limit` of zero means no limit for `History` and no backlog for
/// `ChatStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryRequest {
    #[prost(string, tag = "1")]
    pub room_id: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub limit: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryResponse {
    #[prost(message, repeated, tag = "1")]
    pub messages: ::prost::alloc::vec::Vec<ChatMessage>,
}

/// One event on a room's live stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamEnvelope {
    #[prost(oneof = "stream_envelope::Payload", tags = "1")]
    pub payload: ::core::option::Option<stream_envelope::Payload>,
}

/// Nested message and enum types in `StreamEnvelope`.
pub mod stream_envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Message(super::ChatMessage),
    }
}
