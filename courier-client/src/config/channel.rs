//! Channel-wide configuration.

use std::time::Duration;

use courier_core::CompressionEncoding;
use http::{HeaderMap, Uri};

/// Default channel settings.
pub mod defaults {
    use std::time::Duration;

    pub const MAX_CONCURRENT_CALLS: usize = 100;
    /// Frames buffered per call before the read loop stops polling the body.
    pub const INBOX_CAPACITY: usize = 32;
    /// Request messages buffered per streaming call before `send` waits.
    pub const OUTBOUND_CAPACITY: usize = 16;
    pub const MAX_MESSAGE_SIZE: usize = courier_core::DEFAULT_MAX_MESSAGE_SIZE;
    pub const RECONNECT: bool = true;
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Settings shared by every call on a [`Channel`](crate::Channel).
///
/// Built and validated by [`ChannelBuilder`](crate::ChannelBuilder).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub(crate) base_uri: Uri,
    pub(crate) default_deadline: Option<Duration>,
    pub(crate) default_headers: HeaderMap,
    pub(crate) max_concurrent_calls: usize,
    pub(crate) inbox_capacity: usize,
    pub(crate) outbound_capacity: usize,
    pub(crate) max_message_size: usize,
    pub(crate) reconnect: bool,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) send_compression: CompressionEncoding,
    pub(crate) accept_compression: bool,
}

impl ChannelConfig {
    pub(crate) fn new(base_uri: Uri) -> Self {
        Self {
            base_uri,
            default_deadline: None,
            default_headers: HeaderMap::new(),
            max_concurrent_calls: defaults::MAX_CONCURRENT_CALLS,
            inbox_capacity: defaults::INBOX_CAPACITY,
            outbound_capacity: defaults::OUTBOUND_CAPACITY,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            reconnect: defaults::RECONNECT,
            shutdown_timeout: defaults::SHUTDOWN_TIMEOUT,
            send_compression: CompressionEncoding::Identity,
            accept_compression: false,
        }
    }

    /// The endpoint every call is sent to.
    pub fn base_uri(&self) -> &Uri {
        &self.base_uri
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn send_compression(&self) -> CompressionEncoding {
        self.send_compression
    }

    pub fn accept_compression(&self) -> bool {
        self.accept_compression
    }

    /// Build the absolute URI for a method path (`/{service}/{method}`).
    pub(crate) fn method_uri(&self, path: &str) -> Result<Uri, http::Error> {
        let base_path = self.base_uri.path().trim_end_matches('/');
        let mut parts = self.base_uri.clone().into_parts();
        parts.path_and_query = Some(format!("{base_path}{path}").parse()?);
        Ok(Uri::from_parts(parts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::new(Uri::from_static("http://localhost:8080"));
        assert_eq!(config.max_concurrent_calls(), 100);
        assert_eq!(config.inbox_capacity(), 32);
        assert_eq!(config.outbound_capacity(), 16);
        assert_eq!(config.max_message_size(), 4 * 1024 * 1024);
        assert!(config.reconnect());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.default_deadline().is_none());
    }

    #[test]
    fn test_method_uri() {
        let config = ChannelConfig::new(Uri::from_static("http://localhost:8080"));
        assert_eq!(
            config.method_uri("/chat.v1.ChatService/Send").unwrap(),
            "http://localhost:8080/chat.v1.ChatService/Send"
        );

        let config = ChannelConfig::new(Uri::from_static("https://api.example.com/rpc/"));
        assert_eq!(
            config.method_uri("/chat.v1.ChatService/Send").unwrap(),
            "https://api.example.com/rpc/chat.v1.ChatService/Send"
        );
    }
}
