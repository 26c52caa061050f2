//! Channel builder.
//!
//! Provides a fluent API for configuring and building a [`Channel`].

use std::time::Duration;

use bytes::Bytes;
use courier_core::CompressionEncoding;
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use http_body::Body;
use tokio::sync::Semaphore;
use tower_service::Service;

use crate::channel::Channel;
use crate::client::Client;
use crate::config::{ChannelConfig, is_reserved_header};
use crate::error::ClientError;
use crate::transport::{self, BoxTransport, HyperTransport, TlsError, TransportBody};

/// Builder for a [`Channel`].
///
/// # Example
///
/// ```ignore
/// use courier_client::ChannelBuilder;
/// use std::time::Duration;
///
/// let channel = ChannelBuilder::new("https://chat.example.com")
///     .default_deadline(Duration::from_secs(10))
///     .default_header("authorization", "Bearer token123")
///     .max_concurrent_calls(32)
///     .build()?;
/// ```
pub struct ChannelBuilder {
    base_uri: String,
    transport: Option<BoxTransport>,
    default_deadline: Option<Duration>,
    default_headers: HeaderMap,
    invalid_header: Option<String>,
    max_concurrent_calls: usize,
    inbox_capacity: usize,
    outbound_capacity: usize,
    max_message_size: usize,
    reconnect: bool,
    shutdown_timeout: Duration,
    send_compression: CompressionEncoding,
    accept_compression: bool,
}

impl std::fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("base_uri", &self.base_uri)
            .field("transport", &self.transport.is_some())
            .field("default_deadline", &self.default_deadline)
            .field("default_headers", &self.default_headers.len())
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("inbox_capacity", &self.inbox_capacity)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("max_message_size", &self.max_message_size)
            .field("reconnect", &self.reconnect)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("send_compression", &self.send_compression)
            .field("accept_compression", &self.accept_compression)
            .finish()
    }
}

impl ChannelBuilder {
    /// Start a builder for the endpoint at `base_uri`, e.g.
    /// `"https://chat.example.com"`. Calls go to `{base_uri}/{service}/{method}`.
    pub fn new<S: Into<String>>(base_uri: S) -> Self {
        use crate::config::channel_defaults as defaults;
        Self {
            base_uri: base_uri.into(),
            transport: None,
            default_deadline: None,
            default_headers: HeaderMap::new(),
            invalid_header: None,
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

    /// Send requests through a custom tower service instead of the default
    /// [`HyperTransport`].
    ///
    /// ```ignore
    /// let transport = HyperTransport::builder().http2_only(true).build()?;
    /// let channel = ChannelBuilder::new("http://localhost:8080")
    ///     .transport(transport)
    ///     .build()?;
    /// ```
    pub fn transport<S, B>(mut self, service: S) -> Self
    where
        S: Service<http::Request<TransportBody>, Response = http::Response<B>>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
        S::Error: Into<ClientError>,
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<ClientError>,
    {
        self.transport = Some(transport::boxed(service));
        self
    }

    /// Deadline applied to calls that do not set their own.
    pub fn default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Header sent with every call, e.g. credentials.
    ///
    /// An invalid or reserved header makes [`build`](Self::build) fail.
    pub fn default_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Display,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(_)) if is_reserved_header(&name) => {
                self.invalid_header
                    .get_or_insert(format!("header {name} is reserved"));
            }
            (Ok(name), Ok(value)) => {
                self.default_headers.append(name, value);
            }
            (Err(e), _) => {
                self.invalid_header
                    .get_or_insert(format!("invalid header name: {e}"));
            }
            (_, Err(e)) => {
                self.invalid_header
                    .get_or_insert(format!("invalid header value: {e}"));
            }
        }
        self
    }

    /// Maximum calls in flight; further `open`s wait for a slot.
    ///
    /// Default: 100.
    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Frames buffered per call before the read loop stops polling.
    ///
    /// Default: 32.
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Request messages buffered per streaming call before `send` waits.
    ///
    /// Default: 16.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Largest accepted response frame payload, in bytes.
    ///
    /// Default: 4 MiB.
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Reconnect on the next call after the connection was lost.
    ///
    /// Default: true.
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    /// How long [`Channel::close`] waits for in-flight calls.
    ///
    /// Default: 5 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Compress request messages with `encoding`.
    pub fn send_compression(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression = encoding;
        self
    }

    /// Advertise the compiled-in encodings in `grpc-accept-encoding`.
    pub fn accept_compression(mut self, enabled: bool) -> Self {
        self.accept_compression = enabled;
        self
    }

    /// Validate the configuration and build the channel.
    ///
    /// The channel starts `Disconnected` and connects on the first call.
    pub fn build(self) -> Result<Channel, ChannelBuildError> {
        let base_uri = parse_base_uri(&self.base_uri)?;

        if let Some(invalid) = self.invalid_header {
            return Err(ChannelBuildError::InvalidConfig(invalid));
        }
        if self.max_concurrent_calls == 0 || self.max_concurrent_calls > Semaphore::MAX_PERMITS {
            return Err(ChannelBuildError::InvalidConfig(format!(
                "max_concurrent_calls must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        for (name, value) in [
            ("inbox_capacity", self.inbox_capacity),
            ("outbound_capacity", self.outbound_capacity),
            ("max_message_size", self.max_message_size),
        ] {
            if value == 0 {
                return Err(ChannelBuildError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => transport::boxed(HyperTransport::new()?),
        };

        let mut config = ChannelConfig::new(base_uri);
        config.default_deadline = self.default_deadline;
        config.default_headers = self.default_headers;
        config.max_concurrent_calls = self.max_concurrent_calls;
        config.inbox_capacity = self.inbox_capacity;
        config.outbound_capacity = self.outbound_capacity;
        config.max_message_size = self.max_message_size;
        config.reconnect = self.reconnect;
        config.shutdown_timeout = self.shutdown_timeout;
        config.send_compression = self.send_compression;
        config.accept_compression = self.accept_compression;

        Ok(Channel::new(config, transport))
    }

    /// Build the channel and wrap it in a [`Client`].
    pub fn build_client(self) -> Result<Client, ChannelBuildError> {
        self.build().map(Client::new)
    }
}

fn parse_base_uri(raw: &str) -> Result<Uri, ChannelBuildError> {
    let uri: Uri = raw
        .parse()
        .map_err(|e| ChannelBuildError::InvalidUrl(format!("{raw}: {e}")))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => {
            return Err(ChannelBuildError::InvalidUrl(format!(
                "{raw}: unsupported scheme {other}"
            )));
        }
        None => {
            return Err(ChannelBuildError::InvalidUrl(format!("{raw}: missing scheme")));
        }
    }
    if uri.authority().is_none() {
        return Err(ChannelBuildError::InvalidUrl(format!("{raw}: missing host")));
    }
    if uri.query().is_some() {
        return Err(ChannelBuildError::InvalidUrl(format!(
            "{raw}: query strings are not allowed"
        )));
    }
    Ok(uri)
}

/// Error type for channel building failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelBuildError {
    /// The endpoint is not an absolute `http`/`https` URL.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// A setting is out of range.
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The default transport could not set up TLS.
    #[error(transparent)]
    Tls(#[from] TlsError),
}
