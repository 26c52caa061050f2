//! Transport channel: the HTTP side of every call.
//!
//! A [`Channel`] owns the transport (connection pool) to one endpoint, the
//! call multiplexer and a per-call driver task. Opening a call sends one
//! gRPC-Web HTTP request; the driver reads the response body, decodes
//! frames and delivers them to the call's inbox.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Draining -> Closed
//!        ^                        |
//!        +---- connection lost ---+
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use courier_core::{
    CallId, CompressionEncoding, Decoded, Frame, FrameDecoder, FrameKind, accept_encoding_header,
    encode,
};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request};
use http_body_util::BodyExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::time::Instant;
use tower::ServiceExt;
use tower_service::Service;
use tracing::{Instrument, debug, info_span, trace, warn};

use crate::cancel::CancellationToken;
use crate::config::{CallOptions, ChannelConfig, duration_to_grpc_timeout, is_reserved_header};
use crate::descriptor::MethodDescriptor;
use crate::error::ClientError;
use crate::mux::{Call, CallState, Inbox, Multiplexer};
use crate::transport::{BoxTransport, TransportBody};

/// Sent in `x-user-agent` with every call.
pub const USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Connection state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected; the next `open` connects.
    Disconnected,
    Connecting,
    Open,
    /// `close()` in progress: new calls are rejected, in-flight calls finish.
    Draining,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Draining => "draining",
            ChannelState::Closed => "closed",
        }
    }
}

/// Why a call's request stream is being closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// All request messages were sent (half-close).
    Finished,
    /// The caller gave up on the call.
    Cancelled,
}

/// Handle to an open call on a [`Channel`].
#[derive(Clone, Debug)]
pub struct CallHandle {
    call: Arc<Call>,
}

impl CallHandle {
    pub fn call_id(&self) -> CallId {
        self.call.id()
    }

    pub fn state(&self) -> CallState {
        self.call.state()
    }

    pub fn call(&self) -> &Arc<Call> {
        &self.call
    }

    /// Take the response side of the call. Only the first caller gets it.
    pub fn take_inbox(&self) -> Option<Inbox> {
        self.call.take_inbox()
    }
}

/// A multiplexed gRPC-Web channel to one endpoint.
///
/// Cheap to clone; clones share the connection pool and the call registry.
/// Build one with [`ChannelBuilder`](crate::ChannelBuilder).
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: ChannelConfig,
    transport: BoxTransport,
    mux: Multiplexer,
    state: watch::Sender<ChannelState>,
    permits: Arc<Semaphore>,
    dropped_frames: AtomicU64,
    /// Set once a connection-level failure was observed.
    lost: AtomicBool,
}

impl Channel {
    pub(crate) fn new(config: ChannelConfig, transport: BoxTransport) -> Self {
        let mux = Multiplexer::new(config.inbox_capacity);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            inner: Arc::new(ChannelInner {
                config,
                transport,
                mux,
                state: watch::Sender::new(ChannelState::Disconnected),
                permits,
                dropped_frames: AtomicU64::new(0),
                lost: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Calls registered and not yet terminated.
    pub fn active_calls(&self) -> usize {
        self.inner.mux.active_count()
    }

    /// Outbound frames dropped because their call or the channel was closing.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    /// Begin a logical call.
    ///
    /// With `request` set, that single message is the whole request body
    /// (unary and server-streaming calls). Without it the request body stays
    /// open and is fed through [`send`](Self::send) until
    /// [`close_call`](Self::close_call).
    ///
    /// Fails with [`ClientError::Transport`] when the channel is closed or
    /// cannot connect. Waits for a slot when `max_concurrent_calls` calls are
    /// in flight; that wait honours the call's deadline and cancellation.
    pub async fn open<Req, Res>(
        &self,
        descriptor: &MethodDescriptor<Req, Res>,
        options: &CallOptions,
        request: Option<Bytes>,
    ) -> Result<CallHandle, ClientError>
    where
        Res: Send + 'static,
    {
        if let Some(invalid) = &options.invalid_header {
            return Err(ClientError::invalid_state(invalid.clone()));
        }
        let token = options.cancellation.clone().unwrap_or_default();
        if token.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let timeout = options.deadline.or(self.inner.config.default_deadline);
        // a deadline too far out to represent means no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        self.ensure_open().await?;
        let permit = self.acquire_permit(deadline, &token).await?;

        let path = descriptor.path();
        let shape = descriptor.shape();
        let call = self.inner.mux.register(path.clone(), shape, deadline, token);
        let id = call.id();
        if !shape.is_server_streaming() {
            let decode = descriptor.deserializer();
            call.set_reply_decoder(Box::new(
                move |payload: &[u8]| -> Result<Box<dyn Any + Send>, ClientError> {
                    Ok(Box::new(decode(payload)?))
                },
            ));
        }

        let body = match request {
            Some(message) => match self.inner.message_frame(id, message) {
                Ok(frame) => TransportBody::full(encode(&frame)),
                Err(e) => {
                    self.inner.mux.fail(id, e.clone());
                    return Err(e);
                }
            },
            None => {
                let (tx, rx) = mpsc::channel(self.inner.config.outbound_capacity);
                call.set_outbound(tx);
                TransportBody::queue(rx)
            }
        };

        let request = match self.build_request(&path, descriptor, options, deadline, body) {
            Ok(request) => request,
            Err(e) => {
                self.inner.mux.fail(id, e.clone());
                return Err(e);
            }
        };

        let span = info_span!(
            "rpc.call",
            rpc.method = %path,
            rpc.type = shape.as_str(),
            rpc.call_id = id.get(),
            otel.kind = "client",
        );
        debug!(parent: &span, "call opened");
        let driver = drive(Arc::clone(&self.inner), Arc::clone(&call), request, permit);
        tokio::spawn(driver.instrument(span));

        Ok(CallHandle { call })
    }

    /// Enqueue an outbound frame, waiting while the outbound queue is full.
    ///
    /// Fails with [`ClientError::InvalidState`] once the call is terminal.
    /// Once the call's request stream or the channel is closed, the frame is
    /// dropped and counted in [`dropped_frames`](Self::dropped_frames).
    pub async fn send(&self, handle: &CallHandle, frame: Frame) -> Result<(), ClientError> {
        let call = &handle.call;
        let state = call.state();
        if state.is_terminal() {
            return Err(ClientError::invalid_state(format!(
                "send on {} call {}",
                state.as_str(),
                call.id()
            )));
        }

        let outbound = match self.state() {
            ChannelState::Closed | ChannelState::Disconnected => None,
            _ => call.outbound(),
        };
        let Some(outbound) = outbound else {
            self.inner.record_drop(call.id());
            return Ok(());
        };

        let chunk = encode(&frame);
        tokio::select! {
            biased;
            _ = call.terminated() => Err(ClientError::invalid_state(format!(
                "send on {} call {}",
                call.state().as_str(),
                call.id()
            ))),
            sent = outbound.send(chunk) => {
                match sent {
                    Ok(()) => {
                        call.mark_active();
                        trace!(call_id = %call.id(), len = frame.payload().len(), "frame sent");
                    }
                    Err(_) => self.inner.record_drop(call.id()),
                }
                Ok(())
            }
        }
    }

    /// Build an outbound data frame for `message`, compressed if configured.
    pub fn message_frame(&self, handle: &CallHandle, message: Bytes) -> Result<Frame, ClientError> {
        self.inner.message_frame(handle.call_id(), message)
    }

    /// Deliver an inbound frame to the call's inbox.
    ///
    /// Returns `false` if the call has already terminated.
    pub async fn on_frame(&self, handle: &CallHandle, frame: Frame) -> bool {
        self.inner.on_frame(handle.call_id(), frame).await
    }

    /// Close a call's request stream.
    ///
    /// `Finished` half-closes: the server sees the end of the request body
    /// and the response keeps flowing. `Cancelled` also cancels the call.
    pub fn close_call(&self, handle: &CallHandle, reason: CloseReason) {
        match reason {
            CloseReason::Finished => {
                handle.call.close_outbound();
                debug!(call_id = %handle.call_id(), "request stream finished");
            }
            CloseReason::Cancelled => {
                if self.inner.mux.cancel(handle.call_id()) {
                    debug!(call_id = %handle.call_id(), "call cancelled");
                }
            }
        }
    }

    /// Fail a call with a classified error, e.g. an undecodable response.
    pub(crate) fn fail_call(&self, handle: &CallHandle, error: ClientError) {
        if self.inner.mux.fail(handle.call_id(), error.clone()) {
            debug!(call_id = %handle.call_id(), error = %error, "call failed");
        }
    }

    /// Shut the channel down gracefully.
    ///
    /// New calls are rejected immediately. In-flight calls get up to
    /// `shutdown_timeout` to finish; the rest fail with a transport error.
    pub async fn close(&self) {
        let started = self.inner.state.send_if_modified(|state| match state {
            ChannelState::Draining | ChannelState::Closed => false,
            _ => {
                *state = ChannelState::Draining;
                true
            }
        });
        if !started {
            let mut rx = self.inner.state.subscribe();
            let _ = rx.wait_for(|s| *s == ChannelState::Closed).await;
            return;
        }

        debug!(active = self.active_calls(), "channel draining");
        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.mux.wait_idle())
            .await
            .is_err()
        {
            let failed = self
                .inner
                .mux
                .fail_all(ClientError::transport("channel closed"));
            debug!(failed, "shutdown timeout elapsed, failing remaining calls");
        }
        self.inner.permits.close();
        self.inner.state.send_replace(ChannelState::Closed);
        debug!("channel closed");
    }

    async fn ensure_open(&self) -> Result<(), ClientError> {
        loop {
            let state = *self.inner.state.borrow();
            match state {
                ChannelState::Open => return Ok(()),
                ChannelState::Draining | ChannelState::Closed => {
                    return Err(ClientError::transport("channel closed"));
                }
                ChannelState::Connecting => {
                    let mut rx = self.inner.state.subscribe();
                    let _ = rx.wait_for(|s| *s != ChannelState::Connecting).await;
                }
                ChannelState::Disconnected => {
                    if self.inner.lost.load(Ordering::Acquire)
                        && (!self.inner.config.reconnect || !self.inner.mux.is_empty())
                    {
                        return Err(ClientError::transport("channel disconnected"));
                    }
                    let claimed = self.inner.state.send_if_modified(|s| {
                        if *s == ChannelState::Disconnected {
                            *s = ChannelState::Connecting;
                            true
                        } else {
                            false
                        }
                    });
                    if claimed {
                        self.connect().await?;
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<(), ClientError> {
        let reconnect = self.inner.lost.load(Ordering::Acquire);
        debug!(uri = %self.inner.config.base_uri, reconnect, "connecting");

        let mut transport = self.inner.transport.clone();
        let ready = transport.ready().await.map(|_| ());
        let next = if ready.is_ok() {
            ChannelState::Open
        } else {
            ChannelState::Disconnected
        };
        self.inner.state.send_if_modified(|s| {
            if *s == ChannelState::Connecting {
                *s = next;
                true
            } else {
                false
            }
        });
        if let Err(e) = &ready {
            warn!(error = %e, "connect failed");
        }
        ready
    }

    async fn acquire_permit(
        &self,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, ClientError> {
        let permits = Arc::clone(&self.inner.permits);
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ClientError::Cancelled),
            _ = deadline_elapsed(deadline) => Err(ClientError::DeadlineExceeded),
            permit = permits.acquire_owned() => {
                permit.map_err(|_| ClientError::transport("channel closed"))
            }
        }
    }

    fn build_request<Req, Res>(
        &self,
        path: &str,
        descriptor: &MethodDescriptor<Req, Res>,
        options: &CallOptions,
        deadline: Option<Instant>,
        body: TransportBody,
    ) -> Result<Request<TransportBody>, ClientError> {
        let config = &self.inner.config;
        let uri = config
            .method_uri(path)
            .map_err(|e| ClientError::invalid_state(format!("invalid method path {path}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(descriptor.encoding().content_type()),
        );
        headers.insert("x-grpc-web", HeaderValue::from_static("1"));
        headers.insert("x-user-agent", HeaderValue::from_static(USER_AGENT));
        if let Some(timeout) = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .and_then(duration_to_grpc_timeout)
        {
            if let Ok(value) = HeaderValue::from_str(&timeout) {
                headers.insert("grpc-timeout", value);
            }
        }
        if !config.send_compression.is_identity() {
            headers.insert(
                "grpc-encoding",
                HeaderValue::from_static(config.send_compression.as_str()),
            );
        }
        if config.accept_compression {
            headers.insert(
                "grpc-accept-encoding",
                HeaderValue::from_static(accept_encoding_header()),
            );
        }
        merge_headers(&mut headers, &config.default_headers);
        merge_headers(&mut headers, &options.headers);

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(body)
            .map_err(|e| ClientError::invalid_state(format!("failed to build request: {e}")))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("uri", &self.inner.config.base_uri)
            .field("state", &self.state())
            .field("active_calls", &self.active_calls())
            .finish_non_exhaustive()
    }
}

impl ChannelInner {
    fn message_frame(&self, id: CallId, message: Bytes) -> Result<Frame, ClientError> {
        let encoding = self.config.send_compression;
        if encoding.is_identity() {
            Ok(Frame::data(id, message))
        } else {
            Ok(Frame::compressed_data(id, encoding.compress(message)?))
        }
    }

    async fn on_frame(&self, id: CallId, frame: Frame) -> bool {
        trace!(call_id = %id, kind = ?frame.kind(), len = frame.payload().len(), "frame decoded");
        self.mux.deliver(id, frame).await
    }

    fn record_drop(&self, id: CallId) {
        let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(call_id = %id, dropped, "outbound frame dropped on closing call");
    }

    /// Tear down after a connection-level failure: every active call fails.
    fn connection_lost(&self, error: &ClientError) {
        self.lost.store(true, Ordering::Release);
        self.state.send_if_modified(|s| match s {
            ChannelState::Open | ChannelState::Connecting => {
                *s = ChannelState::Disconnected;
                true
            }
            _ => false,
        });
        let failed = self
            .mux
            .fail_all(ClientError::connection_lost("connection lost"));
        warn!(error = %error, failed, "connection lost");
    }
}

/// Per-call driver: runs the HTTP exchange until the call terminates.
async fn drive(
    inner: Arc<ChannelInner>,
    call: Arc<Call>,
    request: Request<TransportBody>,
    _permit: OwnedSemaphorePermit,
) {
    let id = call.id();
    tokio::select! {
        biased;
        _ = call.terminated() => {}
        _ = deadline_elapsed(call.deadline()) => {
            if inner.mux.fail(id, ClientError::DeadlineExceeded) {
                debug!("deadline exceeded");
            }
        }
        _ = call.token().cancelled() => {
            if inner.mux.cancel(id) {
                debug!("call cancelled by token");
            }
        }
        result = exchange(&inner, &call, request) => {
            if let Err(error) = result {
                if error.is_connection_lost() {
                    inner.connection_lost(&error);
                } else if inner.mux.fail(id, error.clone()) {
                    debug!(error = %error, "call failed");
                }
            }
        }
    }
    inner.mux.remove(id);
    debug!(state = call.state().as_str(), "call closed");
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Send the request and pump the response body into the call's inbox.
async fn exchange(
    inner: &ChannelInner,
    call: &Call,
    request: Request<TransportBody>,
) -> Result<(), ClientError> {
    let id = call.id();
    let mut transport = inner.transport.clone();
    let response = transport.ready().await?.call(request).await?;
    let (parts, mut body) = response.into_parts();

    if parts.headers.contains_key(courier_core::GRPC_STATUS) {
        // trailers-only response
        let frame = Frame::from_trailer_map(id, &parts.headers)?;
        inner.on_frame(id, frame).await;
        return Ok(());
    }
    if !parts.status.is_success() {
        return Err(ClientError::from_http_status(parts.status));
    }

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_grpc_web_content_type(content_type) {
        return Err(ClientError::protocol(format!(
            "unexpected content-type {content_type:?}"
        )));
    }
    let grpc_encoding = parts
        .headers
        .get("grpc-encoding")
        .map(|v| v.to_str().unwrap_or_default());
    let encoding = CompressionEncoding::from_header(grpc_encoding).ok_or_else(|| {
        ClientError::protocol(format!("unsupported grpc-encoding {grpc_encoding:?}"))
    })?;

    call.set_headers(parts.headers.clone());
    if !inner.on_frame(id, Frame::headers(id, &parts.headers)).await {
        return Ok(());
    }

    let limit = inner.config.max_message_size;
    let mut decoder = FrameDecoder::new(id).with_max_message_size(limit);
    while let Some(frame) = body.frame().await {
        let data = match frame?.into_data() {
            Ok(data) => data,
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    decoder.finish()?;
                    let frame = Frame::from_trailer_map(id, &trailers)?;
                    inner.on_frame(id, frame).await;
                    return Ok(());
                }
                continue;
            }
        };

        decoder.push(&data);
        while let Decoded::Frame(frame) = decoder.decode()? {
            let terminal = frame.kind().is_terminal();
            let frame = decompress(frame, encoding, limit)?;
            if !inner.on_frame(id, frame).await || terminal {
                return Ok(());
            }
        }
    }

    decoder.finish()?;
    Err(ClientError::protocol("stream ended without trailer"))
}

fn decompress(
    frame: Frame,
    encoding: CompressionEncoding,
    limit: usize,
) -> Result<Frame, ClientError> {
    if frame.kind() != FrameKind::Data || !frame.flags().is_compressed() {
        return Ok(frame);
    }
    let id = frame.call_id();
    let payload = encoding.decompress(frame.into_payload(), limit)?;
    Ok(Frame::data(id, payload))
}

pub(crate) fn is_grpc_web_content_type(content_type: &str) -> bool {
    content_type == "application/grpc-web" || content_type.starts_with("application/grpc-web+")
}

/// Copy `extra` into `headers`, replacing earlier values and skipping
/// headers the runtime owns.
fn merge_headers(headers: &mut HeaderMap, extra: &HeaderMap) {
    let names: Vec<&HeaderName> = extra.keys().collect();
    for name in names {
        if is_reserved_header(name) {
            continue;
        }
        headers.remove(name);
        for value in extra.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}
