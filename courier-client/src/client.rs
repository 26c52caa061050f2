//! Typed call facade.
//!
//! [`Client`] binds a [`MethodDescriptor`] and a request to a call on a
//! [`Channel`], one entry point per call shape:
//!
//! | Shape | Method | Returns |
//! |-------|--------|---------|
//! | unary | [`Client::unary`] | [`Response<Res>`] |
//! | server stream | [`Client::server_streaming`] | [`Streaming<Res>`] |
//! | client stream | [`Client::client_streaming`] | [`RequestSink<Req>`] + [`ResponseFuture<Res>`] |
//! | bidi | [`Client::bidi_streaming`] | [`RequestSink<Req>`] + [`Streaming<Res>`] |

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use courier_core::{CallId, Frame, FrameKind, GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Fuse, FusedStream};
use futures::{FutureExt, Stream, StreamExt};

use crate::channel::{CallHandle, Channel, CloseReason};
use crate::config::CallOptions;
use crate::descriptor::{CallShape, Deserializer, MethodDescriptor, Serializer};
use crate::error::ClientError;
use crate::mux::{CallState, Inbox};
use crate::response::{Metadata, Response};

/// Typed entry point for calls on a channel.
///
/// Cheap to clone; clones share the channel.
///
/// ```ignore
/// use courier_client::{CallOptions, ChannelBuilder, Client};
/// use std::time::Duration;
///
/// let client = Client::new(ChannelBuilder::new("https://chat.example.com").build()?);
/// let response = client
///     .unary(&SEND, &request, CallOptions::new().deadline(Duration::from_secs(2)))
///     .await?;
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    channel: Channel,
}

impl Client {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Gracefully close the underlying channel.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    /// One request, exactly one response message.
    ///
    /// Resolves when the trailer arrives. A response with zero or several
    /// messages is a protocol error.
    pub async fn unary<Req, Res>(
        &self,
        descriptor: &MethodDescriptor<Req, Res>,
        request: &Req,
        options: CallOptions,
    ) -> Result<Response<Res>, ClientError>
    where
        Res: Send + 'static,
    {
        check_shape(descriptor, CallShape::Unary)?;
        let payload = descriptor.encode(request)?;
        let handle = self.channel.open(descriptor, &options, Some(payload)).await?;
        let inbox = take_inbox(&handle)?;
        single_response(inbox).await
    }

    /// One request, a stream of responses.
    pub async fn server_streaming<Req, Res>(
        &self,
        descriptor: &MethodDescriptor<Req, Res>,
        request: &Req,
        options: CallOptions,
    ) -> Result<Streaming<Res>, ClientError>
    where
        Res: Send + 'static,
    {
        check_shape(descriptor, CallShape::ServerStream)?;
        let payload = descriptor.encode(request)?;
        let handle = self.channel.open(descriptor, &options, Some(payload)).await?;
        let inbox = take_inbox(&handle)?;
        Ok(Streaming::new(
            self.channel.clone(),
            handle,
            inbox,
            descriptor.deserializer(),
        ))
    }

    /// A stream of requests, one response.
    ///
    /// Push messages into the sink, then call [`RequestSink::done`] (or drop
    /// the sink) and await the response future.
    pub async fn client_streaming<Req, Res>(
        &self,
        descriptor: &MethodDescriptor<Req, Res>,
        options: CallOptions,
    ) -> Result<(RequestSink<Req>, ResponseFuture<Res>), ClientError>
    where
        Res: Send + 'static,
    {
        check_shape(descriptor, CallShape::ClientStream)?;
        let handle = self.channel.open(descriptor, &options, None).await?;
        let inbox = take_inbox(&handle)?;
        let sink = RequestSink::new(self.channel.clone(), handle.clone(), descriptor.serializer());
        let response = ResponseFuture {
            handle,
            channel: self.channel.clone(),
            inner: single_response(inbox).boxed(),
        };
        Ok((sink, response))
    }

    /// Streams in both directions.
    pub async fn bidi_streaming<Req, Res>(
        &self,
        descriptor: &MethodDescriptor<Req, Res>,
        options: CallOptions,
    ) -> Result<(RequestSink<Req>, Streaming<Res>), ClientError>
    where
        Res: Send + 'static,
    {
        check_shape(descriptor, CallShape::Bidi)?;
        let handle = self.channel.open(descriptor, &options, None).await?;
        let inbox = take_inbox(&handle)?;
        let sink = RequestSink::new(self.channel.clone(), handle.clone(), descriptor.serializer());
        let streaming = Streaming::new(
            self.channel.clone(),
            handle,
            inbox,
            descriptor.deserializer(),
        );
        Ok((sink, streaming))
    }
}

impl From<Channel> for Client {
    fn from(channel: Channel) -> Self {
        Self::new(channel)
    }
}

fn check_shape<Req, Res>(
    descriptor: &MethodDescriptor<Req, Res>,
    expected: CallShape,
) -> Result<(), ClientError> {
    if descriptor.shape() == expected {
        Ok(())
    } else {
        Err(ClientError::invalid_state(format!(
            "{} is a {} method, called as {}",
            descriptor.path(),
            descriptor.shape(),
            expected
        )))
    }
}

fn take_inbox(handle: &CallHandle) -> Result<Inbox, ClientError> {
    handle
        .take_inbox()
        .ok_or_else(|| ClientError::invalid_state("response already taken"))
}

/// The error carried by a terminal error frame.
fn terminal_error(inbox: &Inbox, frame: &Frame) -> ClientError {
    inbox.call().error().unwrap_or_else(|| match frame.status() {
        Ok(status) => ClientError::Application(status),
        Err(e) => ClientError::from(e),
    })
}

/// Trailer metadata without the status entries.
fn trailer_metadata(frame: &Frame) -> Result<Metadata, ClientError> {
    let mut trailers = frame.metadata()?;
    for name in [GRPC_STATUS, GRPC_MESSAGE, GRPC_STATUS_DETAILS] {
        trailers.remove(name);
    }
    Ok(Metadata::new(trailers))
}

/// Wait for the response of a unary or client-streaming call.
///
/// The multiplexer decodes the message as it arrives and only queues an OK
/// trailer after exactly one message, so a trailer here means success.
async fn single_response<Res: 'static>(mut inbox: Inbox) -> Result<Response<Res>, ClientError> {
    while let Some(frame) = inbox.recv().await {
        let frame = frame?;
        match frame.kind() {
            FrameKind::Headers | FrameKind::Data => {}
            FrameKind::Trailer => {
                let message = inbox
                    .call()
                    .take_reply::<Res>()
                    .ok_or_else(|| ClientError::protocol("response message missing"))?;
                let trailers = trailer_metadata(&frame)?;
                let headers = inbox.call().headers().cloned().unwrap_or_default();
                return Ok(Response::new(message, headers, trailers));
            }
            FrameKind::Error => return Err(terminal_error(&inbox, &frame)),
        }
    }
    Err(ClientError::protocol("stream ended without trailer"))
}

/// A stream of response messages.
///
/// Yields `Ok(message)` for each data frame and ends after the trailer. A
/// failed call yields one `Err` and then ends. Not restartable.
///
/// Dropping a `Streaming` before it ends cancels the call.
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut stream = client.server_streaming(&CHAT_STREAM, &request, CallOptions::new()).await?;
/// while let Some(message) = stream.next().await {
///     println!("{:?}", message?);
/// }
/// if let Some(trailers) = stream.trailers() {
///     println!("trailers: {:?}", trailers.headers());
/// }
/// ```
pub struct Streaming<T> {
    channel: Channel,
    handle: CallHandle,
    trailers: Arc<OnceLock<Metadata>>,
    inner: Fuse<BoxStream<'static, Result<T, ClientError>>>,
}

struct StreamState<T> {
    channel: Channel,
    handle: CallHandle,
    inbox: Inbox,
    decode: Deserializer<T>,
    trailers: Arc<OnceLock<Metadata>>,
}

impl<T: Send + 'static> Streaming<T> {
    fn new(channel: Channel, handle: CallHandle, inbox: Inbox, decode: Deserializer<T>) -> Self {
        let trailers = Arc::new(OnceLock::new());
        let state = StreamState {
            channel: channel.clone(),
            handle: handle.clone(),
            inbox,
            decode,
            trailers: Arc::clone(&trailers),
        };
        let inner = stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            let (item, next) = next_message(&mut state).await?;
            Some((item, next.then_some(state)))
        })
        .boxed()
        .fuse();

        Self {
            channel,
            handle,
            trailers,
            inner,
        }
    }
}

/// Pull the next message. The flag says whether the stream continues.
async fn next_message<T>(state: &mut StreamState<T>) -> Option<(Result<T, ClientError>, bool)> {
    loop {
        let frame = match state.inbox.recv().await? {
            Ok(frame) => frame,
            Err(e) => return Some((Err(e), false)),
        };
        match frame.kind() {
            FrameKind::Headers => {}
            FrameKind::Data => {
                return match (state.decode)(frame.payload()) {
                    Ok(message) => Some((Ok(message), true)),
                    Err(e) => {
                        let error = ClientError::from(e);
                        state.channel.fail_call(&state.handle, error.clone());
                        Some((Err(error), false))
                    }
                };
            }
            FrameKind::Trailer => {
                return match trailer_metadata(&frame) {
                    Ok(trailers) => {
                        let _ = state.trailers.set(trailers);
                        None
                    }
                    Err(e) => Some((Err(e), false)),
                };
            }
            FrameKind::Error => {
                if let Ok(trailers) = trailer_metadata(&frame) {
                    let _ = state.trailers.set(trailers);
                }
                return Some((Err(terminal_error(&state.inbox, &frame)), false));
            }
        }
    }
}

impl<T> Streaming<T> {
    pub fn call_id(&self) -> CallId {
        self.handle.call_id()
    }

    pub fn state(&self) -> CallState {
        self.handle.state()
    }

    /// The classified failure, once the call ended with one.
    pub fn error(&self) -> Option<ClientError> {
        self.handle.call().error()
    }

    /// Response headers, once received.
    pub fn headers(&self) -> Option<&Metadata> {
        self.handle.call().headers()
    }

    /// Trailing metadata, available after the stream ended.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.trailers.get()
    }

    /// Cancel the call. The stream yields `Cancelled` next.
    pub fn cancel(&self) {
        self.channel.close_call(&self.handle, CloseReason::Cancelled);
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> FusedStream for Streaming<T> {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl<T> std::fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming")
            .field("call_id", &self.call_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The request side of a client-streaming or bidi call.
///
/// Dropping the sink ends the request stream, like [`done`](Self::done).
pub struct RequestSink<Req> {
    channel: Channel,
    handle: CallHandle,
    serialize: Serializer<Req>,
    done: bool,
}

impl<Req> RequestSink<Req> {
    fn new(channel: Channel, handle: CallHandle, serialize: Serializer<Req>) -> Self {
        Self {
            channel,
            handle,
            serialize,
            done: false,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.handle.call_id()
    }

    /// Send one request message, waiting while the outbound queue is full.
    ///
    /// Fails with [`ClientError::InvalidState`] after [`done`](Self::done)
    /// or once the call has terminated.
    pub async fn send(&mut self, message: &Req) -> Result<(), ClientError> {
        if self.done {
            return Err(ClientError::invalid_state("send after done"));
        }
        let payload = (self.serialize)(message)?;
        let frame = self.channel.message_frame(&self.handle, payload)?;
        self.channel.send(&self.handle, frame).await
    }

    /// End the request stream. The response side keeps running.
    pub fn done(&mut self) {
        if !self.done {
            self.done = true;
            self.channel.close_call(&self.handle, CloseReason::Finished);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<Req> Drop for RequestSink<Req> {
    fn drop(&mut self) {
        self.done();
    }
}

impl<Req> std::fmt::Debug for RequestSink<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSink")
            .field("call_id", &self.call_id())
            .field("done", &self.done)
            .finish()
    }
}

/// The single response of a client-streaming call.
///
/// Dropping it before it resolves cancels the call.
pub struct ResponseFuture<Res> {
    channel: Channel,
    handle: CallHandle,
    inner: BoxFuture<'static, Result<Response<Res>, ClientError>>,
}

impl<Res> ResponseFuture<Res> {
    pub fn call_id(&self) -> CallId {
        self.handle.call_id()
    }

    pub fn state(&self) -> CallState {
        self.handle.state()
    }

    /// The classified failure, once the call ended with one.
    pub fn error(&self) -> Option<ClientError> {
        self.handle.call().error()
    }

    pub fn cancel(&self) {
        self.channel.close_call(&self.handle, CloseReason::Cancelled);
    }
}

impl<Res> Future for ResponseFuture<Res> {
    type Output = Result<Response<Res>, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<Res> std::fmt::Debug for ResponseFuture<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("call_id", &self.call_id())
            .finish_non_exhaustive()
    }
}
