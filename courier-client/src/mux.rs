//! Call multiplexer: routes inbound frames to per-call inboxes.
//!
//! Every in-flight call is registered under a unique [`CallId`]. Inbound
//! frames are delivered into the call's bounded inbox in arrival order.
//! Each call runs a one-way state machine:
//!
//! ```text
//! Pending -> Active -> Completed | Failed | Cancelled
//! ```
//!
//! The terminal outcome is written exactly once, before any consumer is
//! woken, so every observer sees the same classification.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use courier_core::{CallId, Frame, FrameKind};
use dashmap::DashMap;
use http::HeaderMap;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;

use crate::cancel::CancellationToken;
use crate::descriptor::CallShape;
use crate::error::ClientError;
use crate::response::Metadata;

/// Lifecycle state of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Registered; nothing exchanged yet.
    Pending,
    /// At least one frame written or delivered.
    Active,
    /// Finished with an OK trailer.
    Completed,
    /// Error trailer, protocol violation, deadline expiry or transport loss.
    Failed,
    /// Cancelled by the caller before a terminal outcome.
    Cancelled,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Pending => "pending",
            CallState::Active => "active",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
            CallState::Cancelled => "cancelled",
        }
    }
}

/// How a call reached its terminal state.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    /// A trailer frame was queued; frames before it are still delivered.
    Trailer(Result<(), ClientError>),
    /// The call was cut short; queued frames are discarded.
    Aborted(ClientError),
}

/// Decodes the single response message of a unary or client-streaming call.
pub(crate) type ReplyDecoder =
    Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, ClientError> + Send + Sync>;

/// Shared record of one logical call.
pub struct Call {
    id: CallId,
    path: String,
    shape: CallShape,
    deadline: Option<Instant>,
    token: CancellationToken,
    state: watch::Sender<CallState>,
    outcome: OnceLock<Outcome>,
    headers: OnceLock<Metadata>,
    inbox_tx: mpsc::Sender<Frame>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    data_frames: AtomicUsize,
    reply_decoder: OnceLock<ReplyDecoder>,
    reply: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Call {
    fn new(
        id: CallId,
        path: String,
        shape: CallShape,
        deadline: Option<Instant>,
        token: CancellationToken,
        inbox_capacity: usize,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity);
        Self {
            id,
            path,
            shape,
            deadline,
            token,
            state: watch::Sender::new(CallState::Pending),
            outcome: OnceLock::new(),
            headers: OnceLock::new(),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            outbound: Mutex::new(None),
            data_frames: AtomicUsize::new(0),
            reply_decoder: OnceLock::new(),
            reply: Mutex::new(None),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    /// Procedure path, `/{service}/{method}`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Response headers, once the server sent them.
    pub fn headers(&self) -> Option<&Metadata> {
        self.headers.get()
    }

    /// The classified failure, if the call ended with one.
    pub fn error(&self) -> Option<ClientError> {
        match self.outcome.get()? {
            Outcome::Trailer(Ok(())) => None,
            Outcome::Trailer(Err(e)) | Outcome::Aborted(e) => Some(e.clone()),
        }
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    pub(crate) fn set_headers(&self, headers: HeaderMap) {
        let _ = self.headers.set(Metadata::new(headers));
    }

    /// Take the consuming end of the inbox. Only the first caller gets it.
    pub fn take_inbox(self: &Arc<Self>) -> Option<Inbox> {
        let rx = lock(&self.inbox_rx).take()?;
        Some(Inbox {
            call: Arc::clone(self),
            rx,
            state_rx: self.state.subscribe(),
            finished: false,
        })
    }

    /// Decode the response message as it arrives. Must be set before the
    /// first frame is delivered.
    pub(crate) fn set_reply_decoder(&self, decoder: ReplyDecoder) {
        let _ = self.reply_decoder.set(decoder);
    }

    /// Take the decoded response message of a single-response call.
    pub(crate) fn take_reply<T: 'static>(&self) -> Option<T> {
        let reply = lock(&self.reply).take()?;
        reply.downcast::<T>().ok().map(|reply| *reply)
    }

    /// Whether the call expects exactly one response message.
    fn single_response(&self) -> bool {
        !self.shape.is_server_streaming()
    }

    /// Count and decode a response message of a single-response call.
    fn accept_reply(&self, payload: &[u8]) -> Result<(), ClientError> {
        let seen = self.data_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if seen > 1 {
            return Err(ClientError::protocol(format!(
                "expected exactly one response message, got {seen}"
            )));
        }
        if let Some(decode) = self.reply_decoder.get() {
            *lock(&self.reply) = Some(decode(payload)?);
        }
        Ok(())
    }

    pub(crate) fn set_outbound(&self, tx: mpsc::Sender<Bytes>) {
        *lock(&self.outbound) = Some(tx);
    }

    /// The outbound queue, while the request stream is still open.
    pub(crate) fn outbound(&self) -> Option<mpsc::Sender<Bytes>> {
        lock(&self.outbound).clone()
    }

    /// Finish the request stream.
    pub(crate) fn close_outbound(&self) {
        lock(&self.outbound).take();
    }

    pub(crate) fn mark_active(&self) {
        self.state.send_if_modified(|state| {
            if *state == CallState::Pending {
                *state = CallState::Active;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the call is in a terminal state.
    pub async fn terminated(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(CallState::is_terminal).await;
    }

    /// Cancel the call. Returns false if it had already terminated.
    pub fn cancel(&self) -> bool {
        self.abort(CallState::Cancelled, ClientError::Cancelled)
    }

    /// Move to `state` with an abort outcome, discarding queued frames.
    fn abort(&self, state: CallState, error: ClientError) -> bool {
        let aborted = self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            let _ = self.outcome.set(Outcome::Aborted(error));
            *current = state;
            true
        });
        if aborted {
            self.close_outbound();
        }
        aborted
    }

    /// Queue `frame` in the inbox, waiting for capacity.
    ///
    /// Returns false if the call terminated first or the consumer is gone.
    async fn deliver(&self, frame: Frame) -> bool {
        let permit = tokio::select! {
            biased;
            _ = self.terminated() => return false,
            permit = self.inbox_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        // a single-response call is classified before its trailer is queued
        let checked = match frame.kind() {
            FrameKind::Data if self.single_response() => self.accept_reply(frame.payload()),
            FrameKind::Trailer if self.single_response() => {
                match self.data_frames.load(Ordering::Relaxed) {
                    1 => Ok(()),
                    n => Err(ClientError::protocol(format!(
                        "expected exactly one response message, got {n}"
                    ))),
                }
            }
            _ => Ok(()),
        };
        if let Err(error) = checked {
            drop(permit);
            self.abort(CallState::Failed, error);
            return false;
        }

        if frame.kind().is_terminal() {
            let outcome = match frame.status() {
                Ok(status) if status.is_ok() => Ok(()),
                Ok(status) => Err(ClientError::Application(status)),
                Err(e) => Err(ClientError::from(e)),
            };
            let next = if outcome.is_ok() {
                CallState::Completed
            } else {
                CallState::Failed
            };
            let delivered = self.state.send_if_modified(|current| {
                if current.is_terminal() {
                    return false;
                }
                permit.send(frame);
                let _ = self.outcome.set(Outcome::Trailer(outcome));
                *current = next;
                true
            });
            if delivered {
                self.close_outbound();
            }
            delivered
        } else {
            let delivered = {
                let state = self.state.borrow();
                if state.is_terminal() {
                    false
                } else {
                    permit.send(frame);
                    true
                }
            };
            if delivered {
                self.mark_active();
            }
            delivered
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consuming end of a call's inbox.
///
/// Yields frames in arrival order. A trailer ends the sequence after the
/// frames queued before it; a cancellation, deadline or transport failure
/// ends it immediately with the error, dropping anything still queued.
///
/// Dropping an inbox before the call finished cancels the call.
pub struct Inbox {
    call: Arc<Call>,
    rx: mpsc::Receiver<Frame>,
    state_rx: watch::Receiver<CallState>,
    finished: bool,
}

impl Inbox {
    pub fn call(&self) -> &Arc<Call> {
        &self.call
    }

    /// Next frame, or the error that ended the call.
    ///
    /// Returns `None` after the terminal frame or error has been returned.
    pub async fn recv(&mut self) -> Option<Result<Frame, ClientError>> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(Outcome::Aborted(error)) = self.call.outcome.get() {
                self.finished = true;
                self.rx.close();
                return Some(Err(error.clone()));
            }
            tokio::select! {
                biased;
                Ok(()) = self.state_rx.changed() => continue,
                frame = self.rx.recv() => match frame {
                    Some(frame) => {
                        if frame.kind().is_terminal() {
                            self.finished = true;
                        }
                        tracing::trace!(call_id = %self.call.id, kind = ?frame.kind(), "frame received");
                        return Some(Ok(frame));
                    }
                    None => {
                        self.finished = true;
                        return None;
                    }
                },
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        if !self.finished && self.call.cancel() {
            tracing::debug!(call_id = %self.call.id, "inbox dropped, call cancelled");
        }
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("call_id", &self.call.id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Registry of in-flight calls on one channel.
pub struct Multiplexer {
    calls: DashMap<CallId, Arc<Call>>,
    next_id: AtomicU64,
    inbox_capacity: usize,
    idle: Notify,
}

impl Multiplexer {
    #[must_use]
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(1),
            inbox_capacity: inbox_capacity.max(1),
            idle: Notify::new(),
        }
    }

    /// Register a new call under a fresh identifier.
    pub fn register(
        &self,
        path: impl Into<String>,
        shape: CallShape,
        deadline: Option<Instant>,
        token: CancellationToken,
    ) -> Arc<Call> {
        let id = CallId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let call = Arc::new(Call::new(
            id,
            path.into(),
            shape,
            deadline,
            token,
            self.inbox_capacity,
        ));
        self.calls.insert(id, Arc::clone(&call));
        call
    }

    pub fn get(&self, id: CallId) -> Option<Arc<Call>> {
        self.calls.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Deliver an inbound frame to its call, waiting for inbox capacity.
    ///
    /// Returns `true` if the frame was queued. Frames for unknown or
    /// terminated calls are dropped.
    pub async fn deliver(&self, id: CallId, frame: Frame) -> bool {
        let Some(call) = self.get(id) else {
            tracing::warn!(call_id = %id, "frame for unknown call dropped");
            return false;
        };
        let delivered = call.deliver(frame).await;
        if call.is_terminal() {
            self.remove(id);
        }
        delivered
    }

    /// Fail a call with `error`. Returns false if it had already terminated.
    pub fn fail(&self, id: CallId, error: ClientError) -> bool {
        let failed = self
            .get(id)
            .is_some_and(|call| call.abort(CallState::Failed, error));
        self.remove(id);
        failed
    }

    /// Cancel a call. Returns false if it had already terminated.
    pub fn cancel(&self, id: CallId) -> bool {
        let cancelled = self.get(id).is_some_and(|call| call.cancel());
        self.remove(id);
        cancelled
    }

    /// Fail every registered call with `error`. Returns how many failed.
    pub fn fail_all(&self, error: ClientError) -> usize {
        let calls: Vec<Arc<Call>> = self
            .calls
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut failed = 0;
        for call in calls {
            if call.abort(CallState::Failed, error.clone()) {
                failed += 1;
            }
            self.remove(call.id);
        }
        failed
    }

    /// Drop a call from the registry. Idempotent.
    pub(crate) fn remove(&self, id: CallId) {
        self.calls.remove(&id);
        if self.calls.is_empty() {
            self.idle.notify_waiters();
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Resolves once no calls are registered.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.calls.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("active", &self.calls.len())
            .field("inbox_capacity", &self.inbox_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Code, FrameKind, Status};
    use std::time::Duration;

    fn register(mux: &Multiplexer) -> Arc<Call> {
        mux.register(
            "/chat.v1.ChatService/ChatStream",
            CallShape::ServerStream,
            None,
            CancellationToken::new(),
        )
    }

    fn register_unary(mux: &Multiplexer) -> Arc<Call> {
        let call = mux.register(
            "/chat.v1.ChatService/Send",
            CallShape::Unary,
            None,
            CancellationToken::new(),
        );
        call.set_reply_decoder(Box::new(
            |payload: &[u8]| -> Result<Box<dyn Any + Send>, ClientError> {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| ClientError::protocol(format!("invalid reply: {e}")))?;
                Ok(Box::new(text.to_string()))
            },
        ));
        call
    }

    #[test]
    fn test_unique_ids() {
        let mux = Multiplexer::new(4);
        let a = register(&mux);
        let b = register(&mux);
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
        assert_eq!(mux.active_count(), 2);
    }

    #[tokio::test]
    async fn test_deliver_in_order_then_complete() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let id = call.id();
        let mut inbox = call.take_inbox().unwrap();
        assert!(call.take_inbox().is_none());

        assert!(mux.deliver(id, Frame::data(id, "one")).await);
        assert_eq!(call.state(), CallState::Active);
        assert!(mux.deliver(id, Frame::data(id, "two")).await);
        assert!(mux.deliver(id, Frame::trailer(id, &Status::ok())).await);

        assert_eq!(call.state(), CallState::Completed);
        assert!(mux.is_empty());
        assert!(call.error().is_none());

        let first = inbox.recv().await.unwrap().unwrap();
        assert_eq!(first.payload().as_ref(), b"one");
        let second = inbox.recv().await.unwrap().unwrap();
        assert_eq!(second.payload().as_ref(), b"two");
        let trailer = inbox.recv().await.unwrap().unwrap();
        assert_eq!(trailer.kind(), FrameKind::Trailer);
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_error_trailer_fails_call() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let id = call.id();

        let status = Status::new(Code::NotFound, "no such room");
        assert!(mux.deliver(id, Frame::trailer(id, &status)).await);

        assert_eq!(call.state(), CallState::Failed);
        let err = call.error().unwrap();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_no_delivery_after_terminal() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let id = call.id();

        assert!(mux.deliver(id, Frame::trailer(id, &Status::ok())).await);
        // removed from the registry
        assert!(!mux.deliver(id, Frame::data(id, "late")).await);
        // and the record itself refuses
        assert!(!call.deliver(Frame::data(id, "late")).await);
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_frames() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let id = call.id();
        let mut inbox = call.take_inbox().unwrap();

        for i in 0..3 {
            assert!(mux.deliver(id, Frame::data(id, vec![i])).await);
        }
        assert!(mux.cancel(id));
        assert!(!mux.cancel(id));
        assert_eq!(call.state(), CallState::Cancelled);

        let next = inbox.recv().await.unwrap();
        assert!(matches!(next, Err(ClientError::Cancelled)));
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let id = call.id();

        assert!(mux.fail(id, ClientError::DeadlineExceeded));
        assert!(!call.cancel());
        assert_eq!(call.state(), CallState::Failed);
        assert!(matches!(call.error(), Some(ClientError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mux = Multiplexer::new(8);
        let a = register(&mux);
        let b = register(&mux);
        let mut inbox_a = a.take_inbox().unwrap();

        let failed = mux.fail_all(ClientError::connection_lost("connection lost"));
        assert_eq!(failed, 2);
        assert!(mux.is_empty());
        assert_eq!(b.state(), CallState::Failed);

        let err = inbox_a.recv().await.unwrap().unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_waits_for_capacity() {
        let mux = Arc::new(Multiplexer::new(1));
        let call = register(&mux);
        let id = call.id();
        let mut inbox = call.take_inbox().unwrap();

        assert!(mux.deliver(id, Frame::data(id, "a")).await);

        let blocked = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.deliver(id, Frame::data(id, "b")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        assert_eq!(inbox.recv().await.unwrap().unwrap().payload().as_ref(), b"a");
        assert!(blocked.await.unwrap());
        assert_eq!(inbox.recv().await.unwrap().unwrap().payload().as_ref(), b"b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_blocked_deliver() {
        let mux = Arc::new(Multiplexer::new(1));
        let call = register(&mux);
        let id = call.id();
        let _inbox = call.take_inbox().unwrap();

        assert!(mux.deliver(id, Frame::data(id, "a")).await);
        let blocked = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.deliver(id, Frame::data(id, "b")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        mux.cancel(id);
        assert!(!blocked.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropping_inbox_cancels() {
        let mux = Multiplexer::new(8);
        let call = register(&mux);
        let inbox = call.take_inbox().unwrap();
        drop(inbox);
        assert_eq!(call.state(), CallState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle() {
        let mux = Arc::new(Multiplexer::new(8));
        mux.wait_idle().await;

        let call = register(&mux);
        let waiter = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        mux.cancel(call.id());
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_unary_reply_decoded_on_arrival() {
        let mux = Multiplexer::new(8);
        let call = register_unary(&mux);
        let id = call.id();

        assert!(mux.deliver(id, Frame::data(id, "hello")).await);
        assert!(mux.deliver(id, Frame::trailer(id, &Status::ok())).await);
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(call.take_reply::<String>().as_deref(), Some("hello"));
        assert!(call.take_reply::<String>().is_none());
    }

    #[tokio::test]
    async fn test_unary_ok_trailer_without_message_fails() {
        let mux = Multiplexer::new(8);
        let call = register_unary(&mux);
        let id = call.id();
        let mut inbox = call.take_inbox().unwrap();

        assert!(!mux.deliver(id, Frame::trailer(id, &Status::ok())).await);
        assert_eq!(call.state(), CallState::Failed);
        assert!(mux.is_empty());

        let stored = call.error().unwrap();
        assert!(matches!(stored, ClientError::Protocol(_)));
        assert_eq!(
            stored.message(),
            Some("expected exactly one response message, got 0")
        );
        assert_eq!(call.error().unwrap().message(), stored.message());

        let seen = inbox.recv().await.unwrap().unwrap_err();
        assert_eq!(seen.message(), stored.message());
    }

    #[tokio::test]
    async fn test_unary_second_message_fails_before_trailer() {
        let mux = Multiplexer::new(8);
        let call = register_unary(&mux);
        let id = call.id();
        let mut inbox = call.take_inbox().unwrap();

        assert!(mux.deliver(id, Frame::data(id, "one")).await);
        assert!(!mux.deliver(id, Frame::data(id, "two")).await);
        assert_eq!(call.state(), CallState::Failed);
        assert!(!mux.deliver(id, Frame::trailer(id, &Status::ok())).await);

        let err = inbox.recv().await.unwrap().unwrap_err();
        assert_eq!(
            err.message(),
            Some("expected exactly one response message, got 2")
        );
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unary_undecodable_reply_fails() {
        let mux = Multiplexer::new(8);
        let call = register_unary(&mux);
        let id = call.id();

        assert!(!mux.deliver(id, Frame::data(id, vec![0xff, 0xfe])).await);
        assert_eq!(call.state(), CallState::Failed);
        assert!(
            call.error()
                .unwrap()
                .message()
                .unwrap()
                .starts_with("invalid reply")
        );
    }

    #[tokio::test]
    async fn test_unknown_call_frame_dropped() {
        let mux = Multiplexer::new(8);
        let id = CallId::new(42);
        assert!(!mux.deliver(id, Frame::data(id, "x")).await);
    }
}
