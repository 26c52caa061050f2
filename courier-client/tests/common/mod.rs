//! Scripted in-process transport for driving a channel from tests.
//!
//! Every request the channel sends shows up as an [`Exchange`] on the
//! [`MockServer`]; the test decides when and how it is answered.

#![allow(dead_code)]

use bytes::Bytes;
use courier_client::{
    CallShape, Channel, ChannelBuilder, ClientError, MethodDescriptor, TransportBody,
};
use courier_core::{CallId, Decoded, Frame, FrameDecoder, Status, encode};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

pub type BodyItem = Result<http_body::Frame<Bytes>, ClientError>;
pub type MockBody = StreamBody<ReceiverStream<BodyItem>>;
type Reply = Result<http::Response<MockBody>, ClientError>;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Echo {
    #[prost(string, tag = "1")]
    pub text: String,
}

impl Echo {
    pub fn new(text: &str) -> Self {
        Self { text: text.into() }
    }

    pub fn bytes(text: &str) -> Vec<u8> {
        prost::Message::encode_to_vec(&Self::new(text))
    }

    /// A data frame carrying this message, as written on the wire.
    pub fn frame(text: &str) -> Bytes {
        encode(&Frame::data(CallId::new(0), Self::bytes(text)))
    }
}

pub static UNARY: MethodDescriptor<Echo, Echo> =
    MethodDescriptor::prost("test.v1.EchoService", "Echo", CallShape::Unary);
pub static SERVER_STREAM: MethodDescriptor<Echo, Echo> =
    MethodDescriptor::prost("test.v1.EchoService", "Expand", CallShape::ServerStream);
pub static CLIENT_STREAM: MethodDescriptor<Echo, Echo> =
    MethodDescriptor::prost("test.v1.EchoService", "Collect", CallShape::ClientStream);
pub static BIDI: MethodDescriptor<Echo, Echo> =
    MethodDescriptor::prost("test.v1.EchoService", "Chat", CallShape::Bidi);

/// Requests received by the scripted transport.
pub struct MockServer {
    rx: mpsc::UnboundedReceiver<Exchange>,
}

impl MockServer {
    /// Next request, in the order the channel sent them.
    pub async fn next(&mut self) -> Exchange {
        match self.rx.recv().await {
            Some(exchange) => exchange,
            None => panic!("transport dropped"),
        }
    }

    /// The next exchange, if one is already waiting.
    pub fn try_next(&mut self) -> Option<Exchange> {
        self.rx.try_recv().ok()
    }
}

/// Build a channel whose transport hands every request to the returned server.
pub fn mock_channel(builder: ChannelBuilder) -> (Channel, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel::<Exchange>();
    let service = tower::service_fn(move |request: http::Request<TransportBody>| {
        let tx = tx.clone();
        async move {
            let (reply, response) = oneshot::channel::<Reply>();
            tx.send(Exchange {
                request: Some(request),
                reply: Some(reply),
            })
            .map_err(|_| ClientError::transport("mock server gone"))?;
            match response.await {
                Ok(reply) => reply,
                Err(_) => Err(ClientError::connection_lost("exchange dropped")),
            }
        }
    });
    let channel = builder.transport(service).build().unwrap();
    (channel, MockServer { rx })
}

pub fn default_channel() -> (Channel, MockServer) {
    mock_channel(ChannelBuilder::new("http://mock.local"))
}

/// One HTTP exchange awaiting its response.
pub struct Exchange {
    request: Option<http::Request<TransportBody>>,
    reply: Option<oneshot::Sender<Reply>>,
}

impl Exchange {
    pub fn path(&self) -> &str {
        self.request().uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request().headers()
    }

    fn request(&self) -> &http::Request<TransportBody> {
        self.request.as_ref().unwrap()
    }

    /// Take the request body for reading request messages.
    pub fn take_body(&mut self) -> RequestReader {
        let body = self.request.take().unwrap().into_body();
        RequestReader {
            body,
            decoder: FrameDecoder::new(CallId::new(0)),
        }
    }

    /// Answer with a 200 gRPC-Web response and return its body writer.
    pub fn respond(&mut self) -> ResponseWriter {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/grpc-web+proto"),
        );
        self.respond_with(StatusCode::OK, headers)
    }

    pub fn respond_with(&mut self, status: StatusCode, headers: HeaderMap) -> ResponseWriter {
        let (tx, rx) = mpsc::channel(64);
        let mut response = http::Response::new(StreamBody::new(ReceiverStream::new(rx)));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        let _ = self.reply.take().unwrap().send(Ok(response));
        ResponseWriter { tx }
    }

    /// Fail the exchange at the transport level.
    pub fn fail(&mut self, error: ClientError) {
        let _ = self.reply.take().unwrap().send(Err(error));
    }
}

/// Writes gRPC-Web frames into a response body.
pub struct ResponseWriter {
    tx: mpsc::Sender<BodyItem>,
}

impl ResponseWriter {
    pub async fn raw(&self, bytes: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(http_body::Frame::data(bytes.into()))).await;
    }

    pub async fn message(&self, text: &str) {
        self.raw(Echo::frame(text)).await;
    }

    pub async fn trailer(&self, status: &Status) {
        self.raw(encode(&Frame::trailer(CallId::new(0), status))).await;
    }

    pub async fn ok(&self) {
        self.trailer(&Status::ok()).await;
    }

    /// Abort the response body mid-stream.
    pub async fn fail(&self, error: ClientError) {
        let _ = self.tx.send(Err(error)).await;
    }

    /// Whether the client stopped reading this response.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reads request messages out of a streamed request body.
pub struct RequestReader {
    body: TransportBody,
    decoder: FrameDecoder,
}

impl RequestReader {
    /// Next request message, or `None` once the client finished the stream.
    pub async fn next(&mut self) -> Option<Echo> {
        loop {
            if let Decoded::Frame(frame) = self.decoder.decode().unwrap() {
                return Some(prost::Message::decode(frame.payload().as_ref()).unwrap());
            }
            let frame = self.body.frame().await?.unwrap();
            if let Ok(data) = frame.into_data() {
                self.decoder.push(&data);
            }
        }
    }
}
