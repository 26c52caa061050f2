//! End-to-end behaviour of the four call shapes over a scripted transport.

mod common;

use common::{BIDI, CLIENT_STREAM, Echo, SERVER_STREAM, UNARY, default_channel};
use courier_client::{CallOptions, CallState, Client, ClientError, Code, Status};
use futures::StreamExt;
use futures::stream::FusedStream;
use http::{HeaderMap, HeaderValue, StatusCode};

#[tokio::test]
async fn unary_round_trip() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .unary(&UNARY, &Echo::new("hello"), CallOptions::new().header("x-room", "general"))
                .await
        }
    });

    let mut exchange = server.next().await;
    assert_eq!(exchange.path(), "/test.v1.EchoService/Echo");
    let headers = exchange.headers();
    assert_eq!(headers["content-type"], "application/grpc-web+proto");
    assert_eq!(headers["x-grpc-web"], "1");
    assert!(headers["x-user-agent"].to_str().unwrap().starts_with("courier/"));
    assert_eq!(headers["x-room"], "general");
    assert!(headers.get("grpc-timeout").is_none());

    let writer = exchange.respond();
    let mut request = exchange.take_body();
    assert_eq!(request.next().await, Some(Echo::new("hello")));
    assert_eq!(request.next().await, None);

    writer.message("hello back").await;
    writer.ok().await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.text, "hello back");
    assert_eq!(
        response.headers().get("content-type"),
        Some("application/grpc-web+proto")
    );
    assert!(response.trailers().get("grpc-status").is_none());
    assert_eq!(client.channel().active_calls(), 0);
}

#[tokio::test]
async fn unary_error_trailer() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
    });

    let mut exchange = server.next().await;
    let writer = exchange.respond();
    writer
        .trailer(&Status::new(Code::NotFound, "no such room"))
        .await;

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), Some("no such room"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unary_requires_exactly_one_message() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    for count in [0usize, 2] {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
        });

        let mut exchange = server.next().await;
        let writer = exchange.respond();
        for i in 0..count {
            writer.message(&format!("m{i}")).await;
        }
        writer.ok().await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(
            err.message(),
            Some(format!("expected exactly one response message, got {count}").as_str())
        );
        assert_eq!(client.channel().active_calls(), 0);
    }
}

#[tokio::test]
async fn single_response_failures_are_recorded_on_the_call() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let undecodable = courier_core::encode(&courier_core::Frame::data(
        courier_client::CallId::new(0),
        vec![0xff, 0xff],
    ));
    let cases: [(&str, Vec<bytes::Bytes>); 3] = [
        ("no message", vec![]),
        ("two messages", vec![Echo::frame("a"), Echo::frame("b")]),
        ("undecodable", vec![undecodable]),
    ];

    for (case, frames) in cases {
        let (mut sink, mut response) = client
            .client_streaming(&CLIENT_STREAM, CallOptions::new())
            .await
            .unwrap();
        sink.done();

        let writer = server.next().await.respond();
        for frame in frames {
            writer.raw(frame).await;
        }
        writer.ok().await;

        let err = (&mut response).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)), "{case}: {err}");
        assert_eq!(response.state(), CallState::Failed, "{case}");

        let stored = response.error().expect(case);
        assert!(matches!(stored, ClientError::Protocol(_)), "{case}");
        assert_eq!(stored.message(), err.message(), "{case}");
        assert_eq!(
            response.error().unwrap().message(),
            stored.message(),
            "{case}"
        );
    }
    assert_eq!(client.channel().active_calls(), 0);
}

#[tokio::test]
async fn trailers_only_response() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
    });

    let mut headers = HeaderMap::new();
    headers.insert("grpc-status", HeaderValue::from_static("7"));
    headers.insert("grpc-message", HeaderValue::from_static("denied"));
    let _writer = server.next().await.respond_with(StatusCode::OK, headers);

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(err.message(), Some("denied"));
}

#[tokio::test]
async fn http_status_maps_to_code() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    for (status, code) in [
        (StatusCode::SERVICE_UNAVAILABLE, Code::Unavailable),
        (StatusCode::UNAUTHORIZED, Code::Unauthenticated),
        (StatusCode::NOT_FOUND, Code::Unimplemented),
    ] {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
        });
        let _writer = server.next().await.respond_with(status, HeaderMap::new());
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.code(), code, "{status}");
        assert!(!err.is_connection_lost());
    }
}

#[tokio::test]
async fn unexpected_content_type_is_protocol_error() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
    });

    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("text/html"));
    let _writer = server.next().await.respond_with(StatusCode::OK, headers);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)), "{err}");
}

#[tokio::test]
async fn body_ending_without_trailer_is_protocol_error() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.unary(&UNARY, &Echo::new("x"), CallOptions::new()).await }
    });

    let writer = server.next().await.respond();
    writer.message("partial").await;
    drop(writer);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(err.message(), Some("stream ended without trailer"));
}

#[tokio::test]
async fn server_stream_yields_messages_in_order() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let mut stream = client
        .server_streaming(&SERVER_STREAM, &Echo::new("general"), CallOptions::new())
        .await
        .unwrap();

    let writer = server.next().await.respond();
    for text in ["one", "two", "three"] {
        writer.message(text).await;
    }
    writer.ok().await;

    let mut received = Vec::new();
    while let Some(message) = stream.next().await {
        received.push(message.unwrap().text);
    }
    assert_eq!(received, ["one", "two", "three"]);
    assert_eq!(stream.state(), CallState::Completed);
    assert!(stream.trailers().is_some());
    assert!(stream.headers().is_some());
    assert!(stream.is_terminated());
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn server_stream_error_after_messages() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let mut stream = client
        .server_streaming(&SERVER_STREAM, &Echo::new("general"), CallOptions::new())
        .await
        .unwrap();

    let writer = server.next().await.respond();
    writer.message("one").await;
    writer
        .trailer(&Status::new(Code::ResourceExhausted, "slow down"))
        .await;

    assert_eq!(stream.next().await.unwrap().unwrap().text, "one");
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), CallState::Failed);
    assert_eq!(stream.error().unwrap().code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn split_frames_are_reassembled() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let mut stream = client
        .server_streaming(&SERVER_STREAM, &Echo::new("general"), CallOptions::new())
        .await
        .unwrap();

    let writer = server.next().await.respond();
    let mut wire = courier_core::encode(&courier_core::Frame::data(
        courier_client::CallId::new(0),
        Echo::bytes("fragmented"),
    ))
    .to_vec();
    wire.extend_from_slice(&courier_core::encode(&courier_core::Frame::trailer(
        courier_client::CallId::new(0),
        &Status::ok(),
    )));
    for byte in wire {
        writer.raw(vec![byte]).await;
    }

    assert_eq!(stream.next().await.unwrap().unwrap().text, "fragmented");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn client_stream_sends_then_receives() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let (mut sink, response) = client
        .client_streaming(&CLIENT_STREAM, CallOptions::new())
        .await
        .unwrap();

    let mut exchange = server.next().await;
    assert_eq!(exchange.path(), "/test.v1.EchoService/Collect");
    let mut request = exchange.take_body();

    for text in ["a", "b", "c"] {
        sink.send(&Echo::new(text)).await.unwrap();
    }
    sink.done();
    assert!(sink.is_done());

    assert_eq!(request.next().await, Some(Echo::new("a")));
    assert_eq!(request.next().await, Some(Echo::new("b")));
    assert_eq!(request.next().await, Some(Echo::new("c")));
    assert_eq!(request.next().await, None);

    let err = sink.send(&Echo::new("late")).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));

    let writer = exchange.respond();
    writer.message("abc").await;
    writer.ok().await;

    assert_eq!(response.await.unwrap().text, "abc");
}

#[tokio::test]
async fn bidi_interleaves_requests_and_responses() {
    let (channel, mut server) = default_channel();
    let client = Client::new(channel);

    let (mut sink, mut stream) = client.bidi_streaming(&BIDI, CallOptions::new()).await.unwrap();

    let mut exchange = server.next().await;
    let writer = exchange.respond();
    let mut request = exchange.take_body();

    for round in ["ping-1", "ping-2"] {
        sink.send(&Echo::new(round)).await.unwrap();
        let received = request.next().await.unwrap();
        writer.message(&received.text.replace("ping", "pong")).await;
        assert_eq!(
            stream.next().await.unwrap().unwrap().text,
            round.replace("ping", "pong")
        );
    }

    sink.done();
    assert_eq!(request.next().await, None);
    writer.ok().await;
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), CallState::Completed);
}

#[tokio::test]
async fn shape_mismatch_is_rejected() {
    let (channel, _server) = default_channel();
    let client = Client::new(channel);

    let err = client
        .unary(&SERVER_STREAM, &Echo::new("x"), CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
    assert_eq!(
        err.message(),
        Some("/test.v1.EchoService/Expand is a server_stream method, called as unary")
    );
    assert_eq!(client.channel().active_calls(), 0);
}
