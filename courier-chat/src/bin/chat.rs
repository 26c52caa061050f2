//! Command-line chat client.
//!
//! Usage:
//!   chat <base-url> send <room> <text>
//!   chat <base-url> history <room> [limit]
//!   chat <base-url> watch <room> [limit]
//!
//! Set `RUST_LOG=courier_client=debug` to see call lifecycle events.

use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use courier_chat::{ChatMessage, ChatServiceClient, HistoryRequest, Payload, SendRequest};
use courier_client::{CallOptions, CancellationToken};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: chat <base-url> (send <room> <text> | history <room> [limit] | watch <room> [limit])";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [base_url, command, room, rest @ ..] = args.as_slice() else {
        bail!(USAGE);
    };

    let client = ChatServiceClient::builder(base_url.as_str())
        .default_deadline(Duration::from_secs(10))
        .build_client()
        .map(ChatServiceClient::from)
        .context("failed to build channel")?;

    let result = match command.as_str() {
        "send" => send(&client, room, rest).await,
        "history" => history(&client, room, parse_limit(rest)?).await,
        "watch" => watch(&client, room, parse_limit(rest)?).await,
        other => bail!("unknown command {other:?}\n{USAGE}"),
    };

    client.close().await;
    result
}

fn parse_limit(rest: &[String]) -> anyhow::Result<i32> {
    match rest.first() {
        Some(limit) => limit
            .parse()
            .with_context(|| format!("invalid limit {limit:?}")),
        None => Ok(0),
    }
}

fn print_message(message: &ChatMessage) {
    let sender = message
        .sender
        .as_ref()
        .map(|user| user.display_name.as_str())
        .unwrap_or("?");
    println!("[{}] {sender}: {}", message.sent_at_unix, message.text);
}

async fn send(client: &ChatServiceClient, room: &str, words: &[String]) -> anyhow::Result<()> {
    if words.is_empty() {
        bail!(USAGE);
    }
    let request = SendRequest {
        room_id: room.to_string(),
        text: words.join(" "),
    };
    let response = client.send(&request, CallOptions::new()).await?;
    match &response.message {
        Some(message) => {
            println!("sent {}", message.id);
            print_message(message);
        }
        None => println!("sent"),
    }
    Ok(())
}

async fn history(client: &ChatServiceClient, room: &str, limit: i32) -> anyhow::Result<()> {
    let request = HistoryRequest {
        room_id: room.to_string(),
        limit,
    };
    let response = client.history(&request, CallOptions::new()).await?;
    if response.messages.is_empty() {
        println!("no messages in {room}");
    }
    for message in &response.messages {
        print_message(message);
    }
    Ok(())
}

async fn watch(client: &ChatServiceClient, room: &str, limit: i32) -> anyhow::Result<()> {
    let request = HistoryRequest {
        room_id: room.to_string(),
        limit,
    };

    // a live stream has no deadline; Ctrl-C cancels it instead
    let token = CancellationToken::new();
    let options = CallOptions::new()
        .deadline(Duration::MAX)
        .cancellation(token.clone());
    let mut stream = client.chat_stream(&request, options).await?;
    eprintln!("watching {room} (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                token.cancel();
                break;
            }
            item = stream.next() => match item {
                Some(Ok(envelope)) => match envelope.payload {
                    Some(Payload::Message(message)) => print_message(&message),
                    None => tracing::debug!("empty envelope"),
                },
                Some(Err(e)) => return Err(e).context("stream failed"),
                None => break,
            },
        }
    }
    Ok(())
}
