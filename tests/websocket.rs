#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use stream_client::error::Kind;
use stream_client::ws::{CloseCode, CloseFrame, Heartbeat, Message, WsConnection, WsError};
use stream_client::{Config, ConnectionState, MaxRetries, StreamClient};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::common::{WAIT, assert_quiet, fast_config, next, unused_addr};

#[derive(Debug, Clone)]
enum ServerCommand {
    /// Send a text frame to every client
    Text(String),
    /// Close every client with a close frame
    Close,
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    commands: broadcast::Sender<ServerCommand>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Close frames received from clients
    closes_rx: mpsc::UnboundedReceiver<Option<CloseFrame>>,
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock server that sends `greeting` to every client right after the handshake.
    async fn start(greeting: &[&str]) -> Self {
        Self::start_with(greeting, true).await
    }

    /// Start a mock server that completes the handshake and then never reads, so PINGs go
    /// unanswered.
    async fn start_silent() -> Self {
        Self::start_with(&[], false).await
    }

    async fn start_with(greeting: &[&str], responsive: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<ServerCommand>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (closes_tx, closes_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let greeting: Vec<String> = greeting.iter().map(|s| (*s).to_owned()).collect();
        let broadcast_tx = commands.clone();
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                // Subscribe before the handshake completes so no command can be missed.
                let mut commands_rx = broadcast_tx.subscribe();
                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                if !responsive {
                    tokio::spawn(async move {
                        let _held = ws_stream;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    });
                    continue;
                }

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let closes_tx = closes_tx.clone();
                let greeting = greeting.clone();

                tokio::spawn(async move {
                    for text in greeting {
                        if write.send(Message::text(text)).await.is_err() {
                            return;
                        }
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    drop(received_tx.send(text.to_string()));
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    drop(closes_tx.send(frame));
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            command = commands_rx.recv() => match command {
                                Ok(ServerCommand::Text(text)) => {
                                    if write.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(ServerCommand::Close) => {
                                    let frame = CloseFrame {
                                        code: CloseCode::Away,
                                        reason: "server going away".into(),
                                    };
                                    drop(write.send(Message::Close(Some(frame))).await);
                                    break;
                                }
                                Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            received_rx,
            closes_rx,
            accepted,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }

    fn send(&self, text: &str) {
        drop(self.commands.send(ServerCommand::Text(text.to_owned())));
    }

    fn close_all(&self) {
        drop(self.commands.send(ServerCommand::Close));
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// What the callbacks of a connection under test observed, in order.
#[derive(Debug, PartialEq)]
enum Seen {
    Open,
    Message(String),
    Close(Option<u16>),
    Error(Kind),
}

fn observed(
    builder: stream_client::ws::WsBuilder,
) -> (stream_client::ws::WsBuilder, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (open_tx, message_tx, close_tx, error_tx) = (tx.clone(), tx.clone(), tx.clone(), tx);

    let builder = builder
        .on_open(move || drop(open_tx.send(Seen::Open)))
        .on_message(move |message| {
            let text = message
                .into_text()
                .map(|t| t.as_str().to_owned())
                .unwrap_or_default();
            drop(message_tx.send(Seen::Message(text)));
        })
        .on_close(move |frame| drop(close_tx.send(Seen::Close(frame.map(|f| u16::from(f.code))))))
        .on_error(move |error| drop(error_tx.send(Seen::Error(error.kind()))));

    (builder, rx)
}

#[tokio::test]
async fn delivers_messages_in_order_exactly_once() {
    common::init_tracing();
    let server = MockWsServer::start(&["1", "2", "3"]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));

    let connection = builder.connect().unwrap();

    assert_eq!(next(&mut seen).await, Seen::Open);
    assert_eq!(next(&mut seen).await, Seen::Message("1".to_owned()));
    assert_eq!(next(&mut seen).await, Seen::Message("2".to_owned()));
    assert_eq!(next(&mut seen).await, Seen::Message("3".to_owned()));
    assert_quiet(&mut seen).await;

    assert!(connection.is_open(), "connection should stay open");
    assert!(connection.state().is_connected(), "state should be Connected");
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let mut server = MockWsServer::start(&[]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    connection.send_text("hello").unwrap();
    connection.send_json(&json!({ "type": "subscribe", "channel": "book" })).unwrap();

    assert_eq!(next(&mut server.received_rx).await, "hello");
    let subscribe: serde_json::Value =
        serde_json::from_str(&next(&mut server.received_rx).await).unwrap();
    assert_eq!(subscribe["channel"], "book");

    server.send("welcome");
    assert_eq!(next(&mut seen).await, Seen::Message("welcome".to_owned()));
}

#[tokio::test]
async fn send_while_disconnected_fails() {
    let server = MockWsServer::start(&[]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.build().unwrap();

    let err = connection.send_text("too early").unwrap_err();
    assert_eq!(err.kind(), Kind::NotConnected);

    connection.connect();
    assert_eq!(next(&mut seen).await, Seen::Open);
    connection.close();

    let err = connection.send_binary(vec![1, 2, 3]).unwrap_err();
    assert_eq!(err.kind(), Kind::NotConnected);
}

#[tokio::test]
async fn graceful_close_sends_normal_close_frame() {
    let mut server = MockWsServer::start(&[]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.config(fast_config(MaxRetries::Limited(3))).connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    connection.close();

    let frame = next(&mut server.closes_rx).await.unwrap();
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), "Client disconnected");
    assert_eq!(next(&mut seen).await, Seen::Close(Some(1000)));
    assert_quiet(&mut seen).await;

    assert!(!connection.is_open(), "closed connection must not be open");
    assert_eq!(connection.state(), ConnectionState::Idle);
    assert_eq!(server.accepted(), 1, "no reconnect after a client close");
}

#[tokio::test]
async fn custom_close_frame_reaches_server() {
    let mut server = MockWsServer::start(&[]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    connection.close_with(CloseFrame {
        code: CloseCode::Library(4001),
        reason: "session expired".into(),
    });

    let frame = next(&mut server.closes_rx).await.unwrap();
    assert_eq!(u16::from(frame.code), 4001);
    assert_eq!(next(&mut seen).await, Seen::Close(Some(4001)));
}

#[tokio::test]
async fn server_close_reconnects() {
    let server = MockWsServer::start(&[]).await;
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.config(fast_config(MaxRetries::Limited(3))).connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    server.close_all();

    assert_eq!(next(&mut seen).await, Seen::Close(Some(1001)));
    assert_eq!(next(&mut seen).await, Seen::Open);
    assert_eq!(server.accepted(), 2);

    let mut state = connection.state_receiver();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();
    assert!(connection.is_open(), "reconnected channel should be open");
}

#[tokio::test]
async fn server_close_without_auto_reconnect_stays_closed() {
    let server = MockWsServer::start(&[]).await;
    let config = Config::builder()
        .retry_interval(Duration::from_millis(20))
        .auto_reconnect(false)
        .build();
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()));
    let connection = builder.config(config).connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    server.close_all();

    assert_eq!(next(&mut seen).await, Seen::Close(Some(1001)));
    assert_quiet(&mut seen).await;

    assert!(!connection.is_open(), "server closed the channel");
    assert_eq!(connection.state(), ConnectionState::Idle);
    assert_eq!(server.accepted(), 1, "auto reconnect is off");
}

#[tokio::test]
async fn retries_exceeded_against_unreachable_server() {
    let url = format!("ws://{}/socket", unused_addr());
    let failed = Arc::new(AtomicUsize::new(0));
    let (exceeded_tx, mut exceeded_rx) = mpsc::unbounded_channel();
    let counter = Arc::clone(&failed);

    let connection = WsConnection::builder(&url)
        .config(fast_config(MaxRetries::Limited(1)))
        .on_failed_attempt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_retries_exceeded(move || drop(exceeded_tx.send(())))
        .connect()
        .unwrap();

    next(&mut exceeded_rx).await;
    assert_quiet(&mut exceeded_rx).await;

    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(!connection.is_open(), "nothing to connect to");
}

#[tokio::test]
async fn missing_pong_is_treated_as_failure() {
    let server = MockWsServer::start_silent().await;
    let heartbeat = Heartbeat::builder()
        .interval(Duration::from_millis(50))
        .timeout(Duration::from_millis(100))
        .build();
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();

    let connection = WsConnection::builder(&server.url())
        .config(fast_config(MaxRetries::Limited(3)))
        .heartbeat(heartbeat)
        .on_error(move |error| {
            let timed_out = matches!(
                error.downcast_ref::<WsError>(),
                Some(WsError::HeartbeatTimeout(_))
            );
            drop(errors_tx.send((error.kind(), timed_out)));
        })
        .connect()
        .unwrap();

    assert_eq!(next(&mut errors_rx).await, (Kind::Connection, true));

    // The dead channel is replaced by a new one.
    tokio::time::timeout(WAIT, async {
        while server.accepted() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_ne!(connection.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn client_shutdown_closes_every_connection() {
    let server = MockWsServer::start(&[]).await;
    let client = StreamClient::new().unwrap();

    let (first, mut first_seen) = observed(client.ws(&server.url()));
    let (second, mut second_seen) = observed(client.ws(&server.url()));
    let first = first.connect().unwrap();
    let second = second.connect().unwrap();
    assert_eq!(next(&mut first_seen).await, Seen::Open);
    assert_eq!(next(&mut second_seen).await, Seen::Open);

    let mut state = second.state_receiver();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();
    let mut state = first.state_receiver();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.monitor().len(), 2);

    client.shutdown();

    assert!(client.monitor().is_empty(), "monitor should be drained");
    assert!(!first.is_open() && !second.is_open(), "every channel should be dropped");
    assert_eq!(next(&mut first_seen).await, Seen::Close(None));
    assert_eq!(next(&mut second_seen).await, Seen::Close(None));
    assert_quiet(&mut first_seen).await;
}

#[tokio::test]
async fn dropping_the_last_handle_closes_the_channel() {
    let server = MockWsServer::start(&[]).await;
    let monitor = stream_client::ConnectionMonitor::new();
    let (builder, mut seen) = observed(WsConnection::builder(&server.url()).monitor(monitor.clone()));
    let connection = builder.connect().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Open);

    let mut state = connection.state_receiver();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitor.len(), 1);

    drop(state);
    drop(connection);

    assert!(monitor.is_empty(), "dropped connection should unregister");
    assert_eq!(next(&mut seen).await, Seen::Close(None));
}
