use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Heartbeat;
use super::error::WsError;
use crate::Result;
use crate::error::Error;
use crate::stream::Callback;
use crate::stream::delivery::Delivery;
use crate::stream::traits::{ChannelSlot, Link, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tick period used when no heartbeat is configured; the tick branch is disabled then.
const IDLE_TICK: Duration = Duration::from_secs(3600);

pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(Option<CloseFrame>) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Per-connection WebSocket callbacks.
///
/// All of them run on the connection's delivery queue and must not block.
#[derive(Clone, Default)]
pub(crate) struct WsHandlers {
    /// A channel went live
    pub(crate) on_open: Option<Callback>,
    /// A text or binary frame arrived
    pub(crate) on_message: Option<MessageHandler>,
    /// A live channel closed. Carries the close frame sent by the client or the server,
    /// if there was one.
    pub(crate) on_close: Option<CloseHandler>,
    /// A live channel failed
    pub(crate) on_error: Option<ErrorHandler>,
}

impl fmt::Debug for WsHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

enum Command {
    Send(Message),
    Close(CloseFrame),
}

struct Session {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

/// How a session task ended.
enum Exit {
    /// The client released the session
    Local,
    /// The server sent a close frame or the stream ended
    Remote(Option<CloseFrame>),
    /// I/O failure or missed heartbeat
    Failed(WsError),
}

pub(crate) struct WsTransport {
    handlers: WsHandlers,
    heartbeat: Option<Heartbeat>,
    delivery: Delivery,
    slot: Arc<ChannelSlot<Session>>,
    /// Serializes opens so two attempts never race past the live-session check.
    opening: Mutex<()>,
}

impl WsTransport {
    pub(crate) fn new(handlers: WsHandlers, heartbeat: Option<Heartbeat>, delivery: Delivery) -> Self {
        Self {
            handlers,
            heartbeat,
            delivery,
            slot: Arc::new(ChannelSlot::new()),
            opening: Mutex::new(()),
        }
    }

    /// Queues `message` on the live channel.
    pub(crate) fn send(&self, id: &str, message: Message) -> Result<()> {
        self.slot.with(|session| match session {
            Some(session) => session
                .commands
                .send(Command::Send(message))
                .map_err(|_e| Error::not_connected(id)),
            None => Err(Error::not_connected(id)),
        })
    }

    /// Sends `frame` and releases the channel. Returns `false` when nothing was open.
    pub(crate) fn close_gracefully(&self, frame: CloseFrame) -> bool {
        let Some(session) = self.slot.take() else {
            return false;
        };

        // Commands are drained before cancellation is observed, so the frame goes out first.
        _ = session.commands.send(Command::Close(frame.clone()));
        session.cancel.cancel();
        self.notify_close(Some(frame));
        true
    }

    fn notify_close(&self, frame: Option<CloseFrame>) {
        if let Some(on_close) = &self.handlers.on_close {
            let on_close = Arc::clone(on_close);
            self.delivery.submit(move || on_close(frame));
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url, link: Link) -> Result<()> {
        let _opening = self.opening.lock().await;
        if self.slot.is_live() {
            return Ok(());
        }

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(WsError::UnsupportedScheme(other.to_owned()).into()),
        }

        #[cfg(feature = "tracing")]
        tracing::info!(%url, "Connecting to WebSocket");

        let (stream, _response) = connect_async(url.as_str()).await?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let Some(generation) = self.slot.install(Session {
            commands,
            cancel: cancel.clone(),
        }) else {
            return Ok(());
        };

        if let Some(on_open) = &self.handlers.on_open {
            let on_open = Arc::clone(on_open);
            self.delivery.submit(move || on_open());
        }

        let task = SessionTask {
            slot: Arc::clone(&self.slot),
            generation,
            handlers: self.handlers.clone(),
            heartbeat: self.heartbeat,
            delivery: self.delivery.clone(),
            link: link.clone(),
        };
        link.worker().spawn(task.run(stream, commands_rx, cancel));

        Ok(())
    }

    fn close_channel(&self) -> bool {
        let Some(session) = self.slot.take() else {
            return false;
        };

        session.cancel.cancel();
        self.notify_close(None);
        true
    }

    fn is_open(&self) -> bool {
        self.slot
            .with(|session| session.is_some_and(|s| !s.commands.is_closed()))
    }
}

/// Owns the socket of one live session.
struct SessionTask {
    slot: Arc<ChannelSlot<Session>>,
    generation: u64,
    handlers: WsHandlers,
    heartbeat: Option<Heartbeat>,
    delivery: Delivery,
    link: Link,
}

impl SessionTask {
    async fn run(
        self,
        mut stream: WsStream,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        match self.pump(&mut stream, &mut commands, &cancel).await {
            Exit::Local => {}
            Exit::Remote(frame) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?frame, "WebSocket closed by server");
                // Flushes the close reply queued by tungstenite.
                _ = stream.close(None).await;
                self.closed_remotely(frame, None);
            }
            Exit::Failed(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "WebSocket connection failed");
                self.closed_remotely(None, Some(e));
            }
        }
    }

    async fn pump(
        &self,
        stream: &mut WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        cancel: &CancellationToken,
    ) -> Exit {
        let period = self.heartbeat.map_or(IDLE_TICK, |h| h.interval);
        let mut ticker = interval_at(Instant::now() + period, period);
        let mut awaiting_pong: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                // Handle outgoing messages and a graceful close
                command = commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = stream.send(message).await {
                            return Exit::Failed(WsError::Connection(e));
                        }
                    }
                    Some(Command::Close(frame)) => {
                        _ = stream.close(Some(frame)).await;
                        return Exit::Local;
                    }
                    None => {
                        _ = stream.close(None).await;
                        return Exit::Local;
                    }
                },

                () = cancel.cancelled() => {
                    _ = stream.close(None).await;
                    return Exit::Local;
                }

                // Handle incoming messages
                message = stream.next() => match message {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(?message, "Received WebSocket message");
                        self.deliver(message, cancel);
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = None,
                    Some(Ok(Message::Close(frame))) => return Exit::Remote(frame),
                    Some(Ok(_)) => {
                        // PING frames are answered by tungstenite itself.
                    }
                    Some(Err(e)) => return Exit::Failed(WsError::Connection(e)),
                    None => return Exit::Remote(None),
                },

                _ = ticker.tick(), if self.heartbeat.is_some() => {
                    let Some(heartbeat) = self.heartbeat else {
                        continue;
                    };
                    if let Some(sent) = awaiting_pong
                        && sent.elapsed() > heartbeat.timeout
                    {
                        return Exit::Failed(WsError::HeartbeatTimeout(heartbeat.timeout));
                    }
                    if let Err(e) = stream.send(Message::Ping(Vec::new().into())).await {
                        return Exit::Failed(WsError::Connection(e));
                    }
                    awaiting_pong.get_or_insert_with(Instant::now);
                }
            }
        }
    }

    fn deliver(&self, message: Message, cancel: &CancellationToken) {
        let Some(on_message) = &self.handlers.on_message else {
            return;
        };
        let on_message = Arc::clone(on_message);
        let cancel = cancel.clone();
        self.delivery.submit(move || {
            // Frames still queued when the client closed are dropped.
            if !cancel.is_cancelled() {
                on_message(message);
            }
        });
    }

    /// Releases the session after a closure the client did not ask for, then hands over to
    /// the lifecycle engine.
    fn closed_remotely(&self, frame: Option<CloseFrame>, error: Option<WsError>) {
        if self.slot.take_if_current(self.generation).is_none() {
            // Released locally in the meantime.
            return;
        }

        if let Some(e) = error
            && let Some(on_error) = &self.handlers.on_error
        {
            let on_error = Arc::clone(on_error);
            self.delivery.submit(move || on_error(e.into()));
        }
        if let Some(on_close) = &self.handlers.on_close {
            let on_close = Arc::clone(on_close);
            self.delivery.submit(move || on_close(frame));
        }

        self.link.remote_closed();
    }
}
