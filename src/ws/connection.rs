#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their transport in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use url::Url;

use super::config::Heartbeat;
use super::error::WsError;
use super::transport::{WsHandlers, WsTransport};
use crate::Result;
use crate::error::Error;
use crate::stream::connection::PolicyParts;
use crate::stream::delivery::Delivery;
use crate::stream::{Config, ConnectionManager, ConnectionMonitor, ConnectionState, Executor};

const CLIENT_CLOSE_REASON: &str = "Client disconnected";

/// Resilient WebSocket connection.
///
/// Opens on [`connect`](Self::connect), reconnects after the server drops it (unless
/// [`Config::auto_reconnect`] is off) and stays closed after [`close`](Self::close) until the
/// next `connect`. Callbacks registered on the [`WsBuilder`] run one at a time, in the order
/// their events happened.
///
/// # Examples
///
/// ```rust, no_run
/// use stream_client::ws::WsConnection;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let connection = WsConnection::builder("wss://echo.example.com/socket")
///         .on_open(|| println!("open"))
///         .on_message(|message| println!("{message}"))
///         .connect()?;
///
///     connection.send_text("hello")?;
///     connection.close();
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WsConnection {
    manager: ConnectionManager<WsTransport>,
}

impl WsConnection {
    #[must_use]
    pub fn builder(url: &str) -> WsBuilder {
        WsBuilder::new(url)
    }

    /// Starts a new connect cycle. Returns immediately; a live connection is left alone.
    pub fn connect(&self) {
        self.manager.connect();
    }

    /// Graceful close with code 1000 and reason `"Client disconnected"`.
    pub fn close(&self) {
        self.close_with(CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static(CLIENT_CLOSE_REASON),
        });
    }

    /// Graceful close with a custom frame.
    ///
    /// `on_close` receives `frame` when a channel was live. No reconnect is attempted and
    /// pending retries are abandoned.
    pub fn close_with(&self, frame: CloseFrame) {
        self.manager.close(|transport| transport.close_gracefully(frame));
    }

    /// Queues `message` on the live channel.
    ///
    /// # Errors
    ///
    /// Returns [`Kind::NotConnected`](crate::error::Kind::NotConnected) when no channel is
    /// open. Nothing is buffered for a later channel.
    pub fn send(&self, message: Message) -> Result<()> {
        self.manager
            .transport()
            .send(self.manager.id(), message)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Message::text(text.to_owned()))
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        self.send(Message::binary(data))
    }

    /// Serializes `value` to JSON and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Fails when `value` cannot be serialized, or as [`send`](Self::send) does.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value).map_err(WsError::MessageSerialize)?;
        self.send(Message::text(text))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.manager.id()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        self.manager.url()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        self.manager.config()
    }
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("manager", &self.manager)
            .finish()
    }
}

/// Configures a [`WsConnection`].
#[derive(Debug)]
#[must_use]
pub struct WsBuilder {
    url: String,
    parts: PolicyParts,
    handlers: WsHandlers,
    heartbeat: Option<Heartbeat>,
}

impl WsBuilder {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            parts: PolicyParts::default(),
            handlers: WsHandlers::default(),
            heartbeat: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.parts.config = config;
        self
    }

    /// Runs scheduling and I/O on `executor` instead of the ambient runtime.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.parts.executor = Some(executor);
        self
    }

    /// Registers live channels with `monitor`.
    pub fn monitor(mut self, monitor: ConnectionMonitor) -> Self {
        self.parts.monitor = Some(monitor);
        self
    }

    /// Enables ping/pong keep-alive.
    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.handlers.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<CloseFrame>) + Send + Sync + 'static,
    {
        self.handlers.on_close = Some(Arc::new(f));
        self
    }

    /// Called when a live channel fails. Failed connect attempts go to
    /// [`on_failed_attempt`](Self::on_failed_attempt) instead.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.handlers.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_failed_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.parts.hooks.on_failed_attempt = Some(Arc::new(f));
        self
    }

    pub fn on_retries_exceeded<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.parts.hooks.on_retries_exceeded = Some(Arc::new(f));
        self
    }

    /// Creates the connection without opening it.
    ///
    /// # Errors
    ///
    /// Fails on a malformed URL, a scheme other than `ws`/`wss`, or when no executor was
    /// given and there is no ambient Tokio runtime.
    pub fn build(self) -> Result<WsConnection> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(WsError::UnsupportedScheme(other.to_owned()).into()),
        }

        let policy = self.parts.resolve(url)?;
        let delivery = Delivery::spawn(policy.executor.worker());
        let transport = WsTransport::new(self.handlers, self.heartbeat, delivery.clone());

        Ok(WsConnection {
            manager: ConnectionManager::new(policy, delivery, transport),
        })
    }

    /// [`build`](Self::build) followed by [`WsConnection::connect`].
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn connect(self) -> Result<WsConnection> {
        let connection = self.build()?;
        connection.connect();
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[tokio::test]
    async fn rejects_http_scheme() {
        let err = WsConnection::builder("http://localhost/").build().unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn rejects_malformed_url() {
        let err = WsConnection::builder("not a url").build().unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let connection = WsConnection::builder("ws://127.0.0.1:9/").build().unwrap();

        let err = connection.send_text("hello").unwrap_err();

        assert_eq!(err.kind(), Kind::NotConnected);
        assert!(!connection.is_open(), "nothing was opened");
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn close_without_channel_is_idle() {
        let connection = WsConnection::builder("ws://127.0.0.1:9/").build().unwrap();

        connection.close();

        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[test]
    fn build_outside_runtime_fails() {
        let err = WsConnection::builder("ws://127.0.0.1:9/").build().unwrap_err();
        assert_eq!(err.kind(), Kind::Internal);
    }
}
