#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their transport in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;

use reqwest::Client as HttpClient;
use tokio::sync::watch;
use url::Url;

use super::error::SseError;
use super::event::EventData;
use super::transport::{SseHandlers, SseTransport};
use crate::Result;
use crate::error::Error;
use crate::stream::connection::PolicyParts;
use crate::stream::delivery::Delivery;
use crate::stream::{Config, ConnectionManager, ConnectionMonitor, ConnectionState, Executor};

/// Resilient Server-Sent Events connection.
///
/// Every event handed to `on_event` moves the resume cursor to that event's id. The cursor
/// is sent as `Last-Event-ID` on every later request, whether the stream was reopened by
/// auto reconnect or by calling [`connect`](Self::connect) after [`close`](Self::close).
///
/// # Examples
///
/// ```rust, no_run
/// use stream_client::sse::SseConnection;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let connection = SseConnection::builder("https://example.com/events")
///         .on_event(|event| println!("{event}"))
///         .connect()?;
///
///     // ...
///     let resume_from = connection.close();
///
///     let resumed = SseConnection::builder("https://example.com/events")
///         .last_event_id(resume_from)
///         .connect()?;
///     # drop(resumed);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SseConnection {
    manager: ConnectionManager<SseTransport>,
}

impl SseConnection {
    #[must_use]
    pub fn builder(url: &str) -> SseBuilder {
        SseBuilder::new(url)
    }

    /// Starts a new connect cycle. Returns immediately; a live connection is left alone.
    pub fn connect(&self) {
        self.manager.connect();
    }

    /// Closes the stream and returns the id of the last event delivered to `on_event`.
    ///
    /// No reconnect is attempted and pending retries are abandoned.
    pub fn close(&self) -> Option<String> {
        self.manager.close(SseTransport::close_session)
    }

    /// Current resume cursor.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.manager.transport().last_event_id()
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

impl fmt::Debug for SseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConnection")
            .field("manager", &self.manager)
            .field("last_event_id", &self.last_event_id())
            .finish()
    }
}

/// Configures an [`SseConnection`].
#[derive(Debug)]
#[must_use]
pub struct SseBuilder {
    url: String,
    parts: PolicyParts,
    handlers: SseHandlers,
    http: Option<HttpClient>,
    last_event_id: Option<String>,
}

impl SseBuilder {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            parts: PolicyParts::default(),
            handlers: SseHandlers::default(),
            http: None,
            last_event_id: None,
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

    /// HTTP client used for the stream requests. Defaults to a fresh one.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Resumes from `last_event_id`, typically the value a previous [`SseConnection::close`]
    /// returned.
    pub fn last_event_id<S: Into<String>>(mut self, last_event_id: Option<S>) -> Self {
        self.last_event_id = last_event_id.map(Into::into);
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(EventData) + Send + Sync + 'static,
    {
        self.handlers.on_event = Some(Arc::new(f));
        self
    }

    /// Called when a live stream closes, with the resume cursor at that point.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.handlers.on_close = Some(Arc::new(f));
        self
    }

    /// Called when a live stream fails. Failed connect attempts go to
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
    /// Fails on a malformed URL, a scheme other than `http`/`https`, when the HTTP client
    /// cannot be created, or when no executor was given and there is no ambient Tokio
    /// runtime.
    pub fn build(self) -> Result<SseConnection> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SseError::UnsupportedScheme(other.to_owned()).into()),
        }

        let http = match self.http {
            Some(http) => http,
            None => HttpClient::builder().build().map_err(SseError::Request)?,
        };

        let policy = self.parts.resolve(url)?;
        let delivery = Delivery::spawn(policy.executor.worker());
        let transport = SseTransport::new(http, self.handlers, delivery.clone(), self.last_event_id);

        Ok(SseConnection {
            manager: ConnectionManager::new(policy, delivery, transport),
        })
    }

    /// [`build`](Self::build) followed by [`SseConnection::connect`].
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn connect(self) -> Result<SseConnection> {
        let connection = self.build()?;
        connection.connect();
        Ok(connection)
    }
}
