use crate::Result;
#[cfg(feature = "sse")]
use crate::sse::{SseBuilder, SseError};
use crate::stream::{Config, ConnectionMonitor, Executor};
#[cfg(feature = "ws")]
use crate::ws::WsBuilder;

/// Entry point owning what connections share: the executor, the connection monitor, the
/// default [`Config`] and, for event streams, one HTTP client.
///
/// Connections built through it register with its monitor while live, so
/// [`shutdown`](Self::shutdown) reaches all of them.
///
/// # Examples
///
/// ```rust, no_run
/// use stream_client::StreamClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = StreamClient::new()?;
///
///     let socket = client
///         .ws("wss://example.com/socket")
///         .on_message(|message| println!("{message}"))
///         .connect()?;
///     let events = client
///         .sse("https://example.com/events")
///         .on_event(|event| println!("{}", event.data))
///         .connect()?;
///
///     // ...
///     client.shutdown();
///     # drop((socket, events));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StreamClient {
    executor: Executor,
    monitor: ConnectionMonitor,
    config: Config,
    #[cfg(feature = "sse")]
    http: reqwest::Client,
}

impl StreamClient {
    /// Uses the Tokio runtime the caller runs on for scheduling and I/O.
    ///
    /// # Errors
    ///
    /// Fails outside a Tokio runtime, or when the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_executor(Executor::current()?)
    }

    /// # Errors
    ///
    /// Fails when the HTTP client cannot be created.
    pub fn with_executor(executor: Executor) -> Result<Self> {
        Ok(Self {
            executor,
            monitor: ConnectionMonitor::new(),
            config: Config::default(),
            #[cfg(feature = "sse")]
            http: reqwest::Client::builder()
                .build()
                .map_err(SseError::Request)?,
        })
    }

    /// Default [`Config`] for connections built from now on. Each builder can still override
    /// it.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[cfg(feature = "ws")]
    pub fn ws(&self, url: &str) -> WsBuilder {
        WsBuilder::new(url)
            .config(self.config.clone())
            .executor(self.executor.clone())
            .monitor(self.monitor.clone())
    }

    #[cfg(feature = "sse")]
    pub fn sse(&self, url: &str) -> SseBuilder {
        SseBuilder::new(url)
            .config(self.config.clone())
            .executor(self.executor.clone())
            .monitor(self.monitor.clone())
            .http_client(self.http.clone())
    }

    #[must_use]
    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Tears down every live connection, then stops the scheduler so that no connection,
    /// live or retrying, opens again.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!(connections = self.monitor.len(), "Shutting down stream client");

        self.monitor.shutdown_all();
        self.executor.shutdown();
    }
}
