#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::sync::watch;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

use super::config::Config;
use super::delivery::Delivery;
use super::executor::Executor;
use super::monitor::{ConnectionMonitor, Teardown};
use super::traits::{Link, Transport};
use crate::Result;
use crate::error::Error;

/// Zero-argument user callback.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, and nothing scheduled
    Idle,
    /// A connect attempt is running
    Connecting {
        /// Attempt number within the current `connect()` cycle
        attempt: u32,
    },
    /// A channel is live
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the backoff before the next attempt
    Reconnecting {
        /// Number of the attempt that is scheduled
        attempt: u32,
    },
    /// A user-initiated close is in progress
    Closing,
    /// Retries were exhausted; only a new `connect()` leaves this state
    Failed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Callbacks fired by the retry gate.
#[non_exhaustive]
#[derive(Clone, Default)]
pub struct RetryHooks {
    /// Fired after every connect attempt that failed
    pub on_failed_attempt: Option<Callback>,
    /// Fired once when a `connect()` cycle gives up
    pub on_retries_exceeded: Option<Callback>,
}

impl fmt::Debug for RetryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHooks")
            .field("on_failed_attempt", &self.on_failed_attempt.is_some())
            .field("on_retries_exceeded", &self.on_retries_exceeded.is_some())
            .finish()
    }
}

/// Everything a connection is configured with, apart from its transport.
#[derive(Debug, Clone)]
pub(crate) struct Policy {
    pub(crate) url: Url,
    pub(crate) config: Config,
    pub(crate) hooks: RetryHooks,
    pub(crate) executor: Executor,
    pub(crate) monitor: ConnectionMonitor,
}

/// Builder-side half of a [`Policy`]: everything but the URL, with the runtime parts optional.
#[derive(Debug, Clone, Default)]
pub(crate) struct PolicyParts {
    pub(crate) config: Config,
    pub(crate) hooks: RetryHooks,
    pub(crate) executor: Option<Executor>,
    pub(crate) monitor: Option<ConnectionMonitor>,
}

impl PolicyParts {
    /// Falls back to the ambient runtime and a private monitor for whatever was not set.
    pub(crate) fn resolve(self, url: Url) -> Result<Policy> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Executor::current()?,
        };

        Ok(Policy {
            url,
            config: self.config,
            hooks: self.hooks,
            executor,
            monitor: self.monitor.unwrap_or_default(),
        })
    }
}

/// Drives one logical stream through connect, retry, reconnect and close.
///
/// The manager is transport agnostic: it owns the retry counter, the backoff and the
/// shutdown flag, and asks its [`Transport`] to open or drop the channel. Attempts run on the
/// executor's scheduler; nothing here blocks the caller.
///
/// Every attempt passes through one gate. The attempt counter is bumped first; once it
/// exceeds [`Config::max_retries`] the `on_retries_exceeded` hook fires, the state becomes
/// [`ConnectionState::Failed`] and nothing more is scheduled until [`connect`](Self::connect)
/// is called again. A successful open resets the counter.
///
/// Cloning yields another handle to the same connection. Dropping the last handle tears the
/// channel down.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport> {
    id: String,
    policy: Policy,
    delivery: Delivery,
    retries: AtomicU32,
    shutting_down: AtomicBool,
    backoff: Mutex<ExponentialBackoff>,
    /// Held by `connect`, `close`, teardown, remote-close handling and the bookkeeping after a
    /// successful open, so none of them interleave.
    lifecycle: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    transport: T,
}

impl<T: Transport> ConnectionManager<T> {
    pub(crate) fn new(policy: Policy, delivery: Delivery, transport: T) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);

        let backoff = ExponentialBackoff::from(&policy.config);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                id,
                policy,
                delivery,
                retries: AtomicU32::new(0),
                shutting_down: AtomicBool::new(false),
                backoff: Mutex::new(backoff),
                lifecycle: Mutex::new(()),
                state_tx,
                transport,
            }),
        }
    }

    /// Short random identifier, also the key in the [`ConnectionMonitor`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.policy.url
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.policy.config
    }

    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub(crate) fn delivery(&self) -> &Delivery {
        &self.inner.delivery
    }

    /// Starts a new connect cycle: clears the shutdown flag, resets the attempt counter and
    /// the backoff, and schedules an attempt right away.
    ///
    /// Returns immediately. Does nothing on a live connection.
    pub fn connect(&self) {
        self.inner.connect();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.transport.is_open()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// User-initiated close.
    ///
    /// Raises the shutdown flag, lets `release` perform the transport's graceful close, then
    /// drops whatever channel is left. Attempts scheduled before the close abort when they
    /// fire; one already running finishes and then drops its channel.
    pub(crate) fn close<R, F>(&self, release: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let inner = &self.inner;
        let _lifecycle = inner.lock_lifecycle();
        inner.shutting_down.store(true, Ordering::SeqCst);
        inner.set_state(ConnectionState::Closing);

        let result = release(&inner.transport);
        inner.release();
        inner.set_state(ConnectionState::Idle);

        #[cfg(feature = "tracing")]
        tracing::info!(id = %inner.id, url = %inner.policy.url, "Connection closed by client");

        result
    }
}

impl<T: Transport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.inner.id)
            .field("url", &self.inner.policy.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Inner<T> {
    fn connect(self: &Arc<Self>) {
        let _lifecycle = self.lock_lifecycle();
        if self.transport.is_open() {
            return;
        }

        self.shutting_down.store(false, Ordering::SeqCst);
        self.retries.store(0, Ordering::SeqCst);
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();

        // The first attempt of a cycle never exceeds the bound.
        _ = self.try_connect(false, Duration::ZERO);
    }

    fn retry(self: &Arc<Self>) -> Result<()> {
        let delay = self.next_delay();
        self.try_connect(false, delay)
    }

    fn reconnect(self: &Arc<Self>) -> Result<()> {
        if !self.policy.config.auto_reconnect {
            #[cfg(feature = "tracing")]
            tracing::info!(id = %self.id, "Connection closed, auto reconnect disabled");
            self.set_state(ConnectionState::Idle);
            return Ok(());
        }

        let delay = self.next_delay();
        self.try_connect(true, delay)
    }

    /// The retry gate. Every attempt, first or not, goes through here.
    fn try_connect(self: &Arc<Self>, is_reconnection: bool, delay: Duration) -> Result<()> {
        let attempt = self.retries.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let max_retries = self.policy.config.max_retries;

        if max_retries.is_exceeded_by(attempt) {
            let max = max_retries.limit().unwrap_or_default();
            #[cfg(feature = "tracing")]
            tracing::warn!(id = %self.id, url = %self.policy.url, max, "Max retries exceeded, not reconnecting");

            self.set_state(ConnectionState::Failed);
            if let Some(hook) = &self.policy.hooks.on_retries_exceeded {
                let hook = Arc::clone(hook);
                self.delivery.submit(move || hook());
            }
            return Err(Error::retries_exceeded(max));
        }

        if self.shutting_down.load(Ordering::SeqCst)
            || (is_reconnection && !self.policy.config.auto_reconnect)
        {
            return Ok(());
        }

        if self.policy.executor.is_shutdown() {
            #[cfg(feature = "tracing")]
            tracing::warn!(id = %self.id, "Scheduler shut down, not reconnecting");
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            id = %self.id,
            url = %self.policy.url,
            ?delay,
            attempt,
            max_retries = ?max_retries.limit(),
            "Scheduling connect attempt"
        );

        if attempt > 1 || is_reconnection {
            self.set_state(ConnectionState::Reconnecting { attempt });
        } else {
            self.set_state(ConnectionState::Connecting { attempt });
        }

        let weak = Arc::downgrade(self);
        self.policy.executor.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                inner.attempt(attempt).await;
            }
        });

        Ok(())
    }

    /// One scheduled connect attempt.
    async fn attempt(self: Arc<Self>, attempt: u32) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Connecting { attempt });

        let connect_timeout = self.policy.config.connect_timeout;
        let open = self.transport.open(&self.policy.url, self.link());
        let opened = timeout(connect_timeout, open)
            .await
            .unwrap_or_else(|_elapsed| Err(Error::timeout(connect_timeout)));

        match opened {
            Ok(()) => {
                let _lifecycle = self.lock_lifecycle();
                self.retries.store(0, Ordering::SeqCst);
                self.backoff
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reset();

                if self.shutting_down.load(Ordering::SeqCst) {
                    // Closed while this attempt was in flight.
                    self.release();
                    return;
                }
                if !self.transport.is_open() {
                    // Already dropped by the remote side; `remote_closed` decides what follows.
                    return;
                }

                self.policy.monitor.add(&self.id, self.teardown());
                self.state_tx.send_if_modified(|state| {
                    if state.is_connected() {
                        return false;
                    }
                    *state = ConnectionState::Connected {
                        since: Instant::now(),
                    };
                    true
                });

                #[cfg(feature = "tracing")]
                tracing::info!(id = %self.id, url = %self.policy.url, "Connected");
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id = %self.id, url = %self.policy.url, attempt, error = %e, "Connect attempt failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                if let Some(hook) = &self.policy.hooks.on_failed_attempt {
                    let hook = Arc::clone(hook);
                    self.delivery.submit(move || hook());
                }
                self.release();

                if self.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = self.retry() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(id = %self.id, error = %e, "Giving up on connection");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }
    }

    /// Called by the transport after it released a channel the remote side closed.
    fn remote_closed(self: &Arc<Self>) {
        let _lifecycle = self.lock_lifecycle();
        self.policy.monitor.remove(&self.id);

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(id = %self.id, url = %self.policy.url, "Connection lost");

        if let Err(e) = self.reconnect() {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %self.id, error = %e, "Giving up on connection");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    /// Forceful local teardown.
    fn release(&self) {
        self.transport.close_channel();
        self.policy.monitor.remove(&self.id);
    }

    fn next_delay(&self) -> Duration {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_backoff()
            .unwrap_or(self.policy.config.retry_interval)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn link(self: &Arc<Self>) -> Link {
        let weak: Weak<Self> = Arc::downgrade(self);
        Link::new(
            self.policy.executor.worker().clone(),
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remote_closed();
                }
            }),
        )
    }

    fn teardown(self: &Arc<Self>) -> Teardown {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                let _lifecycle = inner.lock_lifecycle();
                inner.shutting_down.store(true, Ordering::SeqCst);
                inner.release();
                inner.set_state(ConnectionState::Idle);
            }
        })
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.transport.close_channel();
        self.policy.monitor.remove(&self.id);
    }
}
