//! Capability interface between the lifecycle engine and a concrete transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::runtime::Handle;
use url::Url;

use crate::Result;

/// A transport the lifecycle engine can drive.
///
/// Implementations own their channel. The engine never looks inside it: it asks the
/// transport to open one, to drop it, and whether one is live. Anything observed on the
/// channel after it opens (inbound data, remote closure) is the transport's business and is
/// reported back through the [`Link`] given to [`Transport::open`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a channel to `url`.
    ///
    /// Must be a no-op returning `Ok` when a channel is already live. Concurrent calls on the
    /// same transport must not open two channels.
    async fn open(&self, url: &Url, link: Link) -> Result<()>;

    /// Drops the local channel without any closing handshake.
    ///
    /// Idempotent. Returns `false` when there was no live channel.
    fn close_channel(&self) -> bool;

    fn is_open(&self) -> bool;
}

/// Handle a transport uses to report back to the connection that opened it.
///
/// Holds no strong reference to the connection.
#[derive(Clone)]
pub struct Link {
    worker: Handle,
    remote_closed: Arc<dyn Fn() + Send + Sync>,
}

impl Link {
    pub(crate) fn new(worker: Handle, remote_closed: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            worker,
            remote_closed,
        }
    }

    /// Runtime handle for channel I/O.
    #[must_use]
    pub fn worker(&self) -> &Handle {
        &self.worker
    }

    /// Reports that a live channel was closed by the remote side or by a network failure.
    ///
    /// Call this only after releasing the channel, and only when the release was not
    /// initiated locally.
    pub fn remote_closed(&self) {
        (self.remote_closed)();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Holder for at most one live session, tagged with a generation.
///
/// The generation lets a session's background task find out whether it is still the
/// current one before acting on a closure: whoever takes the session out of the slot owns
/// its teardown.
pub(crate) struct ChannelSlot<S> {
    session: Mutex<Option<(u64, S)>>,
    generation: AtomicU64,
}

impl<S> ChannelSlot<S> {
    pub(crate) fn new() -> Self {
        Self {
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Stores `session`, returning its generation. Returns `None` and drops nothing if a
    /// session is already live.
    pub(crate) fn install(&self, session: S) -> Option<u64> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some((generation, session));
        Some(generation)
    }

    /// Takes the live session, whatever its generation.
    pub(crate) fn take(&self) -> Option<S> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|(_, session)| session)
    }

    /// Takes the live session only if it is still `generation`.
    pub(crate) fn take_if_current(&self, generation: u64) -> Option<S> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some((current, _)) if *current == generation => slot.take().map(|(_, s)| s),
            _ => None,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs `f` on the live session while holding the slot, so it cannot be released
    /// concurrently.
    pub(crate) fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Option<&S>) -> R,
    {
        let slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(slot.as_ref().map(|(_, session)| session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_session_at_a_time() {
        let slot = ChannelSlot::new();

        let first = slot.install("a").unwrap();
        assert!(slot.install("b").is_none(), "second install must be refused");
        assert!(slot.is_live(), "slot should hold the first session");

        assert_eq!(slot.take_if_current(first), Some("a"));
        assert!(!slot.is_live(), "slot should be empty after take");
    }

    #[test]
    fn stale_generation_does_not_release() {
        let slot = ChannelSlot::new();

        let old = slot.install("a").unwrap();
        assert_eq!(slot.take(), Some("a"));
        let new = slot.install("b").unwrap();

        assert_ne!(old, new);
        assert_eq!(slot.take_if_current(old), None);
        assert_eq!(slot.with(|s| s.copied()), Some("b"));
    }
}
