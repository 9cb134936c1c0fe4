use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;

/// Action that force-closes one connection.
pub type Teardown = Arc<dyn Fn() + Send + Sync>;

/// Registry of open connections, used to tear all of them down at once.
///
/// Entries are added when a connection goes live and removed when it closes. The registry
/// only holds the teardown closure; connections register closures over a weak reference so
/// an entry never keeps a connection alive. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ConnectionMonitor {
    connections: Arc<DashMap<String, Teardown>>,
}

impl ConnectionMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `teardown` under `id`, replacing any previous entry for the same id.
    pub fn add(&self, id: &str, teardown: Teardown) {
        self.connections.insert(id.to_owned(), teardown);
    }

    /// Unregisters `id`. Does nothing if it is not registered.
    pub fn remove(&self, id: &str) {
        self.connections.remove(id);
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Removes and runs every registered teardown.
    ///
    /// A panicking teardown is logged and the remaining ones still run. The registry is left
    /// empty and can accept new connections afterwards.
    pub fn shutdown_all(&self) {
        let ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        #[cfg(feature = "tracing")]
        tracing::info!(count = ids.len(), "Closing all monitored connections");

        for id in ids {
            // Remove before running: teardowns unregister themselves, which would deadlock on
            // a held shard lock.
            let Some((id, teardown)) = self.connections.remove(&id) else {
                continue;
            };

            if catch_unwind(AssertUnwindSafe(|| teardown())).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(%id, "Teardown panicked while closing connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &id;
            }
        }
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("connections", &self.connections.len())
            .finish()
    }
}
