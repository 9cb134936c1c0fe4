//! Transport-agnostic connection lifecycle.
//!
//! This module owns everything the WebSocket and event-stream adapters have in common.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connect/retry/backoff/reconnect state machine around a [`Transport`]
//! - [`Transport`]: what an adapter must provide (open, drop, is-open)
//! - [`ConnectionMonitor`]: registry of live connections for bulk teardown
//! - [`Executor`]: the scheduler and I/O runtime handles connections run on
//!
//! Every user callback of one connection is funnelled through a single in-order delivery
//! queue, so a connection never runs two callbacks at once.

pub mod config;
pub mod connection;
pub(crate) mod delivery;
pub mod executor;
pub mod monitor;
pub mod traits;

pub use config::{Config, MaxRetries};
pub use connection::{Callback, ConnectionManager, ConnectionState, RetryHooks};
pub use executor::Executor;
pub use monitor::ConnectionMonitor;
pub use traits::{Link, Transport};
