use std::time::Duration;

use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);

/// Ping/pong keep-alive for a WebSocket channel.
///
/// A PING frame is sent every `interval`. When no PONG has come back `timeout` after the
/// oldest unanswered PING, the channel is treated as dead: it is dropped and, with auto
/// reconnect on, a new one is opened.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Builder)]
pub struct Heartbeat {
    /// Interval for sending PING frames to keep the connection alive
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub interval: Duration,
    /// Maximum time to wait for a PONG before considering the connection dead
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::builder().build()
    }
}
