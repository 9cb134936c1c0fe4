#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Kind};

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error serializing an outgoing message
    MessageSerialize(serde_json::Error),
    /// No PONG arrived within the heartbeat timeout
    HeartbeatTimeout(Duration),
    /// The URL scheme is not `ws` or `wss`
    UnsupportedScheme(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageSerialize(e) => write!(f, "Failed to serialize WebSocket message: {e}"),
            Self::HeartbeatTimeout(after) => {
                write!(f, "WebSocket heartbeat timeout: no PONG within {after:?}")
            }
            Self::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported WebSocket URL scheme: {scheme}")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageSerialize(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::Connection(_) | WsError::HeartbeatTimeout(_) => Kind::Connection,
            WsError::MessageSerialize(_) => Kind::Internal,
            WsError::UnsupportedScheme(_) => Kind::Validation,
        };
        Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Connection, WsError::Connection(e))
    }
}
