//! WebSocket adapter.
//!
//! One background task per live channel owns the socket. It forwards outgoing frames queued
//! by [`WsConnection::send`], hands text and binary frames to `on_message`, answers the
//! optional [`Heartbeat`], and reports a remote close or a failure back to the lifecycle
//! engine, which decides whether to reconnect.

pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod transport;

pub use config::Heartbeat;
pub use connection::{WsBuilder, WsConnection};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use tokio_tungstenite::tungstenite::Message;
pub use tokio_tungstenite::tungstenite::protocol::CloseFrame;
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
pub use transport::{CloseHandler, ErrorHandler, MessageHandler};
