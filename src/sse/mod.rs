//! Server-Sent Events adapter.
//!
//! A live channel is one streaming `GET` with `Accept: text/event-stream`. Its body is parsed
//! incrementally by [`EventParser`] and every event is handed to `on_event`. The id of the
//! last delivered event is kept as a resume cursor and sent back as `Last-Event-ID` whenever
//! the stream is reopened, so a server that honours the header continues where the client
//! left off.

pub mod connection;
pub mod error;
pub mod event;
pub(crate) mod transport;

pub use connection::{SseBuilder, SseConnection};
#[expect(
    clippy::module_name_repetitions,
    reason = "SseError includes module name for clarity when used outside this module"
)]
pub use error::SseError;
pub use event::{EventData, EventParser};
pub use transport::{CloseHandler, ErrorHandler, EventHandler};
