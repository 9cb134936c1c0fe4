#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use reqwest::StatusCode;

use crate::error::{Error, Kind};

/// Event-stream error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum SseError {
    /// The GET request could not be sent or its headers were not received
    Request(reqwest::Error),
    /// The server answered with a non-success status
    Status(StatusCode),
    /// The response is not `text/event-stream`
    ContentType(String),
    /// The body stream failed after the channel opened
    Stream(reqwest::Error),
    /// A line of the body exceeded the parser's maximum length
    LineTooLong(usize),
    /// The URL scheme is not `http` or `https`
    UnsupportedScheme(String),
}

impl fmt::Display for SseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "Event stream request failed: {e}"),
            Self::Status(status) => write!(f, "Event stream rejected with status {status}"),
            Self::ContentType(content_type) => {
                write!(f, "Expected text/event-stream, got {content_type:?}")
            }
            Self::Stream(e) => write!(f, "Event stream read failed: {e}"),
            Self::LineTooLong(max) => write!(f, "Event stream line longer than {max} bytes"),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported event stream URL scheme: {scheme}")
            }
        }
    }
}

impl StdError for SseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request(e) | Self::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SseError> for Error {
    fn from(e: SseError) -> Self {
        let kind = match e {
            SseError::Request(_)
            | SseError::Status(_)
            | SseError::ContentType(_)
            | SseError::Stream(_)
            | SseError::LineTooLong(_) => Kind::Connection,
            SseError::UnsupportedScheme(_) => Kind::Validation,
        };
        Error::with_source(kind, e)
    }
}
