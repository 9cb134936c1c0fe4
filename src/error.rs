use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error opening or reading a transport channel
    Connection,
    /// Data was handed to a connection that has no live channel
    NotConnected,
    /// The configured maximum number of connect attempts was used up
    RetriesExceeded,
    /// A connect attempt did not complete in time
    Timeout,
    /// Error related to invalid configuration within stream-client
    Validation,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_connected(id: &str) -> Self {
        NotConnected { id: id.to_owned() }.into()
    }

    #[must_use]
    pub fn retries_exceeded(max_retries: u32) -> Self {
        RetriesExceeded { max_retries }.into()
    }

    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Error::with_source(Kind::Timeout, Timeout { after })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// Returned when sending on a connection that has no live channel.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct NotConnected {
    /// Identifier of the connection the data was handed to
    pub id: String,
}

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {} is not connected", self.id)
    }
}

impl StdError for NotConnected {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct RetriesExceeded {
    pub max_retries: u32,
}

impl fmt::Display for RetriesExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max retries ({}) exceeded, not reconnecting",
            self.max_retries
        )
    }
}

impl StdError for RetriesExceeded {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    pub after: std::time::Duration,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connect attempt timed out after {:?}", self.after)
    }
}

impl StdError for Timeout {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<NotConnected> for Error {
    fn from(err: NotConnected) -> Self {
        Error::with_source(Kind::NotConnected, err)
    }
}

impl From<RetriesExceeded> for Error {
    fn from(err: RetriesExceeded) -> Self {
        Error::with_source(Kind::RetriesExceeded, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<tokio::runtime::TryCurrentError> for Error {
    fn from(e: tokio::runtime::TryCurrentError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display_should_succeed() {
        let error = Error::not_connected("3f2a9c01");

        assert_eq!(error.kind(), Kind::NotConnected);
        assert_eq!(
            error.to_string(),
            "NotConnected: connection 3f2a9c01 is not connected"
        );
    }

    #[test]
    fn retries_exceeded_downcast_should_succeed() {
        let error = Error::retries_exceeded(3);

        assert_eq!(error.kind(), Kind::RetriesExceeded);
        let inner = error.downcast_ref::<RetriesExceeded>().unwrap();
        assert_eq!(inner.max_retries, 3, "max retries should be preserved");
    }

    #[test]
    fn url_parse_error_is_validation() {
        let error: Error = url::Url::parse("not a url").unwrap_err().into();

        assert_eq!(error.kind(), Kind::Validation);
    }
}
