use std::fmt;
use std::mem;
use std::time::Duration;

use super::error::SseError;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One event received on an event stream.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    /// Last event ID in effect when the event was dispatched. `None` when the server never
    /// sent one, or reset it with an empty `id` field.
    pub id: Option<String>,
    /// Event type from the `event` field. `None` means the default `message` type.
    pub event: Option<String>,
    /// `data` lines joined with `\n`
    pub data: String,
    /// Reconnection time requested by a `retry` field in the same event block
    pub retry: Option<Duration>,
}

impl fmt::Display for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventData {{ id: {}, event: {}, data: {} }}",
            self.id.as_deref().unwrap_or("-"),
            self.event.as_deref().unwrap_or("message"),
            self.data
        )
    }
}

/// Incremental `text/event-stream` parser.
///
/// Feed it body chunks as they arrive; chunk boundaries may fall anywhere, including
/// between the CR and LF of a line ending. An event is dispatched at the blank line that ends
/// its block, and only if it carried data. A trailing block without a blank line is never
/// dispatched.
///
/// A line longer than the configured maximum (1 MiB by default) fails the stream.
///
/// ```
/// use stream_client::sse::EventParser;
///
/// let mut parser = EventParser::new();
/// assert!(parser.feed(b"id: 7\ndata: hel")?.is_empty());
///
/// let events = parser.feed(b"lo\n\n")?;
/// assert_eq!(events[0].data, "hello");
/// assert_eq!(events[0].id.as_deref(), Some("7"));
/// # Ok::<(), stream_client::sse::SseError>(())
/// ```
#[derive(Debug)]
pub struct EventParser {
    line: Vec<u8>,
    max_line_length: usize,
    /// The previous chunk ended in CR; a leading LF in the next one belongs to it.
    pending_cr: bool,
    started: bool,
    data: String,
    event: Option<String>,
    retry: Option<Duration>,
    last_event_id: String,
}

impl Default for EventParser {
    fn default() -> Self {
        Self {
            line: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            pending_cr: false,
            started: false,
            data: String::new(),
            event: None,
            retry: None,
            last_event_id: String::new(),
        }
    }
}

impl EventParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `last_event_id` in the last event ID buffer, so events of a resumed stream
    /// that carry no `id` field keep reporting it.
    #[must_use]
    pub fn with_last_event_id(mut self, last_event_id: Option<&str>) -> Self {
        last_event_id.unwrap_or_default().clone_into(&mut self.last_event_id);
        self
    }

    /// Caps the length of a single line, line ending excluded.
    #[must_use]
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Parses `chunk` and returns every event it completed.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::LineTooLong`] once a line grows past the maximum length. The
    /// parser must not be fed again after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<EventData>, SseError> {
        let mut events = Vec::new();
        let mut rest = chunk;

        if mem::take(&mut self.pending_cr)
            && let Some((b'\n', after)) = rest.split_first()
        {
            rest = after;
        }

        while let Some(end) = rest.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            let (content, tail) = rest.split_at(end);
            self.extend_line(content)?;

            rest = match tail.split_first() {
                Some((b'\r', after)) => match after.split_first() {
                    Some((b'\n', after_lf)) => after_lf,
                    Some(_) => after,
                    None => {
                        self.pending_cr = true;
                        after
                    }
                },
                Some((_, after)) => after,
                None => tail,
            };

            let line = mem::take(&mut self.line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.extend_line(rest)?;
        Ok(events)
    }

    fn extend_line(&mut self, content: &[u8]) -> Result<(), SseError> {
        if self.line.len().saturating_add(content.len()) > self.max_line_length {
            self.line.clear();
            return Err(SseError::LineTooLong(self.max_line_length));
        }
        self.line.extend_from_slice(content);
        Ok(())
    }

    /// Last event ID seen on the stream, including ids of blocks that carried no data.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        (!self.last_event_id.is_empty()).then_some(self.last_event_id.as_str())
    }

    fn process_line(&mut self, mut line: &[u8]) -> Option<EventData> {
        if !self.started {
            self.started = true;
            line = line.strip_prefix(BOM).unwrap_or(line);
        }

        if line.is_empty() {
            return self.dispatch();
        }
        if line.first() == Some(&b':') {
            return None;
        }

        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(colon) => {
                let (field, value) = line.split_at(colon);
                let value = &value[1..];
                (field, value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value);

        match field {
            b"event" => self.event = Some(value.into_owned()),
            b"data" => {
                self.data.push_str(&value);
                self.data.push('\n');
            }
            b"id" if !value.contains('\0') => self.last_event_id = value.into_owned(),
            b"retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<EventData> {
        let event = self.event.take();
        let retry = self.retry.take();
        let mut data = mem::take(&mut self.data);

        if data.is_empty() {
            return None;
        }
        data.pop();

        Some(EventData {
            id: self.last_event_id().map(str::to_owned),
            event,
            data,
            retry,
        })
    }
}
