use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Response};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::SseError;
use super::event::{EventData, EventParser};
use crate::Result;
use crate::error::Error;
use crate::stream::Callback;
use crate::stream::delivery::Delivery;
use crate::stream::traits::{ChannelSlot, Link, Transport};

const LAST_EVENT_ID: &str = "Last-Event-ID";
const EVENT_STREAM: &str = "text/event-stream";

pub type EventHandler = Arc<dyn Fn(EventData) + Send + Sync>;
/// Receives the resume cursor at the time of closure.
pub type CloseHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct SseHandlers {
    pub(crate) on_open: Option<Callback>,
    pub(crate) on_event: Option<EventHandler>,
    pub(crate) on_close: Option<CloseHandler>,
    pub(crate) on_error: Option<ErrorHandler>,
}

impl fmt::Debug for SseHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_event", &self.on_event.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Resume state shared by the transport, its session tasks and queued deliveries.
#[derive(Debug, Default)]
struct Cursor {
    /// Id of the last event handed to `on_event`
    delivered: Option<String>,
    /// Id of the last event read off the stream, sent as `Last-Event-ID`. Everything read is
    /// delivered unless the client closes first, and a close rewinds this to `delivered`.
    received: Option<String>,
    /// Bumped by every local close; queued events of an older epoch are dropped.
    epoch: u64,
}

type SharedCursor = Arc<Mutex<Cursor>>;

fn lock(cursor: &SharedCursor) -> MutexGuard<'_, Cursor> {
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Session {
    cancel: CancellationToken,
}

/// How a session task ended.
enum Exit {
    /// The client released the session
    Local,
    /// The server ended the body
    Remote,
    Failed(SseError),
}

pub(crate) struct SseTransport {
    http: HttpClient,
    handlers: SseHandlers,
    delivery: Delivery,
    cursor: SharedCursor,
    slot: Arc<ChannelSlot<Session>>,
    opening: AsyncMutex<()>,
}

impl SseTransport {
    pub(crate) fn new(
        http: HttpClient,
        handlers: SseHandlers,
        delivery: Delivery,
        last_event_id: Option<String>,
    ) -> Self {
        Self {
            http,
            handlers,
            delivery,
            cursor: Arc::new(Mutex::new(Cursor {
                delivered: last_event_id.clone(),
                received: last_event_id,
                epoch: 0,
            })),
            slot: Arc::new(ChannelSlot::new()),
            opening: AsyncMutex::new(()),
        }
    }

    pub(crate) fn last_event_id(&self) -> Option<String> {
        lock(&self.cursor).delivered.clone()
    }

    /// Releases the channel, if any, and returns the resume cursor.
    ///
    /// Once this returns no further event moves the cursor or reaches `on_event`, including
    /// events of a stream the server already ended, so the returned id is the one of the last
    /// event the application saw.
    pub(crate) fn close_session(&self) -> Option<String> {
        let session = self.slot.take();
        self.release(session.as_ref())
    }

    fn release(&self, session: Option<&Session>) -> Option<String> {
        let delivered = {
            let mut guard = lock(&self.cursor);
            let cursor = &mut *guard;
            cursor.epoch = cursor.epoch.wrapping_add(1);
            if let Some(session) = session {
                session.cancel.cancel();
            }
            cursor.received.clone_from(&cursor.delivered);
            cursor.delivered.clone()
        };

        if session.is_some()
            && let Some(on_close) = &self.handlers.on_close
        {
            let on_close = Arc::clone(on_close);
            let last_event_id = delivered.clone();
            self.delivery.submit(move || on_close(last_event_id));
        }
        delivered
    }

    async fn request(&self, url: &Url, last_event_id: Option<&str>) -> Result<Response> {
        let mut request = self
            .http
            .get(url.clone())
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(last_event_id) = last_event_id {
            request = request.header(LAST_EVENT_ID, last_event_id);
        }

        let response = request.send().await.map_err(SseError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SseError::Status(status).into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type
            .get(..EVENT_STREAM.len())
            .is_some_and(|mime| mime.eq_ignore_ascii_case(EVENT_STREAM))
        {
            return Err(SseError::ContentType(content_type.to_owned()).into());
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self, url: &Url, link: Link) -> Result<()> {
        let _opening = self.opening.lock().await;
        if self.slot.is_live() {
            return Ok(());
        }

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SseError::UnsupportedScheme(other.to_owned()).into()),
        }

        let resume_from = lock(&self.cursor).received.clone();

        #[cfg(feature = "tracing")]
        tracing::info!(%url, last_event_id = ?resume_from, "Opening event stream");

        let response = self.request(url, resume_from.as_deref()).await?;

        let cancel = CancellationToken::new();
        let Some(generation) = self.slot.install(Session {
            cancel: cancel.clone(),
        }) else {
            return Ok(());
        };

        if let Some(on_open) = &self.handlers.on_open {
            let on_open = Arc::clone(on_open);
            self.delivery.submit(move || on_open());
        }

        let task = SessionTask {
            slot: Arc::clone(&self.slot),
            generation,
            handlers: self.handlers.clone(),
            delivery: self.delivery.clone(),
            cursor: Arc::clone(&self.cursor),
            link: link.clone(),
        };
        let parser = EventParser::new().with_last_event_id(resume_from.as_deref());
        link.worker().spawn(task.run(response, parser, cancel));

        Ok(())
    }

    fn close_channel(&self) -> bool {
        let Some(session) = self.slot.take() else {
            return false;
        };

        self.release(Some(&session));
        true
    }

    fn is_open(&self) -> bool {
        self.slot.is_live()
    }
}

/// Reads the body of one live event stream.
struct SessionTask {
    slot: Arc<ChannelSlot<Session>>,
    generation: u64,
    handlers: SseHandlers,
    delivery: Delivery,
    cursor: SharedCursor,
    link: Link,
}

impl SessionTask {
    async fn run(self, response: Response, parser: EventParser, cancel: CancellationToken) {
        let exit = tokio::select! {
            biased;

            () = cancel.cancelled() => Exit::Local,
            exit = self.pump(response, parser, &cancel) => exit,
        };

        match exit {
            Exit::Local => {}
            Exit::Remote => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Event stream closed by server");
                self.closed_remotely(None);
            }
            Exit::Failed(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Event stream failed");
                self.closed_remotely(Some(e));
            }
        }
    }

    async fn pump(&self, response: Response, mut parser: EventParser, cancel: &CancellationToken) -> Exit {
        let mut body = pin!(response.bytes_stream());

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return Exit::Failed(SseError::Stream(e)),
            };
            let events = match parser.feed(&bytes) {
                Ok(events) => events,
                Err(e) => return Exit::Failed(e),
            };

            for event in events {
                #[cfg(feature = "tracing")]
                tracing::trace!(id = ?event.id, event = ?event.event, "Received event");

                let epoch = {
                    let mut cursor = lock(&self.cursor);
                    // Checked under the lock a local close cancels under.
                    if cancel.is_cancelled() {
                        return Exit::Local;
                    }
                    cursor.received.clone_from(&event.id);
                    cursor.epoch
                };
                self.deliver(event, epoch);
            }
        }

        Exit::Remote
    }

    fn deliver(&self, event: EventData, epoch: u64) {
        let cursor = Arc::clone(&self.cursor);
        let on_event = self.handlers.on_event.clone();

        self.delivery.submit(move || {
            {
                let mut cursor = lock(&cursor);
                if cursor.epoch != epoch {
                    // Closed by the client after this event was read.
                    return;
                }
                cursor.delivered.clone_from(&event.id);
            }
            if let Some(on_event) = on_event {
                on_event(event);
            }
        });
    }

    fn closed_remotely(&self, failure: Option<SseError>) {
        if self.slot.take_if_current(self.generation).is_none() {
            // Released locally in the meantime.
            return;
        }

        if let Some(e) = failure
            && let Some(on_error) = &self.handlers.on_error
        {
            let on_error = Arc::clone(on_error);
            self.delivery.submit(move || on_error(e.into()));
        }
        if let Some(on_close) = &self.handlers.on_close {
            let on_close = Arc::clone(on_close);
            let cursor = Arc::clone(&self.cursor);
            // Runs after the events queued before it, so it sees their ids.
            self.delivery.submit(move || on_close(lock(&cursor).delivered.clone()));
        }

        self.link.remote_closed();
    }
}
