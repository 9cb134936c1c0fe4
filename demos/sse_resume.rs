//! Server-Sent Events with resume.
//!
//! Reads events for a while, closes, then opens a second connection that picks up from the
//! id the first one returned.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example sse_resume --features sse,tracing -- https://sse.dev/test
//! ```

use std::time::Duration;

use stream_client::StreamClient;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://sse.dev/test".to_owned());
    let client = StreamClient::new()?;

    let first = client
        .sse(&url)
        .on_open(|| info!(connection = "first", "open"))
        .on_event(|event| info!(connection = "first", %event))
        .on_error(|error| warn!(%error, "stream failed"))
        .connect()?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    let last_event_id = first.close();
    info!(?last_event_id, "first connection closed");

    let second = client
        .sse(&url)
        .last_event_id(last_event_id)
        .on_open(|| info!(connection = "second", "open"))
        .on_event(|event| info!(connection = "second", %event))
        .on_close(|last_event_id| info!(?last_event_id, "second connection closed"))
        .connect()?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    info!(last_event_id = ?second.last_event_id(), "resume cursor");

    client.shutdown();

    Ok(())
}
