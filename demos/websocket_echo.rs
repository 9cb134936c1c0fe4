//! Resilient WebSocket session against an echo server.
//!
//! Sends a few JSON messages, prints what comes back and closes gracefully. Kill the network
//! while it runs to watch the connection retry and recover.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,stream_client=debug cargo run --example websocket_echo --features ws,tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use serde_json::json;
use stream_client::ws::Heartbeat;
use stream_client::{Config, MaxRetries, StreamClient};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let config = Config::builder()
        .retry_interval(Duration::from_millis(500))
        .max_retry_interval(Duration::from_secs(10))
        .backoff_multiplier(2.0)
        .max_retries(MaxRetries::Limited(10))
        .build();
    let client = StreamClient::new()?.with_config(config);

    let connection = client
        .ws(&url)
        .heartbeat(Heartbeat::default())
        .on_open(|| info!("open"))
        .on_message(|message| info!(%message, "received"))
        .on_close(|frame| info!(?frame, "closed"))
        .on_error(|error| warn!(%error, "stream failed"))
        .on_failed_attempt(|| warn!("connect attempt failed"))
        .on_retries_exceeded(|| warn!("giving up"))
        .connect()?;

    let mut state = connection.state_receiver();
    tokio::time::timeout(Duration::from_secs(10), state.wait_for(|s| s.is_connected())).await??;

    for seq in 0..3 {
        connection.send_json(&json!({ "type": "ping", "seq": seq }))?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    connection.close();
    client.shutdown();

    Ok(())
}
