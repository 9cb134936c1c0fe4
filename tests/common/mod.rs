#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::fmt::Debug;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;

use stream_client::{Config, MaxRetries};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Retries quickly so that reconnect scenarios finish in milliseconds.
#[must_use]
pub fn fast_config(max_retries: MaxRetries) -> Config {
    Config::builder()
        .retry_interval(Duration::from_millis(20))
        .max_retries(max_retries)
        .connect_timeout(Duration::from_secs(2))
        .build()
}

/// Next value on `rx`, failing the test after [`WAIT`].
pub async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

/// Asserts that nothing more arrives on `rx` for a short while.
pub async fn assert_quiet<T: Debug>(rx: &mut UnboundedReceiver<T>) {
    if let Ok(Some(value)) = timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected callback: {value:?}");
    }
}

/// An address nothing listens on.
#[must_use]
pub fn unused_addr() -> SocketAddr {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Opt-in log output: `RUST_LOG=stream_client=debug cargo test --features tracing`.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}
