#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
#[cfg(feature = "sse")]
pub mod sse;
pub mod stream;
#[cfg(feature = "ws")]
pub mod ws;

pub use client::StreamClient;
pub use stream::{Config, ConnectionMonitor, ConnectionState, Executor, MaxRetries};

pub type Result<T> = std::result::Result<T, error::Error>;
