//! # Host Bridge Traits
//!
//! Capabilities the offline sync core needs from its host.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with cache bypass and cancellation
//! - [`CacheStore`](storage::CacheStore) - Namespaced, persistent URL → response cache
//! - [`SettingsStore`](storage::SettingsStore) - Key-value storage for sync bookkeeping
//! - [`Clock`](time::Clock) - Injectable time source
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! Native implementations live in `bridge-desktop`. The core fails fast with a
//! `CapabilityMissing` error when a required capability is not injected.
//!
//! All traits are `Send + Sync` so adapters can be shared across tasks behind
//! an `Arc`.

pub mod error;
pub mod http;
pub mod log;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{CacheMode, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use storage::{CacheEntry, CacheStore, SettingsStore};
pub use time::{Clock, SystemClock};
