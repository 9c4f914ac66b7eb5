//! Time-related re-exports.

pub use std::time::{Duration, Instant};
pub use tokio::time::error::Elapsed;
pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};
