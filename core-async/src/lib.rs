//! Async runtime facade for the chart library workspace.
//!
//! Higher crates depend on this crate instead of reaching into tokio
//! directly, so the set of primitives in use stays small and visible.
//!
//! # Modules
//!
//! - `task`: Task spawning and cooperative yielding
//! - `time`: Sleep, timeouts and clock types
//! - `sync`: Locks, channels and cancellation tokens
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let token = CancellationToken::new();
//!     let child = token.child_token();
//!     let handle = core_async::spawn(async move {
//!         core_async::select! {
//!             _ = child.cancelled() => "cancelled",
//!             _ = sleep(Duration::from_secs(60)) => "finished",
//!         }
//!     });
//!     token.cancel();
//!     assert_eq!(handle.await.unwrap(), "cancelled");
//! }
//! ```

pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
pub use tokio::select;
