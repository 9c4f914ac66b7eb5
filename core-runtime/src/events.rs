//! # Event Bus System
//!
//! Typed domain events broadcast over `tokio::sync::broadcast`, so the sync
//! session, the background interceptor and the host UI stay decoupled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Sync Session ├────────────>│           │   subscribe   ┌────────────┐
//! └──────────────┘             │ EventBus  ├──────────────>│  Host UI   │
//! ┌──────────────┐    emit     │ (broadcast│               └────────────┘
//! │ Interceptor  ├────────────>│  channel) │   subscribe   ┌────────────┐
//! └──────────────┘             │           ├──────────────>│  Logging   │
//! ┌──────────────┐    emit     │           │               └────────────┘
//! │   Catalog    ├────────────>│           │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Progress {
//!         session_id: "s-1".to_string(),
//!         completed: 3,
//!         total: 10,
//!         percent: 30,
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert_eq!(received.description(), "Offline download in progress");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed. Publishers ignore that with
//! `.ok()` since events are advisory.

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Offline download session events
    Sync(SyncEvent),
    /// Persistent cache changes
    Cache(CacheEvent),
    /// Catalog and manifest events
    Catalog(CatalogEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Catalog(CatalogEvent::ManifestUnavailable { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::PackageFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            CoreEvent::Catalog(CatalogEvent::ChangeDetected { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of an offline download session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Planning finished and fetching is about to begin.
    Started {
        session_id: String,
        categories: Vec<String>,
        /// Documents that still need to be stored
        total: u64,
    },
    /// A document was stored.
    Progress {
        session_id: String,
        completed: u64,
        total: u64,
        /// Capped at 99 until the session finalizes
        percent: u8,
    },
    /// A package part could not be fetched or extracted.
    PackageFailed {
        session_id: String,
        category: String,
        url: String,
        message: String,
    },
    /// Session finalized. `failed > 0` means a partial completion.
    Completed {
        session_id: String,
        completed: u64,
        failed: u64,
        total: u64,
    },
    /// Session aborted with an error.
    Failed { session_id: String, message: String },
    /// Session cancelled by the user.
    Cancelled { session_id: String, completed: u64 },
}

impl SyncEvent {
    pub fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Offline download started",
            SyncEvent::Progress { .. } => "Offline download in progress",
            SyncEvent::PackageFailed { .. } => "Offline package failed",
            SyncEvent::Completed { .. } => "Offline download completed",
            SyncEvent::Failed { .. } => "Offline download failed",
            SyncEvent::Cancelled { .. } => "Offline download cancelled",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A response was written by the background interceptor.
    Stored { namespace: String, url: String },
    /// A namespace (or all of them) was cleared.
    Cleared { namespaces: Vec<String> },
}

impl CacheEvent {
    pub fn description(&self) -> &str {
        match self {
            CacheEvent::Stored { .. } => "Response cached",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Catalog Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    /// The content manifest was loaded.
    Loaded {
        documents: usize,
        /// True when served from the cached copy
        from_cache: bool,
    },
    /// The catalog fingerprint differs from the last persisted one.
    ChangeDetected { previous: String, current: String },
    /// Neither the network nor the cache could provide a manifest.
    ManifestUnavailable { url: String, message: String },
}

impl CatalogEvent {
    pub fn description(&self) -> &str {
        match self {
            CatalogEvent::Loaded { .. } => "Catalog loaded",
            CatalogEvent::ChangeDetected { .. } => "Catalog changed",
            CatalogEvent::ManifestUnavailable { .. } => "Manifest unavailable",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast hub for [`CoreEvent`]s. Clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Publishes to every current subscriber and returns how many there were.
    ///
    /// # Errors
    ///
    /// Fails when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receiver for events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Events emitted from now on, as a stream.
    ///
    /// A subscriber that falls behind skips the missed events and keeps
    /// going; the stream ends when every bus is dropped.
    ///
    /// ```rust
    /// use core_runtime::events::{CoreEvent, EventBus};
    /// use futures::StreamExt;
    ///
    /// let bus = EventBus::new(16);
    /// let cache_events = bus
    ///     .stream()
    ///     .filter(|event| futures::future::ready(matches!(event, CoreEvent::Cache(_))));
    /// ```
    pub fn stream(&self) -> BoxStream<'static, CoreEvent> {
        stream::unfold(self.subscribe(), |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({} subscribers)", self.subscriber_count())
    }
}

// ============================================================================
// Tests
// ============================================================================
