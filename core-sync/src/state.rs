//! # Sync State
//!
//! The observable state of offline downloads.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Planning → Fetching ⇄ Extracting → Verifying → Completed
//!           │           │           │            └──────→ PartiallyFailed
//!           └───────────┴───────────┴──────────────────→ Cancelled | Error
//! ```
//!
//! A new session may enter `Planning` from any phase. The state is owned by a
//! [`SyncStateHandle`]; readers always get a whole-record snapshot.

use core_async::sync::watch;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// Phase of the current (or last) sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Planning,
    Fetching,
    Extracting,
    Verifying,
    Completed,
    PartiallyFailed,
    Cancelled,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Planning => "planning",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Extracting => "extracting",
            SyncPhase::Verifying => "verifying",
            SyncPhase::Completed => "completed",
            SyncPhase::PartiallyFailed => "partially_failed",
            SyncPhase::Cancelled => "cancelled",
            SyncPhase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Completed
                | SyncPhase::PartiallyFailed
                | SyncPhase::Cancelled
                | SyncPhase::Error
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Planning | SyncPhase::Fetching | SyncPhase::Extracting | SyncPhase::Verifying
        )
    }

    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (_, Planning) | (_, Idle) => true,
            (Planning, Fetching | Completed | Cancelled | Error) => true,
            (Fetching | Extracting, Fetching | Extracting | Verifying | Cancelled | Error) => true,
            (Verifying, Completed | PartiallyFailed | Cancelled | Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the offline download state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Offline mode is enabled
    pub enabled: bool,
    pub downloading: bool,
    pub phase: SyncPhase,
    /// 0..=100; stays at or below 99 until the session finalizes
    pub progress: u8,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub selected_categories: Vec<String>,
    pub downloaded_categories: Vec<String>,
    /// Human-readable message for the UI
    pub error: Option<String>,
    pub session_id: Option<String>,
}

/// `min(99, floor(completed / total * 100))`.
pub fn progress_percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = completed.saturating_mul(100) / total;
    percent.min(99) as u8
}

/// Shared owner of the [`SyncState`].
///
/// Cloning yields another handle to the same state; independent handles
/// (e.g. one per test) never observe each other.
#[derive(Clone)]
pub struct SyncStateHandle {
    sender: Arc<watch::Sender<SyncState>>,
}

impl SyncStateHandle {
    pub fn new() -> Self {
        Self::with_state(SyncState::default())
    }

    pub fn with_state(initial: SyncState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> SyncState {
        self.sender.borrow().clone()
    }

    /// Receiver that observes every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.sender.subscribe()
    }

    /// Mutates the state and notifies subscribers once.
    pub fn update(&self, mutate: impl FnOnce(&mut SyncState)) {
        self.sender.send_modify(mutate);
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&self, next: SyncPhase) -> Result<()> {
        let current = self.sender.borrow().phase;
        if !current.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: current,
                to: next,
            });
        }
        self.update(|state| state.phase = next);
        Ok(())
    }

    /// Stream of state snapshots, one per change.
    ///
    /// Rapid updates may be coalesced; the latest state is always delivered.
    /// The stream ends when every handle has been dropped.
    pub fn progress_stream(&self) -> impl Stream<Item = SyncState> + Send + 'static {
        let receiver = self.subscribe();
        futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let state = receiver.borrow_and_update().clone();
            Some((state, receiver))
        })
    }
}

impl Default for SyncStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncStateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateHandle")
            .field("state", &*self.sender.borrow())
            .finish()
    }
}
