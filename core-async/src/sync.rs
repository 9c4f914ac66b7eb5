//! Synchronization primitives.
//!
//! All types are tokio's async-aware primitives: they are `Send + Sync`
//! and never block the executor while waiting.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedMutexGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

/// Cooperative cancellation handle shared between a session and its workers.
pub use tokio_util::sync::CancellationToken;
