//! # Offline Sync Module
//!
//! Downloads document categories for offline use.
//!
//! ## Components
//!
//! - **Sync State** (`state`): observable session state with validated phase transitions
//! - **Planner** (`planner`): decides which documents still need to be stored
//! - **Package Archive** (`archive`): lazy zip entry reader
//! - **Bookkeeping** (`bookkeeping`): offline flag, fingerprint and category lists
//! - **Sync Coordinator** (`coordinator`): runs sessions with cancellation and progress

pub mod archive;
pub mod bookkeeping;
pub mod coordinator;
pub mod error;
pub mod planner;
pub mod state;

pub use archive::{ArchiveEntry, PackageArchive};
pub use bookkeeping::Bookkeeping;
pub use coordinator::{missing_documents_message, SyncCoordinator, SyncReport, CANCELLED_MESSAGE};
pub use error::{Result, SyncError};
pub use planner::{is_likely_same_document, plan, CacheIndex, CategoryPlan, PendingDocument, SyncPlan};
pub use state::{progress_percent, SyncPhase, SyncState, SyncStateHandle};
