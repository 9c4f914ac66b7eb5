use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

use crate::state::SyncPhase;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Select at least one category")]
    NoCategoriesSelected,

    #[error("No documents found in the selected categories")]
    NoDocuments,

    /// Neither the network nor a cached copy could supply a manifest.
    #[error("Could not load the offline package index: {message}")]
    ManifestUnavailable { url: String, message: String },

    #[error("Failed to download package {url} for {category}: {message}")]
    PackageFetchFailed {
        category: String,
        url: String,
        message: String,
    },

    #[error("Failed to extract package {url}: {message}")]
    ExtractionFailed { url: String, message: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidStateTransition { from: SyncPhase, to: SyncPhase },

    #[error(transparent)]
    Library(LibraryError),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error("Storage error: {0}")]
    Bridge(BridgeError),
}

impl From<LibraryError> for SyncError {
    fn from(error: LibraryError) -> Self {
        match error {
            LibraryError::ManifestUnavailable { url, message } => {
                SyncError::ManifestUnavailable { url, message }
            }
            other => SyncError::Library(other),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Cancelled => SyncError::Cancelled,
            other => SyncError::Bridge(other),
        }
    }
}

impl SyncError {
    /// Errors that end a category but let sibling categories proceed.
    pub fn is_category_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::PackageFetchFailed { .. } | SyncError::ExtractionFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_bridge_error_maps_to_cancelled() {
        assert!(matches!(
            SyncError::from(BridgeError::Cancelled),
            SyncError::Cancelled
        ));
        assert!(matches!(
            SyncError::from(BridgeError::Timeout("slow".to_string())),
            SyncError::Bridge(_)
        ));
    }

    #[test]
    fn test_manifest_error_is_actionable() {
        let error = SyncError::from(LibraryError::ManifestUnavailable {
            url: "https://charts.example/offline-manifest.json".to_string(),
            message: "HTTP 503".to_string(),
        });
        assert!(error
            .to_string()
            .starts_with("Could not load the offline package index"));
        assert!(!error.is_category_scoped());
        assert!(!SyncError::Cancelled.is_category_scoped());
        assert!(SyncError::ExtractionFailed {
            url: "https://charts.example/packages/Cifra.zip".to_string(),
            message: "bad header".to_string(),
        }
        .is_category_scoped());
    }
}
