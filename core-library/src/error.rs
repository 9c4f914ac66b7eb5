use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    /// The identifier could not be decoded into a storage path.
    #[error("Invalid document locator '{id}': {reason}")]
    InvalidLocator { id: String, reason: String },

    /// Neither the network nor the cache could provide a manifest.
    #[error("Manifest unavailable at {url}: {message}")]
    ManifestUnavailable { url: String, message: String },

    #[error("Malformed manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),
}

impl LibraryError {
    pub(crate) fn invalid_locator(id: &str, reason: impl Into<String>) -> Self {
        LibraryError::InvalidLocator {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
