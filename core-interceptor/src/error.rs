use bridge_traits::error::BridgeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterceptorError {
    #[error("Invalid request URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid worker request: {0}")]
    InvalidRequest(String),

    #[error("Network request for {url} failed and no cached copy exists: {message}")]
    Unavailable { url: String, message: String },

    #[error("Background worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Background worker is not running")]
    WorkerUnavailable,

    #[error("Background worker reported an error: {0}")]
    Worker(String),

    #[error("Unexpected response from background worker: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error("Storage error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, InterceptorError>;
