use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error(transparent)]
    Sync(#[from] core_sync::SyncError),

    #[error(transparent)]
    Library(#[from] core_library::LibraryError),

    #[error(transparent)]
    Interceptor(#[from] core_interceptor::InterceptorError),

    #[error("Storage error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
