//! # Background Interceptor
//!
//! Request interception backed by the persistent cache, plus a message
//! driven worker for per-document batch downloads.
//!
//! ## Overview
//!
//! - [`Interceptor`] answers outgoing requests cache-first (documents, app
//!   resources) or network-first (navigation), precaches the app shell and
//!   removes stale cache namespaces.
//! - [`InterceptorWorker`] receives [`WorkerRequest`]s over a channel and
//!   replies with [`WorkerResponse`]s.
//! - [`InterceptorClient`] is the sending side, with a bounded wait for every
//!   response.
//!
//! ```rust,ignore
//! let interceptor = Arc::new(Interceptor::from_config(&config)?);
//! let (client, _worker) = spawn_worker(interceptor, config.message_timeout);
//!
//! let outcome = client
//!     .download_documents(urls, 10, |p| println!("{}%", p.percentage))
//!     .await?;
//! ```

pub mod client;
pub mod error;
pub mod interceptor;
pub mod protocol;
pub mod routing;
pub mod worker;

pub use client::InterceptorClient;
pub use error::{InterceptorError, Result};
pub use interceptor::{BatchOutcome, Interceptor};
pub use protocol::{BatchProgress, WorkerRequest, WorkerResponse, DEFAULT_BATCH_SIZE};
pub use routing::{classify, is_document_path, FetchRequest, FetchResponse, RequestKind, ResponseSource};
pub use worker::{spawn_worker, InterceptorWorker};
