//! Background worker loop
//!
//! Owns the receiving end of the request channel. Downloads run as separate
//! tasks so `CANCEL_DOWNLOAD` is answered while a batch is in flight.

use core_async::sync::{mpsc, CancellationToken, Mutex};
use core_async::task::JoinHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::InterceptorClient;
use crate::interceptor::Interceptor;
use crate::protocol::{WorkerRequest, WorkerResponse};

const CHANNEL_CAPACITY: usize = 32;

/// A request and where its responses go.
pub(crate) struct Envelope {
    pub request: WorkerRequest,
    pub reply: mpsc::UnboundedSender<WorkerResponse>,
}

pub struct InterceptorWorker {
    interceptor: Arc<Interceptor>,
    receiver: mpsc::Receiver<Envelope>,
    /// Parent of every running download's token; replaced after each cancel
    cancel: Mutex<CancellationToken>,
}

impl InterceptorWorker {
    /// Creates a worker and a client connected to it. Call [`run`](Self::run)
    /// (or use [`spawn_worker`]) to start answering.
    pub fn new(interceptor: Arc<Interceptor>, timeout: Duration) -> (Self, InterceptorClient) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Self {
            interceptor,
            receiver,
            cancel: Mutex::new(CancellationToken::new()),
        };
        (worker, InterceptorClient::new(sender, timeout))
    }

    /// Answers requests until every client is dropped.
    pub async fn run(mut self) {
        info!("Interceptor worker started");
        while let Some(envelope) = self.receiver.recv().await {
            self.dispatch(envelope).await;
        }
        info!("Interceptor worker stopped");
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Envelope { request, reply } = envelope;
        debug!(request = request.name(), "Worker request");

        match request {
            WorkerRequest::DownloadPdfs {
                pdfs_to_download,
                batch_size,
            } => {
                let token = self.cancel.lock().await.child_token();
                let interceptor = Arc::clone(&self.interceptor);
                core_async::task::spawn(async move {
                    let progress = reply.clone();
                    let outcome = interceptor
                        .download_batch(&pdfs_to_download, batch_size, &token, |update| {
                            progress.send(WorkerResponse::Progress(update)).ok();
                        })
                        .await;
                    let response = if outcome.cancelled {
                        WorkerResponse::Cancelled(outcome.progress)
                    } else {
                        WorkerResponse::Complete(outcome.progress)
                    };
                    reply.send(response).ok();
                });
            }
            WorkerRequest::CancelDownload => {
                let mut root = self.cancel.lock().await;
                root.cancel();
                *root = CancellationToken::new();
                info!("Cancelled running downloads");
                reply.send(WorkerResponse::CancelConfirmed).ok();
            }
            WorkerRequest::GetCachedPdfs => {
                let response = match self.interceptor.cached_documents().await {
                    Ok(pdfs) => WorkerResponse::CachedPdfs {
                        count: pdfs.len(),
                        pdfs,
                    },
                    Err(e) => WorkerResponse::Error {
                        error: e.to_string(),
                    },
                };
                reply.send(response).ok();
            }
            WorkerRequest::ClearCache => {
                let response = match self.interceptor.clear_all().await {
                    Ok(()) => WorkerResponse::CacheCleared,
                    Err(e) => WorkerResponse::Error {
                        error: e.to_string(),
                    },
                };
                reply.send(response).ok();
            }
        }
    }
}

/// Spawns the worker on the runtime and returns its client.
pub fn spawn_worker(
    interceptor: Arc<Interceptor>,
    timeout: Duration,
) -> (InterceptorClient, JoinHandle<()>) {
    let (worker, client) = InterceptorWorker::new(interceptor, timeout);
    let handle = core_async::task::spawn(worker.run());
    (client, handle)
}
