use core_async::sync::mpsc;
use std::time::Duration;
use tracing::warn;

use crate::error::{InterceptorError, Result};
use crate::interceptor::BatchOutcome;
use crate::protocol::{BatchProgress, WorkerRequest, WorkerResponse};
use crate::worker::Envelope;

/// Sends requests to the background worker.
///
/// Every wait for a response is bounded by the client's timeout; a batch
/// download stays alive as long as progress keeps arriving.
#[derive(Clone)]
pub struct InterceptorClient {
    sender: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl InterceptorClient {
    pub(crate) fn new(sender: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a request and returns its final response. Progress responses are
    /// skipped.
    pub async fn request(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let mut responses = self.send(request).await?;
        loop {
            let response = self.next(&mut responses).await?;
            if response.is_final() {
                return Ok(response);
            }
        }
    }

    /// Downloads `urls` through the worker, calling `on_progress` once per
    /// batch.
    pub async fn download_documents<F>(
        &self,
        urls: Vec<String>,
        batch_size: usize,
        mut on_progress: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(&BatchProgress),
    {
        let mut responses = self
            .send(WorkerRequest::download(urls, batch_size))
            .await?;
        loop {
            let response = match self.next(&mut responses).await {
                Ok(response) => response,
                Err(e) => {
                    if matches!(e, InterceptorError::Timeout(_)) {
                        self.abandon_download();
                    }
                    return Err(e);
                }
            };
            match response {
                WorkerResponse::Progress(progress) => on_progress(&progress),
                WorkerResponse::Complete(progress) => {
                    return Ok(BatchOutcome {
                        progress,
                        cancelled: false,
                    })
                }
                WorkerResponse::Cancelled(progress) => {
                    return Ok(BatchOutcome {
                        progress,
                        cancelled: true,
                    })
                }
                WorkerResponse::Error { error } => return Err(InterceptorError::Worker(error)),
                other => return Err(unexpected(&other)),
            }
        }
    }

    pub async fn cancel_download(&self) -> Result<()> {
        match self.request(WorkerRequest::CancelDownload).await? {
            WorkerResponse::CancelConfirmed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn cached_documents(&self) -> Result<Vec<String>> {
        match self.request(WorkerRequest::GetCachedPdfs).await? {
            WorkerResponse::CachedPdfs { pdfs, .. } => Ok(pdfs),
            WorkerResponse::Error { error } => Err(InterceptorError::Worker(error)),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn clear_cache(&self) -> Result<()> {
        match self.request(WorkerRequest::ClearCache).await? {
            WorkerResponse::CacheCleared => Ok(()),
            WorkerResponse::Error { error } => Err(InterceptorError::Worker(error)),
            other => Err(unexpected(&other)),
        }
    }

    /// Asks the worker to stop a download nobody waits for any more.
    fn abandon_download(&self) {
        let (reply, _) = mpsc::unbounded_channel();
        let envelope = Envelope {
            request: WorkerRequest::CancelDownload,
            reply,
        };
        if self.sender.try_send(envelope).is_err() {
            warn!("Could not ask the background worker to stop an abandoned download");
        }
    }

    async fn send(
        &self,
        request: WorkerRequest,
    ) -> Result<mpsc::UnboundedReceiver<WorkerResponse>> {
        let (reply, responses) = mpsc::unbounded_channel();
        self.sender
            .send(Envelope { request, reply })
            .await
            .map_err(|_| InterceptorError::WorkerUnavailable)?;
        Ok(responses)
    }

    async fn next(
        &self,
        responses: &mut mpsc::UnboundedReceiver<WorkerResponse>,
    ) -> Result<WorkerResponse> {
        match core_async::time::timeout(self.timeout, responses.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(InterceptorError::WorkerUnavailable),
            Err(_) => {
                warn!(timeout = ?self.timeout, "Background worker timed out");
                Err(InterceptorError::Timeout(self.timeout))
            }
        }
    }
}

fn unexpected(response: &WorkerResponse) -> InterceptorError {
    InterceptorError::UnexpectedResponse(response.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_silent_worker_times_out() {
        let (sender, _receiver) = mpsc::channel(1);
        let client = InterceptorClient::new(sender, Duration::from_secs(300));

        let result = client.cached_documents().await;
        assert!(matches!(result, Err(InterceptorError::Timeout(d)) if d == Duration::from_secs(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_download_is_cancelled() {
        let (sender, mut receiver) = mpsc::channel(4);
        let client = InterceptorClient::new(sender, Duration::from_secs(300));

        let result = client
            .download_documents(
                vec!["https://charts.example/assets/Cifra/Hino%201.pdf".to_string()],
                10,
                |_| {},
            )
            .await;
        assert!(matches!(result, Err(InterceptorError::Timeout(_))));

        let download = receiver.recv().await.unwrap();
        assert!(matches!(download.request, WorkerRequest::DownloadPdfs { .. }));
        let cancel = receiver.recv().await.unwrap();
        assert!(matches!(cancel.request, WorkerRequest::CancelDownload));
    }

    #[tokio::test]
    async fn test_stopped_worker_is_unavailable() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let client = InterceptorClient::new(sender, Duration::from_secs(1));

        assert!(matches!(
            client.clear_cache().await,
            Err(InterceptorError::WorkerUnavailable)
        ));
    }
}
