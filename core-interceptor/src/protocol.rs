//! Worker message protocol
//!
//! Requests and responses exchanged with the background worker. Both sides are
//! plain serde types tagged by `"type"`, so a host can carry them as JSON
//! across a process boundary:
//!
//! ```json
//! {"type": "DOWNLOAD_PDFS", "pdfsToDownload": ["/assets/Cifra/a.pdf"], "batchSize": 10}
//! {"type": "PROGRESS", "completed": 10, "failed": 0, "total": 25, "percentage": 40}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{InterceptorError, Result};

/// Default number of documents fetched in parallel per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Fetch and store each URL, in parallel batches.
    DownloadPdfs {
        #[serde(rename = "pdfsToDownload")]
        pdfs_to_download: Vec<String>,
        #[serde(rename = "batchSize", default = "default_batch_size")]
        batch_size: usize,
    },
    /// Stop running downloads at the next batch boundary.
    CancelDownload,
    /// List stored document URLs.
    GetCachedPdfs,
    /// Delete the document and app shell namespaces.
    ClearCache,
}

impl WorkerRequest {
    pub fn download(urls: Vec<String>, batch_size: usize) -> Self {
        WorkerRequest::DownloadPdfs {
            pdfs_to_download: urls,
            batch_size,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| InterceptorError::InvalidRequest(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequest::DownloadPdfs { .. } => "DOWNLOAD_PDFS",
            WorkerRequest::CancelDownload => "CANCEL_DOWNLOAD",
            WorkerRequest::GetCachedPdfs => "GET_CACHED_PDFS",
            WorkerRequest::ClearCache => "CLEAR_CACHE",
        }
    }
}

/// Running totals of a batch download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    /// `round(completed / total * 100)`
    pub percentage: u8,
}

impl BatchProgress {
    pub fn new(completed: u64, failed: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u8
        };
        Self {
            completed,
            failed,
            total,
            percentage,
        }
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    /// Sent after every batch.
    Progress(BatchProgress),
    Complete(BatchProgress),
    Cancelled(BatchProgress),
    Error { error: String },
    CancelConfirmed,
    CachedPdfs { pdfs: Vec<String>, count: usize },
    CacheCleared,
}

impl WorkerResponse {
    /// Whether no further responses follow for the same request.
    pub fn is_final(&self) -> bool {
        !matches!(self, WorkerResponse::Progress(_))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"ERROR","error":"serialization failed"}"#.to_string())
    }
}
