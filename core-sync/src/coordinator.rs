//! # Sync Coordinator
//!
//! Runs offline download sessions for document categories.
//!
//! ## Workflow
//!
//! 1. Cancel the previous session, if any, and wait for it to wind down
//! 2. Plan: find the documents of the requested categories that are not yet
//!    in the document cache; fully cached categories are recorded as
//!    downloaded without any network activity
//! 3. Resolve the package parts of every remaining category; a missing
//!    package index fails the session before anything is fetched
//! 4. For each remaining category, fetch its package parts (bypassing HTTP
//!    caches), inflate the pending PDFs one at a time and store each under
//!    its canonical URL
//! 5. Verify against the cache, count what is still missing, and persist
//!    bookkeeping unless the session was cancelled
//!
//! Progress is published through the [`SyncStateHandle`] and as
//! [`SyncEvent`]s on the [`EventBus`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let report = coordinator.start_sync(&documents, &["Cifra".to_string()]).await?;
//! println!("{} of {} stored", report.completed, report.total);
//!
//! // From another task
//! coordinator.cancel().await;
//! ```

use bridge_traits::error::BridgeError;
use bridge_traits::{CacheEntry, CacheMode, CacheStore, HttpClient, HttpRequest};
use bytes::Bytes;
use core_async::sync::{CancellationToken, Mutex};
use core_library::{fingerprint, CanonicalPath, Catalog, DocumentRecord};
use core_runtime::config::{CacheNamespaces, CoreConfig};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::logging::redact_url;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::archive::PackageArchive;
use crate::bookkeeping::Bookkeeping;
use crate::error::{Result, SyncError};
use crate::planner::{self, CacheIndex, CategoryPlan};
use crate::state::{progress_percent, SyncPhase, SyncState, SyncStateHandle};

/// Message shown when a session is cancelled.
pub const CANCELLED_MESSAGE: &str = "Download cancelled";

/// Outcome of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub session_id: String,
    pub phase: SyncPhase,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    /// Categories fully stored by this session
    pub completed_categories: Vec<String>,
    /// Every category recorded as downloaded after this session
    pub downloaded_categories: Vec<String>,
    pub error: Option<String>,
}

impl SyncReport {
    fn cancelled(session_id: &str, completed: u64, total: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: SyncPhase::Cancelled,
            completed,
            failed: 0,
            total,
            completed_categories: Vec::new(),
            downloaded_categories: Vec::new(),
            error: Some(CANCELLED_MESSAGE.to_string()),
        }
    }
}

/// `"{n} documents were not found in the selected packages."`
pub fn missing_documents_message(failed: u64) -> String {
    if failed == 1 {
        "1 document was not found in the selected packages.".to_string()
    } else {
        format!("{} documents were not found in the selected packages.", failed)
    }
}

#[derive(Clone)]
struct ActiveSession {
    id: String,
    token: CancellationToken,
}

impl ActiveSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token: CancellationToken::new(),
        }
    }
}

struct SessionSummary {
    completed: u64,
    failed: u64,
    total: u64,
    completed_categories: Vec<String>,
    downloaded_categories: Vec<String>,
}

fn ensure_active(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

pub struct SyncCoordinator {
    catalog: Arc<Catalog>,
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn CacheStore>,
    namespaces: CacheNamespaces,
    bookkeeping: Arc<Bookkeeping>,
    state: SyncStateHandle,
    events: EventBus,

    /// Held for the whole duration of a session
    session_lock: Mutex<()>,

    /// Most recently requested session
    active: Mutex<Option<ActiveSession>>,
}

impl SyncCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Fails when the configuration has no `HttpClient`.
    pub fn new(
        config: &CoreConfig,
        catalog: Arc<Catalog>,
        bookkeeping: Arc<Bookkeeping>,
        state: SyncStateHandle,
        events: EventBus,
    ) -> Result<Self> {
        let http = config
            .http_client
            .clone()
            .ok_or_else(|| core_runtime::Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "An HttpClient is required to download offline packages.".to_string(),
            })?;

        Ok(Self {
            catalog,
            http,
            cache: Arc::clone(&config.cache_store),
            namespaces: config.namespaces.clone(),
            bookkeeping,
            state,
            events,
            session_lock: Mutex::new(()),
            active: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &SyncStateHandle {
        &self.state
    }

    /// Whether a session is currently registered.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Downloads every document of `categories` that is not cached yet.
    ///
    /// `documents` is the loaded catalog. A session already running is
    /// cancelled first. Cancellation is not an error: the report comes back
    /// with [`SyncPhase::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoCategoriesSelected`] for an empty selection
    /// - [`SyncError::ManifestUnavailable`] when a category has neither an
    ///   index entry nor a fallback package and the index cannot be loaded
    /// - The first category's package could not be fetched or extracted
    /// - The document cache could not be read
    #[instrument(skip(self, documents), fields(categories = ?categories))]
    pub async fn start_sync(
        &self,
        documents: &[DocumentRecord],
        categories: &[String],
    ) -> Result<SyncReport> {
        let categories: Vec<String> = categories
            .iter()
            .map(|category| category.trim())
            .filter(|category| !category.is_empty())
            .map(String::from)
            .collect();
        if categories.is_empty() {
            return Err(SyncError::NoCategoriesSelected);
        }

        let session = ActiveSession::new();
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.replace(session.clone()) {
                info!(session_id = %previous.id, "Cancelling previous session");
                previous.token.cancel();
            }
        }

        let _guard = self.session_lock.lock().await;

        if session.token.is_cancelled() {
            debug!(session_id = %session.id, "Session superseded before it started");
            return Ok(SyncReport::cancelled(&session.id, 0, 0));
        }

        self.state.update(|state| {
            state.phase = SyncPhase::Planning;
            state.downloading = true;
            state.progress = 0;
            state.completed = 0;
            state.failed = 0;
            state.total = 0;
            state.selected_categories = categories.clone();
            state.error = None;
            state.session_id = Some(session.id.clone());
        });
        info!(session_id = %session.id, "Starting offline download");

        let outcome = self.run_session(&session, documents, &categories).await;
        self.release(&session).await;

        self.finish(&session.id, outcome)
    }

    /// Runs `work` as the active session unless another one is registered.
    ///
    /// `work` receives the session id and a token that [`cancel`](Self::cancel)
    /// or a later [`start_sync`](Self::start_sync) cancels. Returns `None`
    /// without running `work` when a session is already registered or the
    /// slot is taken over before `work` starts.
    pub async fn run_exclusive<F, Fut, T>(&self, work: F) -> Option<T>
    where
        F: FnOnce(String, CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = {
            let mut active = self.active.lock().await;
            if let Some(running) = active.as_ref() {
                debug!(session_id = %running.id, "Session running, not starting exclusive work");
                return None;
            }
            let session = ActiveSession::new();
            *active = Some(session.clone());
            session
        };

        let guard = self.session_lock.lock().await;
        let output = if session.token.is_cancelled() {
            debug!(session_id = %session.id, "Exclusive work superseded before it started");
            None
        } else {
            Some(work(session.id.clone(), session.token.clone()).await)
        };
        self.release(&session).await;
        drop(guard);
        output
    }

    async fn release(&self, session: &ActiveSession) {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|a| a.id == session.id).unwrap_or(false) {
            *active = None;
        }
    }

    /// Cancels the running session. Returns `false` when nothing is running.
    pub async fn cancel(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(session) => {
                info!(session_id = %session.id, "Cancelling offline download");
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_session(
        &self,
        session: &ActiveSession,
        documents: &[DocumentRecord],
        categories: &[String],
    ) -> Result<SessionSummary> {
        let token = &session.token;

        // Planning
        let keys = self.cache.keys(&self.namespaces.documents).await?;
        let index = CacheIndex::from_keys(&keys);
        let plan = planner::plan(documents, categories, &index, self.catalog.origin());
        let current_fingerprint = (!documents.is_empty()).then(|| fingerprint(documents));
        ensure_active(token)?;

        if !plan.already_complete.is_empty() {
            let downloaded = self
                .bookkeeping
                .add_downloaded_categories(&plan.already_complete)
                .await?;
            self.state
                .update(|state| state.downloaded_categories = downloaded);
        }

        if plan.is_empty() {
            info!("Requested categories are already cached");
            let downloaded = self
                .bookkeeping
                .record_finished_session(current_fingerprint.as_ref(), &[])
                .await?;
            return Ok(SessionSummary {
                completed: 0,
                failed: 0,
                total: 0,
                completed_categories: Vec::new(),
                downloaded_categories: downloaded,
            });
        }

        // Resolve every package before the first fetch so a missing index
        // never leaves a partial download behind
        let mut work = Vec::with_capacity(plan.categories.len());
        for category in &plan.categories {
            let parts = self.catalog.package_parts(&category.category).await?;
            work.push((category, parts));
        }
        ensure_active(token)?;

        let total = plan.total();
        self.state.transition(SyncPhase::Fetching)?;
        self.state.update(|state| state.total = total);
        self.emit(SyncEvent::Started {
            session_id: session.id.clone(),
            categories: plan.categories.iter().map(|c| c.category.clone()).collect(),
            total,
        });
        info!(
            total,
            categories = plan.categories.len(),
            skipped = plan.invalid_locators,
            "Planned offline download"
        );

        let mut completed = 0u64;
        for (position, (category, parts)) in work.into_iter().enumerate() {
            ensure_active(token)?;
            match self
                .sync_category(session, category, parts, &mut completed, total)
                .await
            {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) if position == 0 || !e.is_category_scoped() => return Err(e),
                Err(e) => {
                    warn!(category = %category.category, error = %e, "Skipping rest of category");
                }
            }
        }
        ensure_active(token)?;

        // Verifying
        self.state.transition(SyncPhase::Verifying)?;
        let keys = self.cache.keys(&self.namespaces.documents).await?;
        let index = CacheIndex::from_keys(&keys);

        let mut failed = 0u64;
        let mut completed_categories = Vec::new();
        for category in &plan.categories {
            let missing = category
                .pending
                .keys()
                .filter(|path| !index.contains_exact(path))
                .count() as u64;
            if missing == 0 {
                completed_categories.push(category.category.clone());
            } else {
                debug!(category = %category.category, missing, "Category incomplete");
            }
            failed += missing;
        }
        ensure_active(token)?;

        let downloaded = self
            .bookkeeping
            .record_finished_session(current_fingerprint.as_ref(), &completed_categories)
            .await?;

        Ok(SessionSummary {
            completed,
            failed,
            total,
            completed_categories,
            downloaded_categories: downloaded,
        })
    }

    #[instrument(skip(self, session, plan, parts, completed, total), fields(category = %plan.category))]
    async fn sync_category(
        &self,
        session: &ActiveSession,
        plan: &CategoryPlan,
        parts: Vec<Url>,
        completed: &mut u64,
        total: u64,
    ) -> Result<()> {
        if parts.is_empty() {
            warn!("No package configured for category");
            return Ok(());
        }

        let mut remaining: HashSet<CanonicalPath> = plan.pending.keys().cloned().collect();
        for part in parts {
            ensure_active(&session.token)?;
            if remaining.is_empty() {
                debug!("Every pending document stored, skipping remaining parts");
                break;
            }

            self.state.transition(SyncPhase::Fetching)?;
            let body = match self.fetch_package(&plan.category, &part, &session.token).await {
                Ok(body) => body,
                Err(e) => return Err(self.part_failed(session, &plan.category, &part, e)),
            };

            self.state.transition(SyncPhase::Extracting)?;
            let result = self
                .extract_part(session, plan, &part, body, &mut remaining, completed, total)
                .await;
            self.evict_package(&part).await;
            result.map_err(|e| self.part_failed(session, &plan.category, &part, e))?;
        }
        Ok(())
    }

    async fn fetch_package(
        &self,
        category: &str,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<Bytes> {
        debug!(url = redact_url(url.as_str()), "Fetching package");
        let request = HttpRequest::get(url.as_str()).cache_mode(CacheMode::NoStore);
        let response = self
            .http
            .execute_cancellable(request, token)
            .await
            .map_err(|e| match e {
                BridgeError::Cancelled => SyncError::Cancelled,
                other => SyncError::PackageFetchFailed {
                    category: category.to_string(),
                    url: url.to_string(),
                    message: other.to_string(),
                },
            })?;

        if !response.is_success() {
            return Err(SyncError::PackageFetchFailed {
                category: category.to_string(),
                url: url.to_string(),
                message: format!("HTTP {}", response.status),
            });
        }
        ensure_active(token)?;
        Ok(response.body)
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_part(
        &self,
        session: &ActiveSession,
        plan: &CategoryPlan,
        url: &Url,
        body: Bytes,
        remaining: &mut HashSet<CanonicalPath>,
        completed: &mut u64,
        total: u64,
    ) -> Result<()> {
        let mut archive = PackageArchive::open(url.as_str(), body)?;
        let entries = archive.entries()?;
        debug!(url = redact_url(url.as_str()), entries = entries.len(), "Opened package");

        for entry in entries {
            ensure_active(&session.token)?;

            let Some(path) = entry.path.as_ref() else {
                continue;
            };
            if !path.is_pdf() || !remaining.contains(path) {
                continue;
            }
            let Some(document) = plan.pending.get(path) else {
                continue;
            };

            let data = archive.read(&entry)?;
            ensure_active(&session.token)?;

            match self
                .cache
                .put(
                    &self.namespaces.documents,
                    document.url.as_str(),
                    CacheEntry::pdf(data),
                )
                .await
            {
                Ok(()) => {
                    remaining.remove(path);
                    *completed += 1;
                    self.report_progress(&session.id, *completed, total);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to store document");
                }
            }

            core_async::task::yield_now().await;
        }
        Ok(())
    }

    fn report_progress(&self, session_id: &str, completed: u64, total: u64) {
        let percent = progress_percent(completed, total);
        self.state.update(|state| {
            state.completed = completed;
            state.progress = percent;
        });
        self.emit(SyncEvent::Progress {
            session_id: session_id.to_string(),
            completed,
            total,
            percent,
        });
    }

    /// Drops any copy of the package an HTTP layer may have cached.
    async fn evict_package(&self, url: &Url) {
        for namespace in self.namespaces.all() {
            if let Err(e) = self.cache.delete(namespace, url.as_str()).await {
                warn!(url = redact_url(url.as_str()), namespace, error = %e, "Failed to evict package response");
            }
        }
    }

    fn part_failed(
        &self,
        session: &ActiveSession,
        category: &str,
        url: &Url,
        error: SyncError,
    ) -> SyncError {
        if !matches!(error, SyncError::Cancelled) {
            warn!(url = redact_url(url.as_str()), error = %error, "Package failed");
            self.emit(SyncEvent::PackageFailed {
                session_id: session.id.clone(),
                category: category.to_string(),
                url: url.to_string(),
                message: error.to_string(),
            });
        }
        error
    }

    fn finish(&self, session_id: &str, outcome: Result<SessionSummary>) -> Result<SyncReport> {
        match outcome {
            Ok(summary) => {
                let final_completed = summary
                    .completed
                    .min(summary.total.saturating_sub(summary.failed));
                let (phase, progress, message) = if summary.failed > 0 {
                    let progress = (final_completed.saturating_mul(100) / summary.total) as u8;
                    (
                        SyncPhase::PartiallyFailed,
                        progress,
                        Some(missing_documents_message(summary.failed)),
                    )
                } else {
                    (SyncPhase::Completed, 100, None)
                };

                self.settle(phase, |state| {
                    state.enabled = true;
                    state.progress = progress;
                    state.completed = final_completed;
                    state.failed = summary.failed;
                    state.total = summary.total;
                    state.error = message.clone();
                    state.downloaded_categories = summary.downloaded_categories.clone();
                });
                self.emit(SyncEvent::Completed {
                    session_id: session_id.to_string(),
                    completed: final_completed,
                    failed: summary.failed,
                    total: summary.total,
                });
                info!(
                    session_id,
                    completed = final_completed,
                    failed = summary.failed,
                    total = summary.total,
                    "Offline download finished"
                );

                Ok(SyncReport {
                    session_id: session_id.to_string(),
                    phase,
                    completed: final_completed,
                    failed: summary.failed,
                    total: summary.total,
                    completed_categories: summary.completed_categories,
                    downloaded_categories: summary.downloaded_categories,
                    error: message,
                })
            }
            Err(SyncError::Cancelled) => {
                let snapshot = self.state.snapshot();
                self.settle(SyncPhase::Cancelled, |state| {
                    state.error = Some(CANCELLED_MESSAGE.to_string());
                });
                self.emit(SyncEvent::Cancelled {
                    session_id: session_id.to_string(),
                    completed: snapshot.completed,
                });
                info!(session_id, completed = snapshot.completed, "Offline download cancelled");
                Ok(SyncReport::cancelled(
                    session_id,
                    snapshot.completed,
                    snapshot.total,
                ))
            }
            Err(e) => {
                let message = e.to_string();
                self.settle(SyncPhase::Error, |state| {
                    state.error = Some(message.clone());
                });
                self.emit(SyncEvent::Failed {
                    session_id: session_id.to_string(),
                    message: message.clone(),
                });
                error!(session_id, error = %message, "Offline download failed");
                Err(e)
            }
        }
    }

    /// Writes a terminal phase together with the final counters.
    fn settle(&self, phase: SyncPhase, apply: impl FnOnce(&mut SyncState)) {
        self.state.update(|state| {
            if !state.phase.can_transition_to(phase) {
                warn!(from = %state.phase, to = %phase, "Unexpected terminal transition");
            }
            state.phase = phase;
            state.downloading = false;
            apply(state);
        });
    }

    fn emit(&self, event: SyncEvent) {
        self.events.emit(CoreEvent::Sync(event)).ok();
    }
}
