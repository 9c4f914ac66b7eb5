//! # Offline Service
//!
//! Host-facing facade over the catalog, the sync coordinator and the
//! background interceptor. It keeps the loaded catalog in memory, persists the
//! category selection, and runs the change detector on start.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let service = OfflineService::new(config).await?;
//! service.initialize().await?;
//!
//! service.load_documents().await?;
//! let report = service
//!     .download_by_categories(&["Cifra".to_string()])
//!     .await?;
//!
//! let mut state = service.subscribe();
//! while state.changed().await.is_ok() {
//!     println!("{}%", state.borrow().progress);
//! }
//! ```

use bridge_traits::SystemClock;
use core_async::sync::{watch, CancellationToken, RwLock};
use core_async::task::JoinHandle;
use core_interceptor::{spawn_worker, BatchOutcome, Interceptor, InterceptorClient};
use core_library::{
    canonical_url, documents_in_categories, fingerprint, has_changed, resolve_canonical_path,
    Catalog, DocumentRecord,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus};
use core_sync::{
    Bookkeeping, CacheIndex, SyncCoordinator, SyncError, SyncPhase, SyncReport, SyncState,
    SyncStateHandle, CANCELLED_MESSAGE,
};
use futures::stream::{BoxStream, Stream};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

/// Outcome of [`OfflineService::check_for_new_documents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCheck {
    OfflineDisabled,
    NoCategoriesSelected,
    /// The catalog has not been loaded yet
    CatalogEmpty,
    /// No fingerprint was stored; the current one was recorded
    FirstRun,
    Unchanged,
    /// The catalog changed; `missing` documents of the selected categories
    /// were not cached
    Updated {
        missing: usize,
        outcome: Option<BatchOutcome>,
    },
    /// The catalog changed while a download session was running; the stored
    /// fingerprint is left alone so a later check fetches the `missing`
    /// documents
    Deferred { missing: usize },
}

pub struct OfflineService {
    config: CoreConfig,
    catalog: Arc<Catalog>,
    interceptor: Arc<Interceptor>,
    client: InterceptorClient,
    coordinator: Arc<SyncCoordinator>,
    bookkeeping: Arc<Bookkeeping>,
    state: SyncStateHandle,
    events: EventBus,
    documents: RwLock<Vec<DocumentRecord>>,
    cached: RwLock<Vec<String>>,
    _worker: JoinHandle<()>,
}

impl OfflineService {
    /// Wires every component and starts the interceptor worker.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or has no `HttpClient`.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let catalog = Arc::new(Catalog::from_config(&config)?.with_event_bus(events.clone()));
        let interceptor =
            Arc::new(Interceptor::from_config(&config)?.with_event_bus(events.clone()));
        let (client, worker) = spawn_worker(Arc::clone(&interceptor), config.message_timeout);

        let bookkeeping = Arc::new(Bookkeeping::new(
            Arc::clone(&config.settings_store),
            Arc::new(SystemClock),
        ));
        let state = SyncStateHandle::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            Arc::clone(&catalog),
            Arc::clone(&bookkeeping),
            state.clone(),
            events.clone(),
        )?);

        info!(origin = %config.origin, "Offline service ready");

        Ok(Self {
            config,
            catalog,
            interceptor,
            client,
            coordinator,
            bookkeeping,
            state,
            events,
            documents: RwLock::new(Vec::new()),
            cached: RwLock::new(Vec::new()),
            _worker: worker,
        })
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn progress_stream(&self) -> impl Stream<Item = SyncState> + Send + 'static {
        self.state.progress_stream()
    }

    pub fn events(&self) -> BoxStream<'static, CoreEvent> {
        self.events.stream()
    }

    /// Precaches the app shell, removes stale caches and restores persisted
    /// state. When offline mode is on it also refreshes the cached list and
    /// looks for catalog changes.
    ///
    /// Failures after the state is restored are logged, not returned.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let precached = self.interceptor.install().await;
        debug!(precached, "App shell precached");
        if let Err(e) = self.interceptor.activate().await {
            warn!(error = %e, "Failed to remove stale caches");
        }

        let enabled = self.bookkeeping.offline_enabled().await?;
        let selected = self.bookkeeping.selected_categories().await?;
        let downloaded = self.bookkeeping.downloaded_categories().await?;
        self.state.update(|state| {
            state.enabled = enabled;
            state.selected_categories = selected;
            state.downloaded_categories = downloaded;
        });

        if !enabled {
            debug!("Offline mode disabled");
            return Ok(());
        }

        if let Err(e) = self.refresh_cached_documents().await {
            warn!(error = %e, "Failed to list cached documents");
        }
        if self.documents.read().await.is_empty() {
            if let Err(e) = self.load_documents().await {
                warn!(error = %e, "Catalog unavailable during start");
                return Ok(());
            }
        }
        match self.check_for_new_documents().await {
            Ok(check) => debug!(?check, "Change check finished"),
            Err(e) => warn!(error = %e, "Change check failed"),
        }
        Ok(())
    }

    /// Loads the catalog (network, then cached copy) and keeps it in memory.
    pub async fn load_documents(&self) -> Result<Vec<DocumentRecord>> {
        let documents = self.catalog.load_documents().await?;
        *self.documents.write().await = documents.clone();
        Ok(documents)
    }

    pub async fn documents(&self) -> Vec<DocumentRecord> {
        self.documents.read().await.clone()
    }

    /// Downloads the selected categories for offline use.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoCategoriesSelected`] for an empty selection
    /// - [`SyncError::NoDocuments`] when the catalog has nothing in the selection
    /// - Catalog and session failures; the message is also in
    ///   [`SyncState::error`]
    #[instrument(skip(self), fields(categories = ?categories))]
    pub async fn download_by_categories(&self, categories: &[String]) -> Result<SyncReport> {
        let selected: Vec<String> = categories
            .iter()
            .map(|category| category.trim())
            .filter(|category| !category.is_empty())
            .map(String::from)
            .collect();
        if selected.is_empty() {
            let error = SyncError::NoCategoriesSelected;
            self.state.update(|state| state.error = Some(error.to_string()));
            return Err(error.into());
        }

        let documents = self.ensure_documents().await?;
        self.bookkeeping.set_selected_categories(&selected).await?;

        if documents_in_categories(&documents, &selected).is_empty() {
            let error = SyncError::NoDocuments;
            self.state.update(|state| {
                state.selected_categories = selected.clone();
                state.downloading = false;
                state.progress = 0;
                state.completed = 0;
                state.failed = 0;
                state.total = 0;
                state.error = Some(error.to_string());
            });
            return Err(error.into());
        }

        let report = self.coordinator.start_sync(&documents, &selected).await?;
        if report.phase != SyncPhase::Cancelled {
            if let Err(e) = self.refresh_cached_documents().await {
                warn!(error = %e, "Failed to refresh cached documents");
            }
        }
        Ok(report)
    }

    /// Cancels the running category session or new-document download.
    /// Returns `false` when nothing was running.
    pub async fn cancel_download(&self) -> Result<bool> {
        Ok(self.coordinator.cancel().await)
    }

    /// Deletes every cached document and app shell entry, forgets the
    /// bookkeeping, and resets the state.
    #[instrument(skip(self))]
    pub async fn clear_all_cache(&self) -> Result<()> {
        self.cancel_download().await?;
        self.client.clear_cache().await?;
        self.bookkeeping.clear().await?;
        self.cached.write().await.clear();
        self.state.update(|state| *state = SyncState::default());
        info!("Offline data cleared");
        Ok(())
    }

    pub async fn enable_offline(&self) -> Result<()> {
        self.bookkeeping.set_offline_enabled(true).await?;
        self.state.update(|state| state.enabled = true);
        Ok(())
    }

    pub async fn disable_offline(&self) -> Result<()> {
        self.clear_all_cache().await
    }

    pub fn clear_error(&self) {
        self.state.update(|state| state.error = None);
    }

    /// Last known list of stored document URLs.
    pub async fn cached_documents(&self) -> Vec<String> {
        self.cached.read().await.clone()
    }

    /// Asks the interceptor for the stored document URLs.
    pub async fn refresh_cached_documents(&self) -> Result<Vec<String>> {
        let urls = self.client.cached_documents().await?;
        debug!(count = urls.len(), "Cached documents");
        *self.cached.write().await = urls.clone();
        Ok(urls)
    }

    pub async fn selected_categories(&self) -> Result<Vec<String>> {
        Ok(self.bookkeeping.selected_categories().await?)
    }

    /// Fetches documents added to the selected categories since the last
    /// recorded fingerprint, one by one through the interceptor.
    ///
    /// The download runs as an exclusive session: a category download started
    /// meanwhile cancels it, and it is deferred while one is running. The new
    /// fingerprint is stored unless the download is cancelled or deferred.
    #[instrument(skip(self))]
    pub async fn check_for_new_documents(&self) -> Result<ChangeCheck> {
        if !self.bookkeeping.offline_enabled().await? {
            return Ok(ChangeCheck::OfflineDisabled);
        }
        let selected = self.bookkeeping.selected_categories().await?;
        if selected.is_empty() {
            info!("No categories selected for automatic download");
            return Ok(ChangeCheck::NoCategoriesSelected);
        }
        let documents = self.documents.read().await.clone();
        if documents.is_empty() {
            return Ok(ChangeCheck::CatalogEmpty);
        }

        let current = fingerprint(&documents);
        let previous = self.bookkeeping.fingerprint().await?;
        if !has_changed(previous.as_ref(), &current) {
            self.bookkeeping.set_fingerprint(&current).await?;
            let first_run = previous.as_ref().map_or(true, |p| p.is_empty());
            return Ok(if first_run {
                ChangeCheck::FirstRun
            } else {
                ChangeCheck::Unchanged
            });
        }

        info!(previous = ?previous, current = %current, "Catalog changed");
        self.events
            .emit(CoreEvent::Catalog(CatalogEvent::ChangeDetected {
                previous: previous.map(|p| p.as_str().to_string()).unwrap_or_default(),
                current: current.as_str().to_string(),
            }))
            .ok();

        let cached = self.refresh_cached_documents().await?;
        let urls = self.missing_documents(&documents, &selected, &cached);
        if urls.is_empty() {
            self.bookkeeping.set_fingerprint(&current).await?;
            return Ok(ChangeCheck::Updated {
                missing: 0,
                outcome: None,
            });
        }

        let missing = urls.len();
        info!(missing, categories = ?selected, "Downloading new documents");
        let Some(outcome) = self.download_delta(urls).await? else {
            info!(missing, "Download session running, new documents deferred");
            return Ok(ChangeCheck::Deferred { missing });
        };
        if !outcome.cancelled {
            self.bookkeeping.set_fingerprint(&current).await?;
            if let Err(e) = self.refresh_cached_documents().await {
                warn!(error = %e, "Failed to refresh cached documents");
            }
        }
        Ok(ChangeCheck::Updated {
            missing,
            outcome: Some(outcome),
        })
    }

    async fn ensure_documents(&self) -> Result<Vec<DocumentRecord>> {
        {
            let documents = self.documents.read().await;
            if !documents.is_empty() {
                return Ok(documents.clone());
            }
        }
        self.load_documents().await
    }

    /// Cache URLs of documents in `categories` that are not stored yet.
    fn missing_documents(
        &self,
        documents: &[DocumentRecord],
        categories: &[String],
        cached: &[String],
    ) -> Vec<String> {
        let index = CacheIndex::from_keys(cached);
        documents_in_categories(documents, categories)
            .into_iter()
            .filter_map(|document| match resolve_canonical_path(document.id.as_str()) {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!(error = %e, "Skipping document with invalid locator");
                    None
                }
            })
            .filter(|path| !index.contains(path))
            .filter_map(|path| canonical_url(&self.config.origin, &path).ok())
            .map(String::from)
            .collect()
    }

    /// Downloads `urls` as an exclusive coordinator session. Returns `None`
    /// when a category session is already running.
    async fn download_delta(&self, urls: Vec<String>) -> Result<Option<BatchOutcome>> {
        self.coordinator
            .run_exclusive(|session_id, token| self.run_delta(session_id, token, urls))
            .await
            .transpose()
    }

    #[instrument(skip(self, token, urls), fields(documents = urls.len()))]
    async fn run_delta(
        &self,
        session_id: String,
        token: CancellationToken,
        urls: Vec<String>,
    ) -> Result<BatchOutcome> {
        let total = urls.len() as u64;
        self.state.update(|state| {
            state.phase = SyncPhase::Fetching;
            state.downloading = true;
            state.progress = 0;
            state.completed = 0;
            state.failed = 0;
            state.total = total;
            state.error = None;
            state.session_id = Some(session_id);
        });

        let progress_state = self.state.clone();
        let download =
            self.client
                .download_documents(urls, self.interceptor.batch_size(), |progress| {
                    progress_state.update(|state| {
                        state.progress = progress.percentage.min(99);
                        state.completed = progress.completed;
                        state.failed = progress.failed;
                    });
                });
        let mut download = std::pin::pin!(download);
        let result = core_async::select! {
            result = &mut download => result,
            _ = token.cancelled() => {
                info!("Cancelling new document download");
                if let Err(e) = self.client.cancel_download().await {
                    warn!(error = %e, "Background worker did not confirm the cancellation");
                }
                download.await
            }
        };

        match result {
            Ok(outcome) => {
                let progress = outcome.progress;
                self.state.update(|state| {
                    state.downloading = false;
                    state.completed = progress.completed;
                    state.failed = progress.failed;
                    if outcome.cancelled {
                        state.phase = SyncPhase::Cancelled;
                        state.error = Some(CANCELLED_MESSAGE.to_string());
                    } else {
                        state.phase = if progress.failed > 0 {
                            SyncPhase::PartiallyFailed
                        } else {
                            SyncPhase::Completed
                        };
                        state.progress = 100;
                    }
                });
                info!(
                    completed = progress.completed,
                    failed = progress.failed,
                    cancelled = outcome.cancelled,
                    "New documents downloaded"
                );
                Ok(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                self.state.update(|state| {
                    state.downloading = false;
                    state.phase = SyncPhase::Error;
                    state.error = Some(message);
                });
                Err(e.into())
            }
        }
    }
}
