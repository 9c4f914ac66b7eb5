//! Integration tests for offline download sessions
//!
//! These tests run the coordinator against:
//! - A fixture HTTP client serving manifests and zip packages from memory
//! - In-memory SQLite cache and settings stores
//!
//! and verify accounting, idempotence, failure propagation and cancellation.

use async_trait::async_trait;
use bridge_desktop::{SqliteCacheStore, SqliteSettingsStore};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{CacheStore, HttpClient, HttpRequest, HttpResponse, SettingsStore, SystemClock};
use bytes::Bytes;
use core_async::sync::Notify;
use core_library::{encode_document_id, Catalog, DocumentRecord};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::bookkeeping::{ALLOW_OFFLINE_KEY, MANIFEST_HASH_KEY};
use core_sync::{Bookkeeping, SyncCoordinator, SyncError, SyncPhase, SyncStateHandle};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

const ORIGIN: &str = "https://charts.example";
const DOCUMENTS: &str = "plpc-v2-pdfs";
const OFFLINE_MANIFEST: &str = "https://charts.example/offline-manifest.json";
const CIFRA_PACKAGE: &str = "https://charts.example/packages/Cifra.zip";
const PARTITURA_PACKAGE: &str = "https://charts.example/packages/Partitura.zip";

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Clone)]
enum Route {
    Body(Bytes),
    Status(u16),
    Fail,
    Hang,
}

#[derive(Default)]
struct FixtureHttp {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
    hung: Notify,
}

impl FixtureHttp {
    fn route(self, url: &str, route: Route) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), route);
        self
    }

    fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for FixtureHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.url.clone());
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        match route {
            Some(Route::Body(body)) => Ok(HttpResponse::new(200, body)),
            Some(Route::Status(status)) => Ok(HttpResponse::new(status, Bytes::new())),
            Some(Route::Fail) => Err(BridgeError::OperationFailed("connection reset".to_string())),
            Some(Route::Hang) => {
                self.hung.notify_one();
                futures::future::pending::<BridgeResult<HttpResponse>>().await
            }
            None => Ok(HttpResponse::new(404, Bytes::new())),
        }
    }
}

fn zip_of(names: &[String]) -> Bytes {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for name in names {
        writer.start_file(name.as_str(), options).unwrap();
        writer
            .write_all(format!("%PDF-1.4 {}", name).as_bytes())
            .unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

fn offline_manifest() -> Route {
    Route::Body(Bytes::from_static(
        br#"{"packages": {
            "Cifra": [{"url": "/packages/Cifra.zip", "filename": "Cifra.zip"}],
            "Partitura": [{"url": "/packages/Partitura.zip"}]
        }}"#,
    ))
}

fn documents(category: &str, count: usize) -> Vec<DocumentRecord> {
    (1..=count)
        .map(|n| {
            let path = format!("assets/{}/Hino {}.pdf", category, n);
            DocumentRecord::new(encode_document_id(&path).as_str(), category)
                .with_display_name(format!("Hino {}", n))
        })
        .collect()
}

fn entries(category: &str, numbers: impl IntoIterator<Item = usize>) -> Vec<String> {
    numbers
        .into_iter()
        .map(|n| format!("{}/Hino {}.pdf", category, n))
        .collect()
}

fn cache_key(category: &str, n: usize) -> String {
    format!("{}/assets/{}/Hino%20{}.pdf", ORIGIN, category, n)
}

struct Harness {
    coordinator: Arc<SyncCoordinator>,
    http: Arc<FixtureHttp>,
    cache: Arc<SqliteCacheStore>,
    settings: Arc<SqliteSettingsStore>,
    bookkeeping: Arc<Bookkeeping>,
    events: EventBus,
}

async fn harness(http: FixtureHttp) -> Harness {
    let http = Arc::new(http);
    let cache = Arc::new(SqliteCacheStore::in_memory().await.unwrap());
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let config = CoreConfig::builder()
        .origin(ORIGIN)
        .http_client(http.clone())
        .cache_store(cache.clone())
        .settings_store(settings.clone())
        .build()
        .unwrap();

    let events = EventBus::new(512);
    let catalog = Arc::new(Catalog::from_config(&config).unwrap());
    let bookkeeping = Arc::new(Bookkeeping::new(settings.clone(), Arc::new(SystemClock)));
    let coordinator = Arc::new(
        SyncCoordinator::new(
            &config,
            catalog,
            bookkeeping.clone(),
            SyncStateHandle::new(),
            events.clone(),
        )
        .unwrap(),
    );

    Harness {
        coordinator,
        http,
        cache,
        settings,
        bookkeeping,
        events,
    }
}

fn cifra() -> Vec<String> {
    vec!["Cifra".to_string()]
}

// ============================================================================
// Accounting
// ============================================================================

#[tokio::test]
async fn test_package_missing_one_of_three_documents() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", [1, 2]))));
    let h = harness(http).await;
    let docs = documents("Cifra", 3);

    let report = h.coordinator.start_sync(&docs, &cifra()).await.unwrap();

    assert_eq!(report.phase, SyncPhase::PartiallyFailed);
    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert!(report.error.as_deref().unwrap().contains('1'));
    assert!(report.completed_categories.is_empty());
    assert!(!report.downloaded_categories.contains(&"Cifra".to_string()));

    assert!(h.cache.contains(DOCUMENTS, &cache_key("Cifra", 1)).await.unwrap());
    assert!(h.cache.contains(DOCUMENTS, &cache_key("Cifra", 2)).await.unwrap());
    assert!(!h.cache.contains(DOCUMENTS, &cache_key("Cifra", 3)).await.unwrap());

    let stored = h.cache.get(DOCUMENTS, &cache_key("Cifra", 1)).await.unwrap().unwrap();
    assert_eq!(stored.content_type, "application/pdf");

    let state = h.coordinator.state().snapshot();
    assert_eq!(state.phase, SyncPhase::PartiallyFailed);
    assert!(!state.downloading);
    assert_eq!(state.progress, 66);
    assert!(h.bookkeeping.downloaded_categories().await.unwrap().is_empty());
    assert!(h.bookkeeping.offline_enabled().await.unwrap());
}

#[tokio::test]
async fn test_partial_failure_accounting() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=8))));
    let h = harness(http).await;
    let docs = documents("Cifra", 10);

    let report = h.coordinator.start_sync(&docs, &cifra()).await.unwrap();

    assert_eq!(report.completed, 8);
    assert_eq!(report.failed, 2);
    assert_eq!(report.completed + report.failed, report.total);
    assert_eq!(h.cache.keys(DOCUMENTS).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_unexpected_entries_are_ignored() {
    let mut names = entries("Cifra", [1, 2]);
    names.push("Cifra/readme.txt".to_string());
    names.push("Cifra/Not In Catalog.pdf".to_string());
    names.push("Cifra/".to_string());
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&names)));
    let h = harness(http).await;

    let report = h
        .coordinator
        .start_sync(&documents("Cifra", 2), &cifra())
        .await
        .unwrap();

    assert_eq!(report.phase, SyncPhase::Completed);
    assert_eq!(report.completed, 2);
    assert_eq!(h.cache.keys(DOCUMENTS).await.unwrap().len(), 2);
}

// ============================================================================
// Idempotence and bookkeeping
// ============================================================================

#[tokio::test]
async fn test_second_run_performs_no_network_activity() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=4))));
    let h = harness(http).await;
    let docs = documents("Cifra", 4);

    let first = h.coordinator.start_sync(&docs, &cifra()).await.unwrap();
    assert_eq!(first.phase, SyncPhase::Completed);
    assert_eq!(first.completed, 4);
    assert_eq!(first.completed_categories, cifra());
    assert_eq!(h.coordinator.state().snapshot().progress, 100);
    assert_eq!(h.http.requests_for(CIFRA_PACKAGE), 1);

    let requests_after_first = h.http.request_count();
    let second = h.coordinator.start_sync(&docs, &cifra()).await.unwrap();

    assert_eq!(second.phase, SyncPhase::Completed);
    assert_eq!(second.completed, 0);
    assert_eq!(second.total, 0);
    assert_eq!(h.http.request_count(), requests_after_first);
    assert_eq!(second.downloaded_categories, cifra());
}

#[tokio::test]
async fn test_namesake_in_other_classification_is_still_downloaded() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", [1]))));
    let h = harness(http).await;
    h.cache
        .put(
            DOCUMENTS,
            &cache_key("Partitura", 1),
            bridge_traits::CacheEntry::pdf(Bytes::from_static(b"%PDF-1.4 partitura")),
        )
        .await
        .unwrap();

    let report = h
        .coordinator
        .start_sync(&documents("Cifra", 1), &cifra())
        .await
        .unwrap();

    assert_eq!(report.phase, SyncPhase::Completed);
    assert_eq!(report.total, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(h.http.requests_for(CIFRA_PACKAGE), 1);
    assert!(h.cache.contains(DOCUMENTS, &cache_key("Cifra", 1)).await.unwrap());
    assert_eq!(h.bookkeeping.downloaded_categories().await.unwrap(), cifra());
}

#[tokio::test]
async fn test_completed_session_persists_bookkeeping() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=2))));
    let h = harness(http).await;
    let docs = documents("Cifra", 2);

    h.coordinator.start_sync(&docs, &cifra()).await.unwrap();

    assert_eq!(
        h.settings.get_bool(ALLOW_OFFLINE_KEY).await.unwrap(),
        Some(true)
    );
    assert_eq!(
        h.settings.get_string(MANIFEST_HASH_KEY).await.unwrap(),
        Some(core_library::fingerprint(&docs).as_str().to_string())
    );
    assert_eq!(h.bookkeeping.downloaded_categories().await.unwrap(), cifra());
    assert!(h.bookkeeping.last_sync_at().await.unwrap().is_some());
}

#[tokio::test]
async fn test_events_follow_session_lifecycle() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=3))));
    let h = harness(http).await;
    let mut receiver = h.events.subscribe();

    h.coordinator
        .start_sync(&documents("Cifra", 3), &cifra())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(CoreEvent::Sync(event)) = receiver.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(SyncEvent::Started { total: 3, .. })));
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![33, 66, 99]);
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Completed { completed: 3, failed: 0, total: 3, .. })
    ));
}

// ============================================================================
// Failure propagation
// ============================================================================

#[tokio::test]
async fn test_first_category_failure_fails_session() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Status(500));
    let h = harness(http).await;

    let result = h
        .coordinator
        .start_sync(&documents("Cifra", 2), &cifra())
        .await;

    assert!(matches!(result, Err(SyncError::PackageFetchFailed { .. })));
    let state = h.coordinator.state().snapshot();
    assert_eq!(state.phase, SyncPhase::Error);
    assert!(state.error.unwrap().contains("HTTP 500"));
    assert!(!h.bookkeeping.offline_enabled().await.unwrap());
}

#[tokio::test]
async fn test_later_category_failure_is_contained() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=2))))
        .route(PARTITURA_PACKAGE, Route::Fail);
    let h = harness(http).await;
    let mut docs = documents("Cifra", 2);
    docs.extend(documents("Partitura", 3));

    let report = h
        .coordinator
        .start_sync(&docs, &["Cifra".to_string(), "Partitura".to_string()])
        .await
        .unwrap();

    assert_eq!(report.phase, SyncPhase::PartiallyFailed);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 3);
    assert_eq!(report.completed_categories, cifra());
    assert_eq!(h.bookkeeping.downloaded_categories().await.unwrap(), cifra());
}

#[tokio::test]
async fn test_corrupt_package_is_extraction_failure() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(Bytes::from_static(b"<!doctype html>")));
    let h = harness(http).await;

    let result = h
        .coordinator
        .start_sync(&documents("Cifra", 1), &cifra())
        .await;
    assert!(matches!(result, Err(SyncError::ExtractionFailed { .. })));
}

#[tokio::test]
async fn test_manifest_unavailable_uses_fallback_package() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, Route::Fail)
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=2))));
    let h = harness(http).await;

    let report = h
        .coordinator
        .start_sync(&documents("Cifra", 2), &cifra())
        .await
        .unwrap();
    assert_eq!(report.phase, SyncPhase::Completed);
    assert_eq!(report.completed, 2);
}

#[tokio::test]
async fn test_manifest_unavailable_without_fallback_is_actionable() {
    let http = FixtureHttp::default().route(OFFLINE_MANIFEST, Route::Fail);
    let h = harness(http).await;
    let category = "Cifra nível I".to_string();

    let result = h
        .coordinator
        .start_sync(&documents(&category, 2), &[category.clone()])
        .await;

    assert!(matches!(result, Err(SyncError::ManifestUnavailable { .. })));
    let error = h.coordinator.state().snapshot().error.unwrap();
    assert!(error.starts_with("Could not load the offline package index"));
    assert!(h.cache.keys(DOCUMENTS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_index_for_later_category_stores_nothing() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, Route::Fail)
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=2))));
    let h = harness(http).await;
    let graded = "Cifra nível I".to_string();
    let mut docs = documents("Cifra", 2);
    docs.extend(documents(&graded, 2));

    let result = h
        .coordinator
        .start_sync(&docs, &["Cifra".to_string(), graded])
        .await;

    assert!(matches!(result, Err(SyncError::ManifestUnavailable { .. })));
    let state = h.coordinator.state().snapshot();
    assert_eq!(state.phase, SyncPhase::Error);
    assert!(!state.downloading);
    assert!(state
        .error
        .unwrap()
        .starts_with("Could not load the offline package index"));
    assert_eq!(h.http.requests_for(CIFRA_PACKAGE), 0);
    assert!(h.cache.keys(DOCUMENTS).await.unwrap().is_empty());
    assert!(h.bookkeeping.downloaded_categories().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let h = harness(FixtureHttp::default()).await;
    let result = h
        .coordinator
        .start_sync(&documents("Cifra", 1), &["  ".to_string()])
        .await;
    assert!(matches!(result, Err(SyncError::NoCategoriesSelected)));
    assert_eq!(h.http.request_count(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_during_fetch() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Hang);
    let h = harness(http).await;
    let docs = documents("Cifra", 3);

    let coordinator = h.coordinator.clone();
    let task = tokio::spawn(async move { coordinator.start_sync(&docs, &cifra()).await });

    h.http.hung.notified().await;
    assert!(h.coordinator.cancel().await);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.phase, SyncPhase::Cancelled);
    assert_eq!(report.completed, 0);

    let state = h.coordinator.state().snapshot();
    assert_eq!(state.error.as_deref(), Some("Download cancelled"));
    assert!(!state.downloading);
    assert!(!h.coordinator.is_active().await);
    assert!(h.settings.get_string(MANIFEST_HASH_KEY).await.unwrap().is_none());
    assert!(!h.coordinator.cancel().await);
}

#[tokio::test]
async fn test_cancel_mid_extraction_keeps_only_whole_entries() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=20))));
    let h = harness(http).await;
    let docs = documents("Cifra", 20);

    let mut state = h.coordinator.state().subscribe();
    let coordinator = h.coordinator.clone();
    let task = tokio::spawn(async move { coordinator.start_sync(&docs, &cifra()).await });

    loop {
        state.changed().await.unwrap();
        if state.borrow_and_update().completed >= 2 {
            break;
        }
    }
    assert!(h.coordinator.cancel().await);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.phase, SyncPhase::Cancelled);
    assert!(report.completed >= 2 && report.completed < 20);

    let keys = h.cache.keys(DOCUMENTS).await.unwrap();
    assert_eq!(keys.len() as u64, report.completed);
    for key in keys {
        let entry = h.cache.get(DOCUMENTS, &key).await.unwrap().unwrap();
        assert!(entry.body.starts_with(b"%PDF-1.4"));
    }

    assert!(h.bookkeeping.downloaded_categories().await.unwrap().is_empty());
    assert!(h.settings.get_bool(ALLOW_OFFLINE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_new_session_supersedes_running_one() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Hang)
        .route(
            PARTITURA_PACKAGE,
            Route::Body(zip_of(&entries("Partitura", 1..=2))),
        );
    let h = harness(http).await;
    let mut docs = documents("Cifra", 2);
    docs.extend(documents("Partitura", 2));

    let coordinator = h.coordinator.clone();
    let first_docs = docs.clone();
    let first = tokio::spawn(async move { coordinator.start_sync(&first_docs, &cifra()).await });
    h.http.hung.notified().await;

    let second = h
        .coordinator
        .start_sync(&docs, &["Partitura".to_string()])
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.phase, SyncPhase::Cancelled);
    assert_eq!(second.phase, SyncPhase::Completed);
    assert_eq!(second.completed, 2);
    assert_eq!(
        h.coordinator.state().snapshot().session_id,
        Some(second.session_id)
    );
}

#[tokio::test]
async fn test_new_session_cancels_exclusive_work() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Body(zip_of(&entries("Cifra", 1..=2))));
    let h = harness(http).await;
    let docs = documents("Cifra", 2);

    let started = Arc::new(Notify::new());
    let signal = started.clone();
    let coordinator = h.coordinator.clone();
    let work = tokio::spawn(async move {
        coordinator
            .run_exclusive(|_, token| async move {
                signal.notify_one();
                token.cancelled().await;
                "stopped"
            })
            .await
    });
    started.notified().await;
    assert!(h.coordinator.is_active().await);

    let report = h.coordinator.start_sync(&docs, &cifra()).await.unwrap();

    assert_eq!(work.await.unwrap(), Some("stopped"));
    assert_eq!(report.phase, SyncPhase::Completed);
    assert_eq!(report.completed, 2);
    assert!(!h.coordinator.is_active().await);
}

#[tokio::test]
async fn test_exclusive_work_yields_to_running_session() {
    let http = FixtureHttp::default()
        .route(OFFLINE_MANIFEST, offline_manifest())
        .route(CIFRA_PACKAGE, Route::Hang);
    let h = harness(http).await;
    let docs = documents("Cifra", 2);

    let coordinator = h.coordinator.clone();
    let task = tokio::spawn(async move { coordinator.start_sync(&docs, &cifra()).await });
    h.http.hung.notified().await;

    let ran = h.coordinator.run_exclusive(|_, _| async { true }).await;
    assert_eq!(ran, None);

    assert!(h.coordinator.cancel().await);
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.phase, SyncPhase::Cancelled);

    let ran = h.coordinator.run_exclusive(|_, _| async { true }).await;
    assert_eq!(ran, Some(true));
    assert!(!h.coordinator.is_active().await);
}

#[tokio::test]
async fn test_cancel_reaches_exclusive_work() {
    let h = harness(FixtureHttp::default()).await;

    let started = Arc::new(Notify::new());
    let signal = started.clone();
    let coordinator = h.coordinator.clone();
    let work = tokio::spawn(async move {
        coordinator
            .run_exclusive(|session_id, token| async move {
                signal.notify_one();
                token.cancelled().await;
                session_id
            })
            .await
    });
    started.notified().await;

    assert!(h.coordinator.cancel().await);
    let session_id = work.await.unwrap().unwrap();
    assert!(!session_id.is_empty());
    assert!(!h.coordinator.cancel().await);
}
