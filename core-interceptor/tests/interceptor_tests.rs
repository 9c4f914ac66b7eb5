//! Integration tests for request interception and the worker protocol

use async_trait::async_trait;
use bridge_desktop::{SqliteCacheStore, SqliteSettingsStore};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{CacheEntry, CacheStore, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_async::sync::{CancellationToken, Notify};
use core_interceptor::{
    spawn_worker, FetchRequest, Interceptor, InterceptorError, ResponseSource,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ORIGIN: &str = "https://charts.example";
const DOCUMENTS: &str = "plpc-v2-pdfs";
const APP: &str = "plpc-v2-app";

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Clone)]
enum Route {
    Ok(&'static str, Bytes),
    Status(u16),
    Gated(Bytes),
}

#[derive(Default)]
struct FixtureHttp {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
    offline: AtomicBool,
    hung: Notify,
    release: Notify,
}

impl FixtureHttp {
    fn serve(&self, url: &str, content_type: &'static str, body: &'static str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Ok(content_type, Bytes::from_static(body.as_bytes())),
        );
    }

    fn status(&self, url: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Status(status));
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for FixtureHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((request.method, request.url.clone()));
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("network unreachable".to_string()));
        }
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        match route {
            Some(Route::Ok(content_type, body)) => {
                Ok(HttpResponse::new(200, body).with_header("Content-Type", content_type))
            }
            Some(Route::Status(status)) => Ok(HttpResponse::new(status, Bytes::new())),
            Some(Route::Gated(body)) => {
                self.hung.notify_one();
                self.release.notified().await;
                Ok(HttpResponse::new(200, body).with_header("Content-Type", "application/pdf"))
            }
            None => Ok(HttpResponse::new(404, Bytes::new())),
        }
    }
}

struct Harness {
    interceptor: Arc<Interceptor>,
    http: Arc<FixtureHttp>,
    cache: Arc<SqliteCacheStore>,
    events: EventBus,
}

async fn harness() -> Harness {
    let http = Arc::new(FixtureHttp::default());
    let cache = Arc::new(SqliteCacheStore::in_memory().await.unwrap());
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let config = CoreConfig::builder()
        .origin(ORIGIN)
        .app_shell_routes(vec!["/".to_string(), "/leitor".to_string(), "/manifest.json".to_string()])
        .http_client(http.clone())
        .cache_store(cache.clone())
        .settings_store(settings)
        .build()
        .unwrap();
    let events = EventBus::new(256);
    let interceptor = Arc::new(
        Interceptor::from_config(&config)
            .unwrap()
            .with_event_bus(events.clone()),
    );
    Harness {
        interceptor,
        http,
        cache,
        events,
    }
}

fn doc_url(n: usize) -> String {
    format!("{}/assets/Cifra/doc-{}.pdf", ORIGIN, n)
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn test_document_is_cached_after_first_fetch() {
    let h = harness().await;
    let url = "https://charts.example/assets/Cifra/Hino%201.pdf";
    h.http.serve(url, "application/pdf", "%PDF-1.7 hino");
    let mut events = h.events.subscribe();

    let first = h.interceptor.handle_fetch(FetchRequest::get(url)).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert!(h.cache.contains(DOCUMENTS, url).await.unwrap());
    assert!(matches!(
        events.try_recv(),
        Ok(CoreEvent::Cache(CacheEvent::Stored { namespace, .. })) if namespace == DOCUMENTS
    ));

    let second = h.interceptor.handle_fetch(FetchRequest::get(url)).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body.as_ref(), b"%PDF-1.7 hino");
    assert_eq!(second.response.content_type(), Some("application/pdf"));
    assert_eq!(h.http.request_count(), 1);
}

#[tokio::test]
async fn test_document_stored_by_sync_is_served_offline() {
    let h = harness().await;
    h.cache
        .put(
            DOCUMENTS,
            "https://charts.example/assets/Cifra/A%C3%A7%C3%A3o.pdf",
            CacheEntry::pdf(Bytes::from_static(b"%PDF")),
        )
        .await
        .unwrap();
    h.http.go_offline();

    let response = h
        .interceptor
        .handle_fetch(FetchRequest::get(
            "https://charts.example/assets/Cifra/A%C3%A7%C3%A3o.pdf",
        ))
        .await
        .unwrap();
    assert!(response.from_cache());
    assert_eq!(h.http.request_count(), 0);
}

#[tokio::test]
async fn test_html_and_errors_are_not_stored() {
    let h = harness().await;
    h.http.serve(&doc_url(1), "text/html; charset=utf-8", "<!doctype html>");
    h.http.status(&doc_url(2), 404);

    let html = h.interceptor.handle_fetch(FetchRequest::get(doc_url(1))).await.unwrap();
    assert_eq!(html.response.status, 200);
    let missing = h.interceptor.handle_fetch(FetchRequest::get(doc_url(2))).await.unwrap();
    assert_eq!(missing.response.status, 404);

    assert!(h.cache.keys(DOCUMENTS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_uncached_document_offline_fails() {
    let h = harness().await;
    h.http.go_offline();

    let result = h.interceptor.handle_fetch(FetchRequest::get(doc_url(1))).await;
    assert!(matches!(result, Err(InterceptorError::Unavailable { .. })));
}

// ============================================================================
// Navigation and app resources
// ============================================================================

#[tokio::test]
async fn test_navigation_falls_back_to_cached_route_then_shell() {
    let h = harness().await;
    h.http.serve("https://charts.example/", "text/html", "<html>shell</html>");
    h.http.serve("https://charts.example/leitor", "text/html", "<html>leitor</html>");

    assert_eq!(h.interceptor.install().await, 2);

    let online = h
        .interceptor
        .handle_fetch(FetchRequest::navigate("https://charts.example/leitor"))
        .await
        .unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    h.http.go_offline();
    let cached = h
        .interceptor
        .handle_fetch(FetchRequest::navigate("https://charts.example/leitor"))
        .await
        .unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.response.body.as_ref(), b"<html>leitor</html>");

    let shell = h
        .interceptor
        .handle_fetch(FetchRequest::navigate("https://charts.example/repertorio/42"))
        .await
        .unwrap();
    assert_eq!(shell.source, ResponseSource::ShellFallback);
    assert_eq!(shell.response.body.as_ref(), b"<html>shell</html>");
    assert!(shell.response.is_html());
}

#[tokio::test]
async fn test_navigation_without_shell_fails_offline() {
    let h = harness().await;
    h.http.go_offline();

    let result = h
        .interceptor
        .handle_fetch(FetchRequest::navigate("https://charts.example/leitor"))
        .await;
    assert!(matches!(result, Err(InterceptorError::Unavailable { .. })));
}

#[tokio::test]
async fn test_app_resources_are_cache_first() {
    let h = harness().await;
    let script = "https://charts.example/_app/immutable/start.js";
    h.http.serve(script, "text/javascript", "console.log(1)");

    h.interceptor.handle_fetch(FetchRequest::get(script)).await.unwrap();
    let again = h.interceptor.handle_fetch(FetchRequest::get(script)).await.unwrap();

    assert_eq!(again.source, ResponseSource::Cache);
    assert!(h.cache.contains(APP, script).await.unwrap());
    assert_eq!(h.http.request_count(), 1);
}

#[tokio::test]
async fn test_other_requests_pass_through() {
    let h = harness().await;
    let upload = "https://charts.example/api/upload-louvor";
    h.http.serve(upload, "application/json", "{}");
    let cdn = "https://cdn.example/assets/Cifra/a.pdf";
    h.http.serve(cdn, "application/pdf", "%PDF");

    let posted = h
        .interceptor
        .handle_fetch(FetchRequest::new(HttpMethod::Post, upload))
        .await
        .unwrap();
    let remote = h.interceptor.handle_fetch(FetchRequest::get(cdn)).await.unwrap();
    h.interceptor.handle_fetch(FetchRequest::get(cdn)).await.unwrap();

    assert_eq!(posted.source, ResponseSource::Network);
    assert_eq!(remote.source, ResponseSource::Network);
    assert_eq!(h.http.request_count(), 3);
    assert!(h.cache.namespaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let h = harness().await;
    let result = h.interceptor.handle_fetch(FetchRequest::get("not a url")).await;
    assert!(matches!(result, Err(InterceptorError::InvalidUrl { .. })));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_activate_deletes_stale_namespaces() {
    let h = harness().await;
    for namespace in ["plpc-v1-app", "plpc-v1-pdfs", DOCUMENTS, "other-cache"] {
        h.cache
            .put(namespace, "https://charts.example/x", CacheEntry::pdf(Bytes::new()))
            .await
            .unwrap();
    }

    let mut deleted = h.interceptor.activate().await.unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["plpc-v1-app", "plpc-v1-pdfs"]);

    let mut remaining = h.cache.namespaces().await.unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["other-cache", DOCUMENTS]);
}

// ============================================================================
// Batch downloads
// ============================================================================

#[tokio::test]
async fn test_batch_download_counts_failures() {
    let h = harness().await;
    let urls: Vec<String> = (1..=25).map(doc_url).collect();
    for (n, url) in urls.iter().enumerate() {
        if n % 10 != 3 {
            h.http.serve(url, "application/pdf", "%PDF");
        }
    }

    let mut updates = Vec::new();
    let outcome = h
        .interceptor
        .download_batch(&urls, 10, &CancellationToken::new(), |p| updates.push(p))
        .await;

    assert!(!outcome.cancelled);
    assert_eq!(outcome.progress.completed, 22);
    assert_eq!(outcome.progress.failed, 3);
    assert_eq!(outcome.progress.total, 25);
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[0].processed(), 10);
    assert_eq!(h.cache.keys(DOCUMENTS).await.unwrap().len(), 22);
}

#[tokio::test]
async fn test_batch_download_stops_between_batches() {
    let h = harness().await;
    let urls: Vec<String> = (1..=30).map(doc_url).collect();
    for url in &urls {
        h.http.serve(url, "application/pdf", "%PDF");
    }

    let token = CancellationToken::new();
    let outcome = h
        .interceptor
        .download_batch(&urls, 10, &token, |_| token.cancel())
        .await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.progress.processed(), 10);
    assert_eq!(h.cache.keys(DOCUMENTS).await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_worker_protocol_round_trip() {
    let h = harness().await;
    let urls: Vec<String> = (1..=5).map(doc_url).collect();
    for url in &urls {
        h.http.serve(url, "application/pdf", "%PDF");
    }
    let (client, _worker) = spawn_worker(h.interceptor.clone(), Duration::from_secs(300));

    let mut percentages = Vec::new();
    let outcome = client
        .download_documents(urls.clone(), 2, |p| percentages.push(p.percentage))
        .await
        .unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.progress.completed, 5);
    assert_eq!(percentages, vec![40, 80, 100]);

    let mut cached = client.cached_documents().await.unwrap();
    cached.sort();
    let mut expected = urls.clone();
    expected.sort();
    assert_eq!(cached, expected);

    client.cancel_download().await.unwrap();
    client.clear_cache().await.unwrap();
    assert!(client.cached_documents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_cancels_running_download() {
    let h = harness().await;
    let urls: Vec<String> = (1..=3).map(doc_url).collect();
    h.http
        .routes
        .lock()
        .unwrap()
        .insert(urls[0].clone(), Route::Gated(Bytes::from_static(b"%PDF")));
    for url in &urls[1..] {
        h.http.serve(url, "application/pdf", "%PDF");
    }
    let (client, _worker) = spawn_worker(h.interceptor.clone(), Duration::from_secs(300));

    let downloader = client.clone();
    let download = tokio::spawn(async move {
        downloader.download_documents(urls, 1, |_| {}).await
    });

    h.http.hung.notified().await;
    client.cancel_download().await.unwrap();
    h.http.release.notify_one();

    let outcome = download.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.progress.completed, 1);
    assert_eq!(outcome.progress.total, 3);
}
