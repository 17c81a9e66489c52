//! Request handler tests — cache short-circuit, validation before work,
//! failure aggregation, timeouts and artifact handoff.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::CountingBackend;
use pretty_assertions::assert_eq;
use serde_json::json;
use tabscore::cache::CacheStore;
use tabscore::error::{CacheError, RenderError, StorageError};
use tabscore::storage::{ArtifactStore, MemoryArtifactStore};
use tabscore::{
    Artifact, Fingerprint, HandlerConfig, HandlerError, OutputFormat, RenderCache, RenderRequestHandler,
    RenderResponseEnvelope,
};

fn handler_with(backend: Arc<CountingBackend>, cache: Arc<RenderCache>) -> RenderRequestHandler {
    RenderRequestHandler::new(HandlerConfig::default()).with_backend(backend).with_cache(cache)
}

#[test]
fn second_identical_request_skips_rendering() {
    let backend = CountingBackend::new();
    let handler = handler_with(backend.clone(), Arc::new(RenderCache::default()));
    let raw = common::request(4, 4, json!({}));

    handler.handle(&raw).unwrap();
    assert_eq!(backend.calls(), 1);
    handler.handle(&raw).unwrap();
    assert_eq!(backend.calls(), 1);
}

#[test]
fn out_of_range_stave_width_is_rejected_before_layout() {
    let backend = CountingBackend::new();
    let cache = Arc::new(RenderCache::default());
    let handler = handler_with(backend.clone(), cache.clone());

    let err = handler.handle(&common::request(4, 4, json!({ "staveWidth": 5000 }))).unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.field(), Some("options.staveWidth"));
    assert_eq!(backend.calls(), 0);
    assert!(cache.is_empty());
}

#[test]
fn partial_failure_keeps_successful_formats() {
    let backend = CountingBackend::failing(&[OutputFormat::Raster]);
    let cache = Arc::new(RenderCache::default());
    let handler = handler_with(backend.clone(), cache.clone());

    let envelope = handler
        .handle(&common::request(2, 4, json!({ "outputFormats": ["svg", "png", "pdf"] })))
        .unwrap();
    assert!(envelope.is_partial());
    assert_eq!(
        envelope.artifacts.keys().copied().collect::<Vec<_>>(),
        vec![OutputFormat::Vector, OutputFormat::Document]
    );
    assert_eq!(
        envelope.metadata.failed_formats.get(&OutputFormat::Raster).map(String::as_str),
        Some("raster backend offline")
    );
    assert_eq!(backend.calls(), 3);
    assert_eq!(cache.len(), 1);
}

#[test]
fn total_failure_is_an_error_and_not_cached() {
    let backend = CountingBackend::failing(&OutputFormat::ALL);
    let cache = Arc::new(RenderCache::default());
    let handler = handler_with(backend, cache.clone());

    let err = handler
        .handle(&common::request(2, 4, json!({ "outputFormats": ["svg", "pdf"] })))
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    match err {
        HandlerError::Render(RenderError::AllFormatsFailed(failed)) => assert_eq!(failed.len(), 2),
        other => panic!("expected total failure, got {other:?}"),
    }
    assert!(cache.is_empty());
}

#[test]
fn timeout_cancels_and_never_caches() {
    let backend = CountingBackend::slow(Duration::from_millis(300));
    let cache = Arc::new(RenderCache::default());
    let handler = Arc::new(handler_with(backend, cache.clone()));
    let raw = common::request(2, 4, json!({}));

    let err = handler.handle_with_timeout(&raw, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, HandlerError::Timeout(_)));
    assert_eq!(err.status_code(), 504);

    thread::sleep(Duration::from_millis(600));
    assert!(cache.is_empty());
}

#[test]
fn timeout_path_caches_results_that_arrive_in_time() {
    let backend = CountingBackend::new();
    let cache = Arc::new(RenderCache::default());
    let handler = Arc::new(handler_with(backend.clone(), cache.clone()));
    let raw = common::request(2, 4, json!({}));

    handler.handle_with_timeout(&raw, Duration::from_secs(30)).unwrap();
    handler.handle_with_timeout(&raw, Duration::from_secs(30)).unwrap();
    assert_eq!(backend.calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn stored_artifacts_are_returned_by_url() {
    let store = Arc::new(MemoryArtifactStore::new());
    let handler = RenderRequestHandler::default().with_store(store.clone());
    let envelope = handler
        .handle(&common::request(2, 4, json!({ "outputFormats": ["svg", "pdf"] })))
        .unwrap();

    let pdf = envelope.artifact(OutputFormat::Document).unwrap();
    let url = pdf.url().unwrap();
    assert_eq!(url, format!("memory://{}.pdf", envelope.fingerprint));
    let (mime, bytes) = store.fetch(url).unwrap();
    assert_eq!(mime, "application/pdf");
    assert_eq!(bytes.len(), pdf.size());
    assert!(matches!(envelope.artifact(OutputFormat::Vector), Some(Artifact::Stored { .. })));
    assert_eq!(store.len(), 2);
}

#[test]
fn worker_panic_is_a_render_failure_not_a_timeout() {
    let cache = Arc::new(RenderCache::default());
    let handler = Arc::new(handler_with(CountingBackend::panicking(), cache.clone()));
    let err = handler
        .handle_with_timeout(&common::request(2, 4, json!({})), Duration::from_secs(30))
        .unwrap_err();
    assert!(matches!(err, HandlerError::Render(RenderError::WorkerLost)));
    assert_eq!(err.status_code(), 500);
    assert!(cache.is_empty());
}

/// Memory store that refuses files with the given extensions.
struct RefusingStore {
    inner: MemoryArtifactStore,
    refused: Vec<&'static str>,
}

impl RefusingStore {
    fn new(refused: &[&'static str]) -> Arc<Self> {
        Arc::new(Self { inner: MemoryArtifactStore::new(), refused: refused.to_vec() })
    }
}

impl ArtifactStore for RefusingStore {
    fn store(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<String, StorageError> {
        if self.refused.iter().any(|ext| filename.ends_with(ext)) {
            return Err(StorageError::Unavailable("bucket is read-only".into()));
        }
        self.inner.store(bytes, filename, mime)
    }
}

#[test]
fn storage_failure_fails_only_that_format() {
    let store = RefusingStore::new(&[".pdf"]);
    let handler = RenderRequestHandler::default().with_store(store.clone());
    let envelope = handler
        .handle(&common::request(2, 4, json!({ "outputFormats": ["svg", "pdf"] })))
        .unwrap();

    assert!(envelope.is_partial());
    assert!(envelope.artifact(OutputFormat::Vector).unwrap().url().is_some());
    assert!(envelope.artifact(OutputFormat::Document).is_none());
    let reason = &envelope.metadata.failed_formats[&OutputFormat::Document];
    assert!(reason.contains("bucket is read-only"), "{reason}");
    assert_eq!(store.inner.len(), 1);
}

#[test]
fn storage_failure_on_every_format_is_502() {
    let cache = Arc::new(RenderCache::default());
    let handler = handler_with(CountingBackend::new(), cache.clone()).with_store(RefusingStore::new(&[".svg", ".pdf"]));
    let err = handler
        .handle(&common::request(2, 4, json!({ "outputFormats": ["svg", "pdf"] })))
        .unwrap_err();
    assert!(matches!(err, HandlerError::Storage(_)));
    assert_eq!(err.status_code(), 502);
    assert!(cache.is_empty());
}

#[test]
fn unmapped_notes_are_reported_not_fatal() {
    let body = r#"{"noteData":{"measures":[{"index":0,"notes":[
        {"pitch":20,"duration":"quarter"},
        {"pitch":64,"duration":"quarter"},
        {"pitch":120,"duration":"half"}]}]}}"#;
    let envelope = RenderRequestHandler::default().handle_json(body).unwrap();
    let unmapped: Vec<(u32, u8)> = envelope
        .metadata
        .unmapped_notes
        .iter()
        .map(|n| (n.note_index, n.pitch))
        .collect();
    assert_eq!(unmapped, vec![(0, 20), (2, 120)]);
}

/// A cache whose backing store is unreachable.
struct OfflineCache;

impl CacheStore for OfflineCache {
    fn get(&self, _key: &Fingerprint) -> Result<Option<Arc<RenderResponseEnvelope>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn insert(
        &self,
        _key: Fingerprint,
        _value: Arc<RenderResponseEnvelope>,
    ) -> Result<Option<Fingerprint>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

#[test]
fn unavailable_cache_degrades_to_always_miss() {
    let backend = CountingBackend::new();
    let handler = RenderRequestHandler::default()
        .with_backend(backend.clone())
        .with_cache(Arc::new(OfflineCache));
    let raw = common::request(1, 4, json!({}));
    handler.handle(&raw).unwrap();
    handler.handle(&raw).unwrap();
    assert_eq!(backend.calls(), 2);
}
