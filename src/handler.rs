//! Request handling: validate, fingerprint, consult the cache, and render
//! on a miss.
//!
//! The handler is the only component that writes to the cache, and it
//! only ever inserts complete results. Validation failures, total render
//! failures, timeouts and cancelled renders never reach the cache.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Fingerprint, RenderCache, DEFAULT_CACHE_CAPACITY};
use crate::envelope::{Artifact, RenderMetadata, RenderResponseEnvelope};
use crate::error::{HandlerError, RenderError, Result};
use crate::layout;
use crate::model::Score;
use crate::options::RenderOptions;
use crate::render::{BuiltinBackend, CancelToken, DrawingBackend, RenderOrchestrator};
use crate::request::{validate, RawRequest};
use crate::storage::ArtifactStore;

/// Scores up to this many measures are rendered synchronously by the
/// route layer; longer ones are queued.
pub const DEFAULT_SYNC_MEASURE_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    pub cache_capacity: usize,
    pub sync_measure_limit: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sync_measure_limit: DEFAULT_SYNC_MEASURE_LIMIT,
        }
    }
}

/// A request that passed validation, with its cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub score: Score,
    pub options: RenderOptions,
    pub fingerprint: Fingerprint,
}

/// Result of the fast synchronous path.
#[derive(Debug, Clone)]
pub enum CacheCheck {
    Hit(Arc<RenderResponseEnvelope>),
    Miss(PreparedRequest),
}

pub struct RenderRequestHandler {
    config: HandlerConfig,
    cache: Arc<dyn CacheStore>,
    orchestrator: RenderOrchestrator,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl RenderRequestHandler {
    /// Handler with an in-process cache, the built-in backend and inline
    /// artifacts.
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            config,
            cache: Arc::new(RenderCache::new(config.cache_capacity)),
            orchestrator: RenderOrchestrator::new(Arc::new(BuiltinBackend)),
            store: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn DrawingBackend>) -> Self {
        self.orchestrator = RenderOrchestrator::new(backend);
        self
    }

    /// Hand artifacts to `store` and return URLs instead of bytes.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Validate and fingerprint. Nothing else runs if validation fails.
    pub fn prepare(&self, raw: &RawRequest) -> Result<PreparedRequest> {
        let (score, options) = validate(raw)?;
        let fingerprint = Fingerprint::compute(&score, &options)?;
        debug!(%fingerprint, measures = score.measure_count(), "request fingerprinted");
        Ok(PreparedRequest { score, options, fingerprint })
    }

    /// Cache lookup. An unreachable store counts as a miss.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<RenderResponseEnvelope>> {
        match self.cache.get(fingerprint) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%fingerprint, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Validate, fingerprint and look up, without rendering.
    pub fn check_cache(&self, raw: &RawRequest) -> Result<CacheCheck> {
        let prepared = self.prepare(raw)?;
        match self.lookup(&prepared.fingerprint) {
            Some(hit) => {
                debug!(fingerprint = %prepared.fingerprint, "cache hit");
                Ok(CacheCheck::Hit(hit))
            }
            None => {
                debug!(fingerprint = %prepared.fingerprint, "cache miss");
                Ok(CacheCheck::Miss(prepared))
            }
        }
    }

    pub fn handle(&self, raw: &RawRequest) -> Result<Arc<RenderResponseEnvelope>> {
        match self.check_cache(raw)? {
            CacheCheck::Hit(envelope) => Ok(envelope),
            CacheCheck::Miss(prepared) => self.render_prepared(&prepared, &CancelToken::new()),
        }
    }

    pub fn handle_json(&self, body: &str) -> Result<Arc<RenderResponseEnvelope>> {
        let raw = RawRequest::from_json(body)?;
        self.handle(&raw)
    }

    /// Render a prepared request and cache the result unless `cancel`
    /// fired first.
    pub fn render_prepared(
        &self,
        prepared: &PreparedRequest,
        cancel: &CancelToken,
    ) -> Result<Arc<RenderResponseEnvelope>> {
        let envelope = self.render_uncached(prepared, cancel)?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled.into());
        }
        self.remember(&prepared.fingerprint, &envelope);
        Ok(envelope)
    }

    /// Like [`handle`](Self::handle), but gives up after `timeout`.
    ///
    /// The render runs on its own thread. On timeout it is cancelled and
    /// its result, should it still arrive, is dropped without caching.
    pub fn handle_with_timeout(
        self: &Arc<Self>,
        raw: &RawRequest,
        timeout: Duration,
    ) -> Result<Arc<RenderResponseEnvelope>> {
        let prepared = match self.check_cache(raw)? {
            CacheCheck::Hit(envelope) => return Ok(envelope),
            CacheCheck::Miss(prepared) => prepared,
        };

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let worker = {
            let handler = Arc::clone(self);
            let cancel = cancel.clone();
            let prepared = prepared.clone();
            move || {
                let _ = tx.send(handler.render_uncached(&prepared, &cancel));
            }
        };
        thread::spawn(worker);

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                let envelope = result?;
                self.remember(&prepared.fingerprint, &envelope);
                Ok(envelope)
            }
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                warn!(fingerprint = %prepared.fingerprint, ?timeout, "render timed out");
                Err(HandlerError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(fingerprint = %prepared.fingerprint, "render worker died before replying");
                Err(RenderError::WorkerLost.into())
            }
        }
    }

    /// Layout, draw and package. Never touches the cache.
    fn render_uncached(
        &self,
        prepared: &PreparedRequest,
        cancel: &CancelToken,
    ) -> Result<Arc<RenderResponseEnvelope>> {
        let PreparedRequest { score, options, fingerprint } = prepared;
        let plan = layout::plan(score, options);
        debug!(
            %fingerprint,
            pages = plan.page_count(),
            measures_per_line = plan.measures_per_line,
            stave_width = plan.stave_width,
            "layout planned"
        );

        let outcome = self.orchestrator.render(&plan, score, options, cancel)?;

        // A format that cannot be stored fails on its own, like a draw failure.
        let mut failed = outcome.failed;
        let mut store_error = None;
        let mut artifacts = BTreeMap::new();
        for (format, bytes) in outcome.artifacts {
            let mime = format.mime_type().to_string();
            let artifact = match &self.store {
                Some(store) => {
                    let filename = format!("{fingerprint}.{}", format.extension());
                    match store.store(&bytes, &filename, &mime) {
                        Ok(url) => Artifact::Stored { mime, url, size: bytes.len() },
                        Err(e) => {
                            warn!(%fingerprint, %format, error = %e, "artifact store failed");
                            failed.insert(format, format!("storage failed: {e}"));
                            store_error = Some(e);
                            continue;
                        }
                    }
                }
                None => Artifact::Inline { mime, bytes },
            };
            artifacts.insert(format, artifact);
        }
        if artifacts.is_empty() {
            if let Some(e) = store_error {
                return Err(e.into());
            }
        }

        let envelope = RenderResponseEnvelope {
            fingerprint: fingerprint.to_string(),
            artifacts,
            metadata: RenderMetadata {
                measure_count: score.measure_count(),
                page_count: plan.page_count(),
                measures_per_line: plan.measures_per_line,
                stave_width: plan.stave_width,
                stave_spacing: plan.stave_spacing,
                unmapped_notes: outcome.unmapped,
                failed_formats: failed,
            },
        };
        info!(
            %fingerprint,
            formats = envelope.artifacts.len(),
            failed = envelope.metadata.failed_formats.len(),
            unmapped = envelope.metadata.unmapped_notes.len(),
            "render complete"
        );
        Ok(Arc::new(envelope))
    }

    fn remember(&self, fingerprint: &Fingerprint, envelope: &Arc<RenderResponseEnvelope>) {
        match self.cache.insert(fingerprint.clone(), Arc::clone(envelope)) {
            Ok(Some(evicted)) => debug!(%evicted, "cache full, evicted oldest"),
            Ok(None) => {}
            Err(e) => warn!(%fingerprint, error = %e, "cache insert failed"),
        }
    }
}

impl Default for RenderRequestHandler {
    fn default() -> Self {
        Self::new(HandlerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OutputFormat;

    const SMALL: &str = r#"{
        "noteData": { "measures": [
            { "index": 0, "notes": [
                { "pitch": 64, "duration": "quarter" },
                { "pitch": 67, "duration": "quarter" },
                { "pitch": 71, "duration": "half" }
            ]}
        ]},
        "options": { "outputFormats": ["svg"] }
    }"#;

    #[test]
    fn renders_and_caches() {
        let handler = RenderRequestHandler::default();
        let first = handler.handle_json(SMALL).unwrap();
        let second = handler.handle_json(SMALL).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.artifact(OutputFormat::Vector).is_some());
        assert_eq!(first.metadata.page_count, 1);
    }

    #[test]
    fn check_cache_reports_miss_then_hit() {
        let handler = RenderRequestHandler::default();
        let raw = RawRequest::from_json(SMALL).unwrap();
        assert!(matches!(handler.check_cache(&raw).unwrap(), CacheCheck::Miss(_)));
        handler.handle(&raw).unwrap();
        assert!(matches!(handler.check_cache(&raw).unwrap(), CacheCheck::Hit(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let handler = RenderRequestHandler::default();
        let err = handler.handle_json("{ not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(err, HandlerError::Parse(_)));
    }

    #[test]
    fn cancelled_render_is_not_cached() {
        let handler = RenderRequestHandler::default();
        let raw = RawRequest::from_json(SMALL).unwrap();
        let prepared = handler.prepare(&raw).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = handler.render_prepared(&prepared, &cancel).unwrap_err();
        assert!(matches!(err, HandlerError::Render(RenderError::Cancelled)));
        assert!(handler.lookup(&prepared.fingerprint).is_none());
    }
}
