//! Mask generation orchestrator
//!
//! [`MaskGenerator`] is the entry point the rest of an application talks to. A call
//! to [`MaskGenerator::generate`] runs:
//!
//! 1. synchronous input validation and content hashing
//! 2. cache lookup
//! 3. in-flight deduplication keyed by the content hash
//! 4. prediction creation, polling, mask download
//! 5. mask validation and quality scoring
//! 6. cache store
//!
//! Each distinct image has at most one generation running at a time. The work runs
//! on its own tokio task and is shared by every caller asking for the same hash, so
//! dropping one caller's future neither cancels the job nor affects the others.

use crate::backends::{HttpMaskFetcher, HttpPredictionApi};
use crate::cache::{CacheStats, MaskCache};
use crate::config::PipelineConfig;
use crate::download::MaskDownloader;
use crate::error::{Result, SegmentationError, GENERIC_ERROR_MESSAGE};
use crate::input::ImageInput;
use crate::processor::{analyzer_for, clear_refine_memo, MaskProcessor, MaskQuality};
use crate::remote::{MaskFetcher, PredictionApi, RemoteSegmentationClient};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use image::{ImageFormat, ImageResult, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One successful generation
#[derive(Debug, Clone, PartialEq)]
pub struct MaskResult {
    /// Remote URL the mask was downloaded from
    pub mask_url: String,
    /// Decoded RGBA mask, never mutated after creation
    pub mask_image: Arc<RgbaImage>,
    /// Wall-clock time of the pipeline run
    pub generation_time_ms: u64,
    pub quality: MaskQuality,
    /// Content hash of the source image
    pub image_hash: String,
    pub created_at: DateTime<Utc>,
}

impl MaskResult {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.mask_image.dimensions()
    }

    /// Encode the mask as PNG
    ///
    /// # Errors
    /// - PNG encoding failed
    pub fn to_png_bytes(&self) -> ImageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.mask_image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

type SharedGeneration = Shared<BoxFuture<'static, Result<Arc<MaskResult>>>>;

struct InFlight {
    generation: SharedGeneration,
    cancel: CancellationToken,
    prediction_id: Arc<Mutex<Option<String>>>,
    seq: u64,
}

struct GeneratorInner {
    config: PipelineConfig,
    client: RemoteSegmentationClient,
    downloader: MaskDownloader,
    processor: MaskProcessor,
    cache: Mutex<MaskCache<Arc<MaskResult>>>,
    pending: Mutex<HashMap<String, InFlight>>,
    cache_enabled: AtomicBool,
    prefetch_enabled: AtomicBool,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GeneratorInner {
    fn caching_active(&self) -> bool {
        self.cache_enabled.load(Ordering::SeqCst)
    }

    async fn run_pipeline(
        &self,
        image_data: &str,
        hash: &str,
        cancel: &CancellationToken,
        prediction_id: &Mutex<Option<String>>,
    ) -> Result<Arc<MaskResult>> {
        let started = Instant::now();
        let expected = ImageInput::parse(image_data)?.dimensions();
        if expected.is_none() {
            debug!(hash, "Could not read source dimensions, skipping dimension check");
        }

        let prediction = self
            .client
            .create_job(image_data, self.config.max_retries, cancel)
            .await?;
        *lock(prediction_id) = Some(prediction.id.clone());

        let mask_url = self
            .client
            .poll_until_done(&prediction.id, self.config.poll_timeout, cancel)
            .await?;

        let mask = Arc::new(self.downloader.download(&mask_url, cancel).await?);
        let report = self.processor.validate(Arc::clone(&mask), expected).await;
        for warning in &report.warnings {
            warn!(hash, "Mask warning: {warning}");
        }
        if !report.is_valid {
            return Err(SegmentationError::validation(report.first_error().unwrap_or(
                "The generated mask is not usable. Please try regenerating the mask.",
            )));
        }

        Ok(Arc::new(MaskResult {
            mask_url,
            mask_image: mask,
            generation_time_ms: started.elapsed().as_millis() as u64,
            quality: report.quality,
            image_hash: hash.to_string(),
            created_at: Utc::now(),
        }))
    }
}

/// Removes the in-flight marker when a generation task ends, however it ends
struct PendingCleanup {
    inner: Arc<GeneratorInner>,
    hash: String,
    seq: u64,
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending);
        if pending.get(&self.hash).is_some_and(|entry| entry.seq == self.seq) {
            pending.remove(&self.hash);
        }
    }
}

async fn run_generation(
    inner: Arc<GeneratorInner>,
    image_data: String,
    hash: String,
    cancel: CancellationToken,
    prediction_id: Arc<Mutex<Option<String>>>,
    seq: u64,
) -> Result<Arc<MaskResult>> {
    let _cleanup = PendingCleanup {
        inner: Arc::clone(&inner),
        hash: hash.clone(),
        seq,
    };

    match inner
        .run_pipeline(&image_data, &hash, &cancel, &prediction_id)
        .await
    {
        Ok(result) => {
            if inner.caching_active() {
                lock(&inner.cache).set(hash.as_str(), Arc::clone(&result));
            }
            info!(
                hash = %hash,
                quality = %result.quality,
                generation_time_ms = result.generation_time_ms,
                "Mask generated"
            );
            Ok(result)
        }
        Err(e) => {
            warn!(
                hash = %hash,
                kind = %e.kind(),
                retryable = e.is_retryable(),
                "Mask generation failed: {e}"
            );
            Err(e)
        }
    }
}

/// Orchestrates cache, deduplication, remote generation and validation
///
/// Cheap to clone; clones share the cache and in-flight state.
#[derive(Clone)]
pub struct MaskGenerator {
    inner: Arc<GeneratorInner>,
}

impl std::fmt::Debug for MaskGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskGenerator")
            .field("cache", &self.cache_stats())
            .field("pending", &self.pending_requests())
            .field("cache_enabled", &self.is_cache_enabled())
            .field("prefetch_enabled", &self.is_prefetch_enabled())
            .finish_non_exhaustive()
    }
}

impl MaskGenerator {
    /// Generator talking to the HTTP prediction API
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Failed to build the HTTP client
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let api = Arc::new(HttpPredictionApi::new(&config)?);
        let fetcher = Arc::new(HttpMaskFetcher::new(&config)?);
        Self::with_backends(config, api, fetcher)
    }

    /// Generator over caller-supplied service backends
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_backends(
        config: PipelineConfig,
        api: Arc<dyn PredictionApi>,
        fetcher: Arc<dyn MaskFetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let analyzer = analyzer_for(config.analyzer);
        let inner = GeneratorInner {
            client: RemoteSegmentationClient::new(api, &config),
            downloader: MaskDownloader::new(fetcher, Arc::clone(&analyzer), &config),
            processor: MaskProcessor::new(analyzer),
            cache: Mutex::new(MaskCache::new(config.cache)),
            pending: Mutex::new(HashMap::new()),
            cache_enabled: AtomicBool::new(config.cache_enabled),
            prefetch_enabled: AtomicBool::new(config.prefetch_enabled),
            sequence: AtomicU64::new(0),
            config,
        };

        debug!(analyzer = inner.processor.analyzer().name(), "Created mask generator");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Generate a mask for a data-URL image
    ///
    /// Returns the cached result when available, joins an in-flight generation of
    /// the same image, and otherwise starts a new one.
    ///
    /// # Errors
    ///
    /// Any [`SegmentationError`]; input problems are reported before any network
    /// activity.
    #[instrument(skip(self, image_data))]
    pub async fn generate(&self, image_data: &str) -> Result<Arc<MaskResult>> {
        let hash = ImageInput::parse(image_data)?.hash();

        if self.inner.caching_active() {
            let cached = lock(&self.inner.cache).get(&hash);
            if let Some(result) = cached {
                debug!(hash = %hash, "Mask served from cache");
                return Ok(result);
            }
        }

        self.join_or_start(image_data, hash).await
    }

    /// Warm the cache for an image without waiting for the result
    ///
    /// Does nothing when prefetching is disabled, the input is invalid, the result
    /// is cached or a generation is already running. Failures are logged and
    /// dropped. Must be called from within a tokio runtime.
    pub fn prefetch(&self, image_data: &str) {
        if !self.is_prefetch_enabled() {
            debug!("Prefetch disabled, skipping");
            return;
        }

        let hash = match ImageInput::parse(image_data) {
            Ok(input) => input.hash(),
            Err(e) => {
                debug!("Prefetch skipped for invalid input: {e}");
                return;
            }
        };

        if self.inner.caching_active() && lock(&self.inner.cache).has(&hash) {
            debug!(hash = %hash, "Prefetch skipped, already cached");
            return;
        }
        if lock(&self.inner.pending).contains_key(&hash) {
            debug!(hash = %hash, "Prefetch skipped, already in flight");
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("Prefetch requires a tokio runtime, skipping");
            return;
        }

        let generation = self.join_or_start(image_data, hash.clone());
        tokio::spawn(async move {
            match generation.await {
                Ok(_) => debug!(hash = %hash, "Prefetch completed"),
                Err(e) => debug!(hash = %hash, "Prefetch failed: {e}"),
            }
        });
    }

    /// Generate again, ignoring the cache, then store the fresh result
    ///
    /// Only this image skips the cache lookup; concurrent generations of other
    /// images read and populate the cache as usual. The result is stored even when
    /// caching is disabled.
    ///
    /// # Errors
    ///
    /// Same as [`MaskGenerator::generate`]
    #[instrument(skip(self, image_data))]
    pub async fn regenerate(&self, image_data: &str) -> Result<Arc<MaskResult>> {
        let hash = ImageInput::parse(image_data)?.hash();

        let result = self.join_or_start(image_data, hash.clone()).await?;

        lock(&self.inner.cache).set(hash, Arc::clone(&result));
        Ok(result)
    }

    /// Cancel the most recently started generation, if any
    pub async fn abort(&self) {
        let latest = lock(&self.inner.pending)
            .iter()
            .max_by_key(|(_, entry)| entry.seq)
            .map(|(hash, _)| hash.clone());

        match latest {
            Some(hash) => {
                self.abort_request(&hash).await;
            }
            None => debug!("Nothing to abort"),
        }
    }

    /// Cancel the generation for one image hash
    ///
    /// Returns whether a generation was running. Waiting callers receive the
    /// canceled error; the remote prediction is canceled on a best-effort basis.
    pub async fn abort_request(&self, hash: &str) -> bool {
        let entry = lock(&self.inner.pending).remove(hash);
        let Some(entry) = entry else {
            return false;
        };

        entry.cancel.cancel();
        let prediction_id = lock(&entry.prediction_id).clone();
        if let Some(id) = prediction_id {
            self.inner.client.cancel_job(&id).await;
        }
        info!(hash, "Aborted mask generation");
        true
    }

    /// Drop every cached mask and memoized refinement
    pub fn clear_cache(&self) {
        lock(&self.inner.cache).clear();
        clear_refine_memo();
        info!("Cleared mask cache");
    }

    /// Remove expired cache entries, returning how many were removed
    pub fn prune_cache(&self) -> usize {
        lock(&self.inner.cache).prune()
    }

    /// Prune the cache every `interval` until the generator is dropped
    pub fn spawn_cache_pruner(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<GeneratorInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = lock(&inner.cache).prune();
                if removed > 0 {
                    debug!(removed, "Background cache prune");
                }
            }
        })
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.inner.cache).stats()
    }

    /// Whether a live cache entry exists for a content hash
    #[must_use]
    pub fn is_cached(&self, hash: &str) -> bool {
        lock(&self.inner.cache).has(hash)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.inner.cache_enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cache_enabled(&self) -> bool {
        self.inner.cache_enabled.load(Ordering::SeqCst)
    }

    pub fn set_prefetch_enabled(&self, enabled: bool) {
        self.inner.prefetch_enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_prefetch_enabled(&self) -> bool {
        self.inner.prefetch_enabled.load(Ordering::SeqCst)
    }

    /// Number of generations currently running
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn processor(&self) -> &MaskProcessor {
        &self.inner.processor
    }

    /// Join the running generation for `hash` or start one
    fn join_or_start(&self, image_data: &str, hash: String) -> SharedGeneration {
        // Held across the spawn so the task cannot clear its marker before it exists
        let mut pending = lock(&self.inner.pending);
        if let Some(existing) = pending.get(&hash) {
            debug!(hash = %hash, "Joining in-flight generation");
            return existing.generation.clone();
        }

        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let prediction_id = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_generation(
            Arc::clone(&self.inner),
            image_data.to_string(),
            hash.clone(),
            cancel.clone(),
            Arc::clone(&prediction_id),
            seq,
        ));

        let generation = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Mask generation task failed: {e}");
                    Err(SegmentationError::remote_service(GENERIC_ERROR_MESSAGE, true))
                }
            }
        }
        .boxed()
        .shared();

        debug!(hash = %hash, seq, "Started mask generation");
        pending.insert(
            hash,
            InFlight {
                generation: generation.clone(),
                cancel,
                prediction_id,
                seq,
            },
        );
        generation
    }
}
