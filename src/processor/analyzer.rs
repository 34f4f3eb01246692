//! Where heavy pixel work runs
//!
//! [`InlineAnalyzer`] computes on the calling task. [`WorkerAnalyzer`] ships the
//! same kernels to tokio's blocking pool, bounded by a semaphore, and falls back to
//! inline computation if a worker task fails.

use super::kernels::{self, AlphaStats, EdgeStats};
use crate::config::AnalyzerKind;
use async_trait::async_trait;
use image::{ImageError, RgbaImage};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tracing::warn;

/// Capability for running pixel scans and decodes
#[async_trait]
pub trait PixelAnalyzer: Send + Sync + std::fmt::Debug {
    async fn scan_alpha(&self, image: Arc<RgbaImage>) -> AlphaStats;

    async fn edge_smoothness(&self, image: Arc<RgbaImage>) -> EdgeStats;

    async fn box_blur(&self, image: Arc<RgbaImage>, radius: f32) -> RgbaImage;

    /// Decode encoded image bytes into RGBA
    async fn decode(&self, bytes: Arc<Vec<u8>>) -> Result<RgbaImage, ImageError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Runs every kernel on the calling task
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineAnalyzer;

#[async_trait]
impl PixelAnalyzer for InlineAnalyzer {
    async fn scan_alpha(&self, image: Arc<RgbaImage>) -> AlphaStats {
        kernels::scan_alpha(&image)
    }

    async fn edge_smoothness(&self, image: Arc<RgbaImage>) -> EdgeStats {
        kernels::edge_smoothness(&image)
    }

    async fn box_blur(&self, image: Arc<RgbaImage>, radius: f32) -> RgbaImage {
        kernels::box_blur(&image, radius)
    }

    /// Completes without yielding, so a surrounding `tokio::time::timeout` cannot
    /// interrupt it
    async fn decode(&self, bytes: Arc<Vec<u8>>) -> Result<RgbaImage, ImageError> {
        decode_rgba(&bytes)
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Runs kernels on the blocking thread pool
#[derive(Debug)]
pub struct WorkerAnalyzer {
    permits: Semaphore,
    max_workers: usize,
}

impl WorkerAnalyzer {
    /// Analyzer allowing at most `max_workers` concurrent jobs
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Semaphore::new(max_workers),
            max_workers,
        }
    }

    /// Process-wide analyzer sized to the available parallelism
    pub fn shared() -> Arc<WorkerAnalyzer> {
        static SHARED: OnceLock<Arc<WorkerAnalyzer>> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                let workers = std::thread::available_parallelism().map_or(2, usize::from);
                Arc::new(WorkerAnalyzer::new(workers))
            })
            .clone()
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `job` on the blocking pool; `None` means the caller should fall back
    async fn run<T, F>(&self, job: &'static str, f: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.permits.acquire().await.ok()?;
        match tokio::task::spawn_blocking(f).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(job, "Worker job failed, falling back to inline: {e}");
                None
            }
        }
    }
}

impl Default for WorkerAnalyzer {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl PixelAnalyzer for WorkerAnalyzer {
    async fn scan_alpha(&self, image: Arc<RgbaImage>) -> AlphaStats {
        let shared = Arc::clone(&image);
        match self.run("scan_alpha", move || kernels::scan_alpha(&shared)).await {
            Some(stats) => stats,
            None => kernels::scan_alpha(&image),
        }
    }

    async fn edge_smoothness(&self, image: Arc<RgbaImage>) -> EdgeStats {
        let shared = Arc::clone(&image);
        match self.run("edge_smoothness", move || kernels::edge_smoothness(&shared)).await {
            Some(stats) => stats,
            None => kernels::edge_smoothness(&image),
        }
    }

    async fn box_blur(&self, image: Arc<RgbaImage>, radius: f32) -> RgbaImage {
        let shared = Arc::clone(&image);
        match self.run("box_blur", move || kernels::box_blur(&shared, radius)).await {
            Some(blurred) => blurred,
            None => kernels::box_blur(&image, radius),
        }
    }

    async fn decode(&self, bytes: Arc<Vec<u8>>) -> Result<RgbaImage, ImageError> {
        let shared = Arc::clone(&bytes);
        match self.run("decode", move || decode_rgba(&shared)).await {
            Some(decoded) => decoded,
            None => decode_rgba(&bytes),
        }
    }

    fn name(&self) -> &'static str {
        "worker"
    }
}

/// Analyzer for a configured kind
#[must_use]
pub fn analyzer_for(kind: AnalyzerKind) -> Arc<dyn PixelAnalyzer> {
    match kind {
        AnalyzerKind::Inline => Arc::new(InlineAnalyzer),
        AnalyzerKind::Worker => WorkerAnalyzer::shared(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{encode_png, soft_circle_mask};

    #[tokio::test]
    async fn test_worker_matches_inline() {
        let mask = Arc::new(soft_circle_mask(48, 32));
        let worker = WorkerAnalyzer::new(2);

        assert_eq!(
            worker.scan_alpha(mask.clone()).await,
            InlineAnalyzer.scan_alpha(mask.clone()).await
        );
        assert_eq!(
            worker.edge_smoothness(mask.clone()).await,
            InlineAnalyzer.edge_smoothness(mask.clone()).await
        );
        assert_eq!(
            worker.box_blur(mask.clone(), 2.0).await,
            InlineAnalyzer.box_blur(mask, 2.0).await
        );
    }

    #[tokio::test]
    async fn test_decode_roundtrip_and_failure() {
        let mask = soft_circle_mask(8, 8);
        let bytes = Arc::new(encode_png(&mask));
        assert_eq!(WorkerAnalyzer::default().decode(bytes).await.unwrap(), mask);

        let garbage = Arc::new(vec![1u8, 2, 3, 4]);
        assert!(InlineAnalyzer.decode(garbage).await.is_err());
    }

    #[test]
    fn test_shared_is_singleton() {
        let first = WorkerAnalyzer::shared();
        let second = WorkerAnalyzer::shared();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.max_workers() >= 1);
    }

    #[test]
    fn test_analyzer_for_kind() {
        assert_eq!(analyzer_for(AnalyzerKind::Inline).name(), "inline");
        assert_eq!(analyzer_for(AnalyzerKind::Worker).name(), "worker");
    }
}
