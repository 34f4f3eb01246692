#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # segmask
//!
//! A mask generation pipeline for background removal. Images go out to a remote
//! segmentation service; the returned alpha masks are downloaded, validated,
//! scored for edge quality and cached.
//!
//! ## Features
//!
//! - **Input checks**: data-URL validation and content hashing before any network call
//! - **Remote client**: job creation with retry and backoff, bounded polling, cancellation
//! - **Error classification**: every failure becomes a short, actionable message
//! - **Mask processing**: validation, quality tiers, blur/dilate/erode/threshold refinement
//! - **Pixel analysis off the async runtime**: worker analyzer on the blocking pool
//! - **Caching**: LRU cache with time-to-live keyed by image content
//! - **Deduplication**: concurrent requests for the same image share one job
//! - **Previews**: overlay, side-by-side and checkerboard renderings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segmask::{MaskGenerator, PipelineConfig};
//!
//! # async fn example(data_url: &str) -> anyhow::Result<()> {
//! let generator = MaskGenerator::new(PipelineConfig::from_env())?;
//! let result = generator.generate(data_url).await?;
//! println!("{:?} quality mask in {}ms", result.quality, result.generation_time_ms);
//! std::fs::write("mask.png", result.to_png_bytes()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing without a service
//!
//! [`MockPredictionApi`] and [`MockMaskFetcher`] script the remote side:
//!
//! ```rust
//! use segmask::{soft_circle_mask, AnalyzerKind, MaskGenerator, MockMaskFetcher,
//!     MockPredictionApi, PipelineConfig};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::builder().analyzer(AnalyzerKind::Inline).build().unwrap();
//! let api = Arc::new(MockPredictionApi::new());
//! let fetcher = Arc::new(MockMaskFetcher::new(&soft_circle_mask(64, 64)));
//! let generator = MaskGenerator::with_backends(config, api, fetcher).unwrap();
//! assert_eq!(generator.pending_requests(), 0);
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): `segmask` command-line tool and tracing subscriber setup
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod generator;
pub mod input;
pub mod preview;
pub mod processor;
pub mod remote;
#[cfg(feature = "cli")]
pub mod tracing_config;

pub use backends::{
    encode_png, fetched_png, soft_circle_mask, HttpMaskFetcher, HttpPredictionApi,
    MockMaskFetcher, MockPredictionApi,
};
pub use cache::{CacheStats, MaskCache};
pub use config::{AnalyzerKind, CacheConfig, PipelineConfig, PipelineConfigBuilder};
pub use download::MaskDownloader;
pub use error::{sanitize_message, ErrorKind, Result, SegmentationError};
pub use generator::{MaskGenerator, MaskResult};
pub use input::{encode_data_url, image_hash, validate_image_data, ImageInput, ImageMime};
pub use preview::{render_preview, PreviewMode, PreviewOptions};
pub use processor::{
    InlineAnalyzer, MaskProcessor, MaskQuality, PixelAnalyzer, RefineOptions, ValidationReport,
    WorkerAnalyzer,
};
pub use remote::{
    ApiFailure, MaskFetcher, Prediction, PredictionApi, PredictionStatus,
    RemoteSegmentationClient,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
