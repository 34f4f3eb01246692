//! Mask validation, quality scoring and refinement
//!
//! The [`MaskProcessor`] decides whether a downloaded mask is usable and how good
//! it is. Quality comes from edge smoothness: a production matte has soft alpha
//! gradients along the subject boundary, a placeholder or broken mask has hard or
//! jagged transitions.
//!
//! # Quality tiers
//!
//! Pixels with alpha strictly between 10 and 245 are edge pixels. An edge pixel is
//! smooth when every in-bounds neighbor differs by less than 50. The smooth ratio
//! maps to `high` above 0.8, `medium` above 0.5 and `low` otherwise. A mask with no
//! edge pixels at all is `low`.

pub mod analyzer;
pub mod kernels;
pub mod refine;

pub use analyzer::{analyzer_for, InlineAnalyzer, PixelAnalyzer, WorkerAnalyzer};
pub use kernels::{AlphaStats, EdgeStats};
pub use refine::{clear_refine_memo, refine_memo, RefineMemo, RefineOptions};

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Partial-alpha fraction below which a mask is flagged as noisy
pub const NOISE_RATIO: f64 = 0.001;

const HIGH_QUALITY_RATIO: f64 = 0.8;
const MEDIUM_QUALITY_RATIO: f64 = 0.5;

/// Quality tier of a mask, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskQuality {
    Low,
    Medium,
    High,
}

impl MaskQuality {
    /// Tier for a set of edge statistics
    #[must_use]
    pub fn from_edges(edges: &EdgeStats) -> Self {
        if edges.edge_pixels == 0 {
            return Self::Low;
        }
        let ratio = edges.smooth_ratio();
        if ratio > HIGH_QUALITY_RATIO {
            Self::High
        } else if ratio > MEDIUM_QUALITY_RATIO {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for MaskQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Outcome of validating a mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub has_alpha_channel: bool,
    /// Width and height of the mask
    pub dimensions: (u32, u32),
    pub quality: MaskQuality,
    /// Problems that make the mask unusable
    pub errors: Vec<String>,
    /// Problems worth logging that do not reject the mask
    pub warnings: Vec<String>,
    pub alpha: AlphaStats,
    pub edges: EdgeStats,
}

impl ValidationReport {
    /// First error, for surfacing to a user
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

/// Why a mask's alpha channel is unusable, if it is
#[must_use]
pub fn alpha_error(alpha: &AlphaStats) -> Option<&'static str> {
    if alpha.total == 0 {
        Some("The mask image is empty. Please regenerate the mask.")
    } else if alpha.all_transparent() {
        Some("The mask is fully transparent, so no subject was found. Please upload a photo with a clear foreground subject.")
    } else if alpha.all_opaque() {
        Some("The mask is fully opaque, so the background was not removed. Please try regenerating the mask.")
    } else {
        None
    }
}

/// Validates, scores and refines masks through a [`PixelAnalyzer`]
#[derive(Debug, Clone)]
pub struct MaskProcessor {
    analyzer: Arc<dyn PixelAnalyzer>,
}

impl MaskProcessor {
    #[must_use]
    pub fn new(analyzer: Arc<dyn PixelAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Processor running every scan inline
    #[must_use]
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineAnalyzer))
    }

    #[must_use]
    pub fn analyzer(&self) -> &Arc<dyn PixelAnalyzer> {
        &self.analyzer
    }

    /// Validate a mask, optionally against the source image dimensions
    #[instrument(skip(self, mask), fields(analyzer = self.analyzer.name()))]
    pub async fn validate(
        &self,
        mask: Arc<RgbaImage>,
        expected: Option<(u32, u32)>,
    ) -> ValidationReport {
        let dimensions = mask.dimensions();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some((width, height)) = expected {
            if dimensions != (width, height) {
                errors.push(format!(
                    "Dimension mismatch: the mask is {}x{} but the image is {width}x{height}. Please regenerate the mask.",
                    dimensions.0, dimensions.1
                ));
            }
        }

        let (alpha, edges) = tokio::join!(
            self.analyzer.scan_alpha(Arc::clone(&mask)),
            self.analyzer.edge_smoothness(Arc::clone(&mask))
        );

        if let Some(error) = alpha_error(&alpha) {
            errors.push(error.to_string());
        }

        let partial_ratio = alpha.partial_ratio();
        if alpha.partial > 0 && partial_ratio < NOISE_RATIO {
            warnings.push(format!(
                "Only {:.3}% of mask pixels are soft edges; the mask may contain artifacts",
                partial_ratio * 100.0
            ));
        }

        let has_alpha_channel = alpha.has_alpha();
        let quality = MaskQuality::from_edges(&edges);
        let is_valid = errors.is_empty() && has_alpha_channel;

        debug!(
            width = dimensions.0,
            height = dimensions.1,
            %quality,
            is_valid,
            edge_pixels = edges.edge_pixels,
            smooth_edges = edges.smooth_edges,
            "Validated mask"
        );

        ValidationReport {
            is_valid,
            has_alpha_channel,
            dimensions,
            quality,
            errors,
            warnings,
            alpha,
            edges,
        }
    }

    /// Quality tier from edge smoothness
    pub async fn assess_quality(&self, mask: Arc<RgbaImage>) -> MaskQuality {
        let edges = self.analyzer.edge_smoothness(mask).await;
        MaskQuality::from_edges(&edges)
    }

    /// Apply refinement passes, returning a new mask
    ///
    /// The input is never modified. Results are memoized process-wide by mask
    /// content and options.
    pub async fn refine(&self, mask: &Arc<RgbaImage>, options: &RefineOptions) -> Arc<RgbaImage> {
        if options.is_noop() {
            return Arc::clone(mask);
        }

        let key = refine::memo_key(mask, options);
        let memoized = refine_memo().get(&key);
        if let Some(cached) = memoized {
            debug!("Refined mask served from memo");
            return cached;
        }

        let mut current = match options.blur_radius {
            Some(radius) if radius > 0.0 => self.analyzer.box_blur(Arc::clone(mask), radius).await,
            _ => mask.as_ref().clone(),
        };
        for _ in 0..options.dilate {
            current = kernels::dilate(&current);
        }
        for _ in 0..options.erode {
            current = kernels::erode(&current);
        }
        if let Some(cutoff) = options.threshold {
            current = kernels::threshold(&current, cutoff);
        }

        let refined = Arc::new(current);
        refine_memo().insert(key, Arc::clone(&refined));
        refined
    }

    /// Alpha channel of a mask as a grayscale buffer
    #[must_use]
    pub fn extract_alpha_channel(&self, mask: &RgbaImage) -> GrayImage {
        kernels::extract_alpha(mask)
    }
}

impl Default for MaskProcessor {
    fn default() -> Self {
        Self::new(WorkerAnalyzer::shared())
    }
}
