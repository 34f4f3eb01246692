//! Preview rendering for generated masks
//!
//! Every renderer reads `source` and `mask` through shared references and writes
//! only into the caller's `target`, which is resized as needed. Source pixels are
//! copied into a scratch buffer before any compositing.

use image::imageops;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How to present a mask next to its source image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    /// Mask composited over the source at a given opacity
    #[default]
    Overlay,
    /// Source on the left, mask on the right
    SideBySide,
    /// Cut-out subject over a checkerboard
    Checkerboard,
}

impl std::fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overlay => write!(f, "overlay"),
            Self::SideBySide => write!(f, "side-by-side"),
            Self::Checkerboard => write!(f, "checkerboard"),
        }
    }
}

impl FromStr for PreviewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overlay" => Ok(Self::Overlay),
            "side-by-side" | "sidebyside" => Ok(Self::SideBySide),
            "checkerboard" | "checker" => Ok(Self::Checkerboard),
            other => Err(format!(
                "unknown preview mode '{other}' (expected overlay, side-by-side or checkerboard)"
            )),
        }
    }
}

/// Preview rendering options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewOptions {
    pub mode: PreviewMode,
    /// Mask opacity for overlay mode, clamped to `0.0..=1.0`
    pub opacity: f32,
    /// Flatten the mask's RGB to this color in overlay mode
    pub highlight: Option<Rgba<u8>>,
    /// Checkerboard cell size in pixels
    pub checker_size: u32,
    pub checker_colors: [Rgba<u8>; 2],
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            mode: PreviewMode::default(),
            opacity: 0.5,
            highlight: None,
            checker_size: 16,
            checker_colors: [Rgba([204, 204, 204, 255]), Rgba([255, 255, 255, 255])],
        }
    }
}

impl PreviewOptions {
    #[must_use]
    pub fn new(mode: PreviewMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    #[must_use]
    pub fn highlight(mut self, color: Rgba<u8>) -> Self {
        self.highlight = Some(color);
        self
    }

    #[must_use]
    pub fn checker_size(mut self, size: u32) -> Self {
        self.checker_size = size;
        self
    }
}

/// Render a preview into `target` according to `options.mode`
pub fn render_preview(
    target: &mut RgbaImage,
    source: &RgbaImage,
    mask: &RgbaImage,
    options: &PreviewOptions,
) {
    match options.mode {
        PreviewMode::Overlay => render_overlay(target, source, mask, options),
        PreviewMode::SideBySide => render_side_by_side(target, source, mask),
        PreviewMode::Checkerboard => render_checkerboard(target, source, mask, options),
    }
}

/// Source with the (optionally recolored) mask composited on top
///
/// `target` takes the source dimensions; the mask is composited over the
/// overlapping region.
pub fn render_overlay(
    target: &mut RgbaImage,
    source: &RgbaImage,
    mask: &RgbaImage,
    options: &PreviewOptions,
) {
    let opacity = if options.opacity.is_finite() {
        options.opacity.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut scratch = source.clone();
    let width = scratch.width().min(mask.width());
    let height = scratch.height().min(mask.height());

    for y in 0..height {
        for x in 0..width {
            let mask_pixel = mask.get_pixel(x, y);
            let color = options.highlight.unwrap_or(*mask_pixel);
            let alpha = f32::from(mask_pixel[3]) / 255.0 * opacity;
            let top = Rgba([color[0], color[1], color[2], (alpha * 255.0).round() as u8]);
            let bottom = scratch.get_pixel_mut(x, y);
            *bottom = composite_over(top, *bottom);
        }
    }

    *target = scratch;
}

/// Source and mask next to each other on a canvas twice the source width
pub fn render_side_by_side(target: &mut RgbaImage, source: &RgbaImage, mask: &RgbaImage) {
    let width = source.width();
    let height = source.height().max(mask.height());
    let scratch = source.clone();

    let mut canvas = RgbaImage::new(width * 2, height);
    imageops::replace(&mut canvas, &scratch, 0, 0);
    imageops::replace(&mut canvas, mask, i64::from(width), 0);
    *target = canvas;
}

/// Cut-out subject over a checkerboard so transparency is visible
///
/// The cut-out is the source's color with the mask's alpha. `target` takes the
/// mask dimensions.
pub fn render_checkerboard(
    target: &mut RgbaImage,
    source: &RgbaImage,
    mask: &RgbaImage,
    options: &PreviewOptions,
) {
    let (width, height) = mask.dimensions();
    let cell = options.checker_size.max(1);
    let [even, odd] = options.checker_colors;

    let scratch = source.clone();

    *target = RgbaImage::from_fn(width, height, |x, y| {
        let checker = if (x / cell + y / cell) % 2 == 0 {
            even
        } else {
            odd
        };
        let alpha = mask.get_pixel(x, y)[3];
        match scratch.get_pixel_checked(x, y) {
            Some(pixel) => composite_over(Rgba([pixel[0], pixel[1], pixel[2], alpha]), checker),
            None => checker,
        }
    });
}

/// Porter-Duff "source over" for straight-alpha pixels
fn composite_over(top: Rgba<u8>, bottom: Rgba<u8>) -> Rgba<u8> {
    let top_a = f32::from(top[3]) / 255.0;
    let bottom_a = f32::from(bottom[3]) / 255.0;
    let out_a = top_a + bottom_a * (1.0 - top_a);
    if out_a <= f32::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |i: usize| {
        let value = (f32::from(top[i]) * top_a + f32::from(bottom[i]) * bottom_a * (1.0 - top_a))
            / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    Rgba([channel(0), channel(1), channel(2), (out_a * 255.0).round() as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RgbaImage {
        RgbaImage::from_fn(4, 3, |x, y| Rgba([(x * 60) as u8, (y * 80) as u8, 10, 255]))
    }

    fn mask() -> RgbaImage {
        RgbaImage::from_fn(4, 3, |x, _| Rgba([255, 255, 255, if x < 2 { 255 } else { 0 }]))
    }

    #[test]
    fn test_renderers_never_touch_inputs() {
        let source = source();
        let mask = mask();
        let (source_before, mask_before) = (source.clone(), mask.clone());

        for mode in [
            PreviewMode::Overlay,
            PreviewMode::SideBySide,
            PreviewMode::Checkerboard,
        ] {
            let mut target = RgbaImage::new(1, 1);
            render_preview(&mut target, &source, &mask, &PreviewOptions::new(mode));
            assert_eq!(source, source_before, "mode {mode}");
            assert_eq!(mask, mask_before, "mode {mode}");
        }
    }

    #[test]
    fn test_overlay_composites_with_highlight() {
        let source = source();
        let mut target = RgbaImage::new(1, 1);
        let options = PreviewOptions::new(PreviewMode::Overlay)
            .opacity(0.5)
            .highlight(Rgba([255, 0, 0, 255]));
        render_overlay(&mut target, &source, &mask(), &options);

        assert_eq!(target.dimensions(), (4, 3));
        // Opaque mask pixel: half red over the source
        let blended = target.get_pixel(0, 0);
        assert_eq!(blended[3], 255);
        assert!((i32::from(blended[0]) - 128).abs() <= 1);
        // Transparent mask pixel: source unchanged
        assert_eq!(target.get_pixel(3, 0), source.get_pixel(3, 0));
    }

    #[test]
    fn test_side_by_side_layout() {
        let source = source();
        let mask = mask();
        let mut target = RgbaImage::new(1, 1);
        render_side_by_side(&mut target, &source, &mask);

        assert_eq!(target.dimensions(), (8, 3));
        assert_eq!(target.get_pixel(1, 1), source.get_pixel(1, 1));
        assert_eq!(target.get_pixel(5, 1), mask.get_pixel(1, 1));
    }

    #[test]
    fn test_checkerboard_shows_grid_where_transparent() {
        let source = source();
        let mut target = RgbaImage::new(1, 1);
        let options = PreviewOptions::new(PreviewMode::Checkerboard).checker_size(1);
        render_checkerboard(&mut target, &source, &mask(), &options);

        let [even, odd] = options.checker_colors;
        assert_eq!(*target.get_pixel(2, 0), even);
        assert_eq!(*target.get_pixel(3, 0), odd);
        // Opaque mask region shows the source color
        assert_eq!(target.get_pixel(1, 2), source.get_pixel(1, 2));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("side-by-side".parse::<PreviewMode>(), Ok(PreviewMode::SideBySide));
        assert_eq!("Overlay".parse::<PreviewMode>(), Ok(PreviewMode::Overlay));
        assert!("sepia".parse::<PreviewMode>().is_err());
        assert_eq!(PreviewMode::Checkerboard.to_string(), "checkerboard");
    }
}
