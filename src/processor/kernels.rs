//! Pure pixel kernels shared by every `PixelAnalyzer` implementation
//!
//! Keeping the math here, with no scheduling concerns, is what makes the inline and
//! worker analyzers produce identical results.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Alpha strictly above this counts toward an edge
pub const EDGE_ALPHA_MIN: u8 = 10;
/// Alpha strictly below this counts toward an edge
pub const EDGE_ALPHA_MAX: u8 = 245;
/// Neighbor alpha deltas below this are smooth
pub const SMOOTH_DELTA: u8 = 50;

static NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Alpha channel histogram buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlphaStats {
    pub total: u64,
    /// Alpha == 0
    pub transparent: u64,
    /// Alpha == 255
    pub opaque: u64,
    /// 0 < alpha < 255
    pub partial: u64,
}

impl AlphaStats {
    /// Whether the mask carries usable alpha information
    ///
    /// True for any partial pixel, or for a hard-edged binary mask that has both
    /// fully transparent and fully opaque pixels.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.partial > 0 || (self.transparent > 0 && self.opaque > 0)
    }

    #[must_use]
    pub fn all_transparent(&self) -> bool {
        self.total > 0 && self.transparent == self.total
    }

    #[must_use]
    pub fn all_opaque(&self) -> bool {
        self.total > 0 && self.opaque == self.total
    }

    /// Fraction of pixels with partial alpha
    #[must_use]
    pub fn partial_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.partial as f64 / self.total as f64
        }
    }
}

/// Edge-smoothness counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeStats {
    /// Pixels with alpha strictly between 10 and 245
    pub edge_pixels: u64,
    /// Edge pixels whose in-bounds neighbors all differ by less than 50
    pub smooth_edges: u64,
}

impl EdgeStats {
    #[must_use]
    pub fn smooth_ratio(&self) -> f64 {
        if self.edge_pixels == 0 {
            0.0
        } else {
            self.smooth_edges as f64 / self.edge_pixels as f64
        }
    }
}

#[must_use]
pub fn scan_alpha(image: &RgbaImage) -> AlphaStats {
    let mut stats = AlphaStats::default();
    for pixel in image.pixels() {
        stats.total += 1;
        match pixel[3] {
            0 => stats.transparent += 1,
            255 => stats.opaque += 1,
            _ => stats.partial += 1,
        }
    }
    stats
}

fn is_edge(alpha: u8) -> bool {
    alpha > EDGE_ALPHA_MIN && alpha < EDGE_ALPHA_MAX
}

#[must_use]
pub fn edge_smoothness(image: &RgbaImage) -> EdgeStats {
    let (width, height) = image.dimensions();
    let mut stats = EdgeStats::default();

    for (x, y, pixel) in image.enumerate_pixels() {
        let alpha = pixel[3];
        if !is_edge(alpha) {
            continue;
        }
        stats.edge_pixels += 1;

        let smooth = neighbors(x, y, width, height)
            .all(|(nx, ny)| image.get_pixel(nx, ny)[3].abs_diff(alpha) < SMOOTH_DELTA);
        if smooth {
            stats.smooth_edges += 1;
        }
    }

    stats
}

/// In-bounds 8-neighborhood of a pixel
fn neighbors(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    NEIGHBORS.iter().filter_map(move |&(dx, dy)| {
        let nx = i64::from(x) + dx;
        let ny = i64::from(y) + dy;
        let in_bounds = nx >= 0 && ny >= 0 && nx < i64::from(width) && ny < i64::from(height);
        in_bounds.then(|| (nx as u32, ny as u32))
    })
}

/// Kernel size used for a blur radius: `2 * ceil(radius) + 1`, saturating at `u32::MAX`
#[must_use]
pub fn blur_kernel_size(radius: f32) -> u32 {
    if !radius.is_finite() || radius <= 0.0 {
        return 1;
    }
    (radius.ceil() as u32).saturating_mul(2).saturating_add(1)
}

/// Box blur approximating a Gaussian, all four channels independently
///
/// Runs as two separable passes; each output averages only in-bounds samples.
#[must_use]
pub fn box_blur(image: &RgbaImage, radius: f32) -> RgbaImage {
    // A window wider than the image averages the same samples
    let half = (blur_kernel_size(radius) / 2).min(image.width().max(image.height()));
    if half == 0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let horizontal = blur_pass(image, half, true);
    blur_pass(&horizontal, half, false)
}

fn blur_pass(image: &RgbaImage, half: u32, horizontal: bool) -> RgbaImage {
    let (width, height) = image.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let (pos, len) = if horizontal { (x, width) } else { (y, height) };
        let start = pos.saturating_sub(half);
        let end = pos.saturating_add(half).min(len - 1);

        let mut sums = [0u32; 4];
        for i in start..=end {
            let sample = if horizontal {
                image.get_pixel(i, y)
            } else {
                image.get_pixel(x, i)
            };
            for (sum, channel) in sums.iter_mut().zip(sample.0) {
                *sum += u32::from(channel);
            }
        }

        let count = end - start + 1;
        Rgba(sums.map(|sum| ((sum + count / 2) / count) as u8))
    })
}

/// Replace each alpha with the max over its 3x3 neighborhood
#[must_use]
pub fn dilate(image: &RgbaImage) -> RgbaImage {
    morph(image, u8::max)
}

/// Replace each alpha with the min over its 3x3 neighborhood
#[must_use]
pub fn erode(image: &RgbaImage) -> RgbaImage {
    morph(image, u8::min)
}

fn morph(image: &RgbaImage, pick: fn(u8, u8) -> u8) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut output = image.clone();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let alpha = neighbors(x, y, width, height)
            .fold(image.get_pixel(x, y)[3], |acc, (nx, ny)| {
                pick(acc, image.get_pixel(nx, ny)[3])
            });
        pixel[3] = alpha;
    }
    output
}

/// Snap alpha to 255 at or above `cutoff`, to 0 below it
#[must_use]
pub fn threshold(image: &RgbaImage, cutoff: u8) -> RgbaImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[3] = if pixel[3] >= cutoff { 255 } else { 0 };
    }
    output
}

/// Alpha channel as a single-channel image
#[must_use]
pub fn extract_alpha(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[3]])
    })
}
