//! Mask refinement options and the process-wide refinement memo

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Refined masks kept in the memo before the oldest is dropped
pub const REFINE_MEMO_CAPACITY: usize = 16;

/// Opt-in refinement passes, applied as blur, dilate, erode, threshold
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RefineOptions {
    /// Box blur radius in pixels
    pub blur_radius: Option<f32>,
    /// Dilation passes
    pub dilate: u32,
    /// Erosion passes
    pub erode: u32,
    /// Alpha cutoff for snapping to 0 or 255
    pub threshold: Option<u8>,
}

impl RefineOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn blur(mut self, radius: f32) -> Self {
        self.blur_radius = Some(radius);
        self
    }

    #[must_use]
    pub fn dilate(mut self, iterations: u32) -> Self {
        self.dilate = iterations;
        self
    }

    #[must_use]
    pub fn erode(mut self, iterations: u32) -> Self {
        self.erode = iterations;
        self
    }

    #[must_use]
    pub fn threshold(mut self, cutoff: u8) -> Self {
        self.threshold = Some(cutoff);
        self
    }

    /// Whether no pass would change the mask
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.blur_radius.map_or(true, |radius| radius <= 0.0)
            && self.dilate == 0
            && self.erode == 0
            && self.threshold.is_none()
    }

    fn fingerprint(&self) -> String {
        format!(
            "b{:?}d{}e{}t{:?}",
            self.blur_radius.map(f32::to_bits),
            self.dilate,
            self.erode,
            self.threshold
        )
    }
}

/// Memo key: mask content plus the options applied to it
pub(crate) fn memo_key(mask: &RgbaImage, options: &RefineOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mask.width().to_le_bytes());
    hasher.update(mask.height().to_le_bytes());
    hasher.update(mask.as_raw());
    hasher.update(options.fingerprint().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded memo of refined masks, oldest insert evicted first
#[derive(Debug, Default)]
pub struct RefineMemo {
    entries: HashMap<String, Arc<RgbaImage>>,
    order: VecDeque<String>,
}

impl RefineMemo {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, mask: Arc<RgbaImage>) {
        if self.entries.insert(key.clone(), mask).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > REFINE_MEMO_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Process-wide refinement memo
pub fn refine_memo() -> MutexGuard<'static, RefineMemo> {
    static MEMO: OnceLock<Mutex<RefineMemo>> = OnceLock::new();
    MEMO.get_or_init(|| Mutex::new(RefineMemo::default()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Drop every memoized refinement
pub fn clear_refine_memo() {
    refine_memo().clear();
}
