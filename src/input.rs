//! Input checks and content hashing for data-URL images
//!
//! Everything here is synchronous and runs before any network activity.

use crate::error::{Result, SegmentationError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

/// Largest accepted decoded payload
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Smallest accepted decoded payload
pub const MIN_IMAGE_BYTES: usize = 100;
/// Bytes of encoded payload sampled for the content hash
pub const HASH_SAMPLE_BYTES: usize = 10 * 1024;

const DATA_URL_PREFIX: &str = "data:image/";

/// Accepted image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
}

impl ImageMime {
    /// Parse a MIME subtype such as `png` or `jpeg`
    #[must_use]
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Guess from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_subtype)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }
}

impl std::fmt::Display for ImageMime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated data URL, split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInput<'a> {
    pub mime: ImageMime,
    /// Everything before the comma
    pub header: &'a str,
    /// Base64 payload after the comma
    pub payload: &'a str,
}

impl<'a> ImageInput<'a> {
    /// Validate and split a data URL
    ///
    /// # Errors
    ///
    /// Returns `SegmentationError::Validation` for empty, non-image, unsupported,
    /// malformed, oversized or undersized input.
    pub fn parse(data: &'a str) -> Result<Self> {
        let data = data.trim();
        if data.is_empty() {
            return Err(SegmentationError::validation(
                "No image was provided. Please upload a JPEG, PNG, or WebP image.",
            ));
        }
        if !data.starts_with(DATA_URL_PREFIX) {
            return Err(SegmentationError::validation(
                "The provided data is not an image. Please upload a JPEG, PNG, or WebP image.",
            ));
        }

        let subtype = data
            .get(DATA_URL_PREFIX.len()..)
            .and_then(|rest| rest.split([';', ',']).next())
            .unwrap_or_default();
        let mime = ImageMime::from_subtype(subtype).ok_or_else(|| {
            SegmentationError::validation(
                "This image format is not supported. Please use a JPEG, PNG, or WebP image.",
            )
        })?;

        let malformed = || {
            SegmentationError::validation(
                "The image data is malformed. Please upload the image again.",
            )
        };
        let mut parts = data.split(',');
        let (Some(header), Some(payload), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        if payload.is_empty() || !header.to_ascii_lowercase().ends_with(";base64") {
            return Err(malformed());
        }

        let estimated = estimated_size(payload);
        if estimated > MAX_IMAGE_BYTES {
            return Err(SegmentationError::validation(
                "The image is too large. Please upload an image smaller than 10MB.",
            ));
        }
        if estimated < MIN_IMAGE_BYTES {
            return Err(SegmentationError::validation(
                "The image is too small or corrupted. Please upload a different image.",
            ));
        }

        Ok(Self {
            mime,
            header,
            payload,
        })
    }

    /// Content hash used as cache and dedup key
    ///
    /// Covers the header, the first 10KB of the payload and the payload length.
    #[must_use]
    pub fn hash(&self) -> String {
        let sample_end = self.payload.len().min(HASH_SAMPLE_BYTES);
        let sample = self.payload.as_bytes().get(..sample_end).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(self.header.as_bytes());
        hasher.update(b",");
        hasher.update(sample);
        hasher.update((self.payload.len() as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Decoded payload bytes
    ///
    /// # Errors
    ///
    /// Returns `SegmentationError::Validation` if the payload is not valid base64
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD.decode(self.payload.trim()).map_err(|_| {
            SegmentationError::validation(
                "The image data is malformed. Please upload the image again.",
            )
        })
    }

    /// Width and height read from the encoded image header
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let bytes = self.decode().ok()?;
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

/// Decoded size estimate of a base64 payload
#[must_use]
pub fn estimated_size(payload: &str) -> usize {
    payload.len() / 4 * 3
}

/// Validate a data-URL image
///
/// # Errors
///
/// See [`ImageInput::parse`]
pub fn validate_image_data(data: &str) -> Result<ImageMime> {
    ImageInput::parse(data).map(|input| input.mime)
}

/// Content hash of a valid data-URL image
///
/// # Errors
///
/// See [`ImageInput::parse`]
pub fn image_hash(data: &str) -> Result<String> {
    ImageInput::parse(data).map(|input| input.hash())
}

/// Encode raw image bytes as a base64 data URL
#[must_use]
pub fn encode_data_url(bytes: &[u8], mime: ImageMime) -> String {
    format!("data:{};base64,{}", mime.as_str(), STANDARD.encode(bytes))
}
