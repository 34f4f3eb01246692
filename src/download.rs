//! Downloading generated masks
//!
//! This module fetches the mask produced by a prediction, retries network-class
//! failures with backoff, checks the response, decodes it under a time bound and
//! re-checks the alpha channel before handing the image to the generator.

use crate::config::PipelineConfig;
use crate::error::{Result, SegmentationError};
use crate::processor::{alpha_error, PixelAnalyzer};
use crate::remote::{backoff_delay, until_cancelled, FetchedMask, MaskFetcher};
use image::{ImageReader, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const UNREACHABLE_MESSAGE: &str =
    "Unable to download the generated mask. Please check your connection and try again.";
const NOT_FOUND_MESSAGE: &str =
    "The generated mask is no longer available. Please regenerate the mask.";
const FORBIDDEN_MESSAGE: &str =
    "Access to the generated mask was denied. Please regenerate the mask.";
const NOT_IMAGE_MESSAGE: &str =
    "The service returned something other than an image. Please try regenerating the mask.";
const EMPTY_BODY_MESSAGE: &str = "The downloaded mask was empty. Please regenerate the mask.";
const UNREADABLE_MESSAGE: &str =
    "The generated mask could not be read. Please regenerate the mask.";
const LOAD_TIMEOUT_MESSAGE: &str = "Loading the generated mask took too long. Please try again.";

/// Mask downloader with retry, decode bound and alpha re-check
#[derive(Debug)]
pub struct MaskDownloader {
    fetcher: Arc<dyn MaskFetcher>,
    analyzer: Arc<dyn PixelAnalyzer>,
    retries: u32,
    load_timeout: Duration,
    max_dimension: u32,
}

impl MaskDownloader {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn MaskFetcher>,
        analyzer: Arc<dyn PixelAnalyzer>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            analyzer,
            retries: config.download_retries,
            load_timeout: config.image_load_timeout,
            max_dimension: config.max_mask_dimension,
        }
    }

    /// Download and decode a mask
    ///
    /// # Errors
    /// - `Download` for unreachable hosts after retries, 404/403, non-image
    ///   content, empty bodies and undecodable data
    /// - `Timeout` when decoding on the worker analyzer exceeds the load timeout
    /// - `Validation` for oversized masks or masks without usable alpha
    /// - The canceled error when `cancel` fires
    #[instrument(skip(self, cancel))]
    pub async fn download(&self, url: &str, cancel: &CancellationToken) -> Result<RgbaImage> {
        let response = self.fetch_with_retry(url, cancel).await?;
        let body = check_response(response)?;

        // Reject oversized masks from the header, before allocating the pixel buffer
        let dimensions = header_dimensions(&body);
        if let Some((width, height)) = dimensions {
            self.check_dimensions(width, height)?;
        }

        // Inline decoding never yields, so the timeout only bounds the worker analyzer
        let decoded = tokio::time::timeout(self.load_timeout, self.analyzer.decode(Arc::new(body)));
        let mask = match until_cancelled(cancel, decoded).await? {
            Ok(Ok(mask)) => mask,
            Ok(Err(e)) => {
                warn!("Failed to decode mask: {e}");
                return Err(SegmentationError::download(UNREADABLE_MESSAGE));
            }
            Err(_) => {
                warn!(timeout_ms = self.load_timeout.as_millis() as u64, "Mask decode timed out");
                return Err(SegmentationError::timeout(LOAD_TIMEOUT_MESSAGE));
            }
        };

        let (width, height) = mask.dimensions();
        if dimensions.is_none() {
            self.check_dimensions(width, height)?;
        }

        let mask = Arc::new(mask);
        let alpha = self.analyzer.scan_alpha(Arc::clone(&mask)).await;
        if !alpha.has_alpha() {
            let message = alpha_error(&alpha).unwrap_or(
                "The generated mask has no transparency. Please try regenerating the mask.",
            );
            return Err(SegmentationError::validation(message));
        }

        debug!(width, height, "Downloaded mask");
        Ok(Arc::try_unwrap(mask).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(SegmentationError::validation(format!(
                "The generated mask is {width}x{height}, larger than the {max} pixel limit. Please use a smaller image.",
                max = self.max_dimension
            )));
        }
        Ok(())
    }

    async fn fetch_with_retry(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedMask> {
        let mut attempt = 0;
        loop {
            let reason = match until_cancelled(cancel, self.fetcher.fetch(url)).await? {
                Ok(response) if response.status >= 500 => format!("HTTP {}", response.status),
                Ok(response) => return Ok(response),
                Err(failure) => failure.message,
            };

            if attempt >= self.retries {
                warn!(attempts = attempt + 1, "Mask download failed: {reason}");
                return Err(SegmentationError::download(UNREACHABLE_MESSAGE));
            }

            let delay = backoff_delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying mask download: {reason}");
            until_cancelled(cancel, tokio::time::sleep(delay)).await?;
            attempt += 1;
        }
    }
}

fn header_dimensions(body: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(body))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Reject non-success statuses, non-image content and empty bodies
fn check_response(response: FetchedMask) -> Result<Vec<u8>> {
    match response.status {
        200..=299 => {}
        404 => return Err(SegmentationError::download(NOT_FOUND_MESSAGE)),
        403 => return Err(SegmentationError::download(FORBIDDEN_MESSAGE)),
        status => {
            return Err(SegmentationError::download(format!(
                "The mask download failed with status {status}. Please try regenerating the mask."
            )))
        }
    }

    if let Some(content_type) = response.content_type.as_deref() {
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            warn!(content_type, "Mask response is not an image");
            return Err(SegmentationError::download(NOT_IMAGE_MESSAGE));
        }
    }

    if response.body.is_empty() {
        return Err(SegmentationError::download(EMPTY_BODY_MESSAGE));
    }

    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{encode_png, fetched_png, soft_circle_mask, MockMaskFetcher};
    use crate::error::ErrorKind;
    use crate::processor::InlineAnalyzer;
    use crate::remote::ApiFailure;
    use image::Rgba;
    use tokio::time::Instant;

    fn downloader(fetcher: &Arc<MockMaskFetcher>) -> MaskDownloader {
        MaskDownloader::new(fetcher.clone(), Arc::new(InlineAnalyzer), &PipelineConfig::default())
    }

    fn response(status: u16, content_type: Option<&str>, body: &[u8]) -> FetchedMask {
        FetchedMask {
            status,
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_success() {
        let mask = soft_circle_mask(20, 10);
        let fetcher = Arc::new(MockMaskFetcher::new(&mask));

        let downloaded = downloader(&fetcher)
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(downloaded, mask);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_retries_network_failures() {
        let mask = soft_circle_mask(8, 8);
        let fetcher = Arc::new(MockMaskFetcher::new(&mask));
        fetcher.push(Err(ApiFailure::transport("connection reset")));
        fetcher.push(Ok(response(502, None, b"")));

        let started = Instant::now();
        let downloaded = downloader(&fetcher)
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(downloaded.dimensions(), (8, 8));
        assert_eq!(fetcher.calls(), 3);
        // 1s then 2s backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_gives_up_after_retries() {
        let fetcher = Arc::new(MockMaskFetcher::new(&soft_circle_mask(8, 8)));
        for _ in 0..3 {
            fetcher.push(Err(ApiFailure::transport("dns failure")));
        }

        let err = downloader(&fetcher)
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Download);
        assert!(err.is_retryable());
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_status_messages() {
        for (status, expected) in [(404, NOT_FOUND_MESSAGE), (403, FORBIDDEN_MESSAGE)] {
            let fetcher = Arc::new(MockMaskFetcher::new(&soft_circle_mask(8, 8)));
            fetcher.push(Ok(response(status, Some("application/json"), b"{}")));

            let err = downloader(&fetcher)
                .download("https://cdn/mask.png", &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err.message(), expected);
            assert_eq!(fetcher.calls(), 1);
        }
    }

    #[test]
    fn test_check_response_rejections() {
        let err = check_response(response(200, Some("text/html"), b"<html>")).unwrap_err();
        assert_eq!(err.message(), NOT_IMAGE_MESSAGE);

        let err = check_response(response(200, Some("image/png"), b"")).unwrap_err();
        assert_eq!(err.message(), EMPTY_BODY_MESSAGE);

        assert!(check_response(response(200, Some("IMAGE/PNG"), b"x")).is_ok());
        assert!(check_response(response(200, None, b"x")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_rejects_undecodable_and_oversized() {
        let fetcher = Arc::new(MockMaskFetcher::with_default(response(
            200,
            Some("image/png"),
            b"definitely not a png",
        )));
        let err = downloader(&fetcher)
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.message(), UNREADABLE_MESSAGE);

        let fetcher = Arc::new(MockMaskFetcher::new(&soft_circle_mask(40, 10)));
        let config = PipelineConfig::builder().max_mask_dimension(32).build().unwrap();
        let downloader = MaskDownloader::new(fetcher, Arc::new(InlineAnalyzer), &config);
        let err = downloader
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_mask_rejected_from_header() {
        // Truncated pixel data: only the header is readable
        let mut body = encode_png(&soft_circle_mask(40, 10));
        body.truncate(body.len() - 20);
        assert_eq!(header_dimensions(&body), Some((40, 10)));

        let fetcher = Arc::new(MockMaskFetcher::with_default(response(200, Some("image/png"), &body)));
        let config = PipelineConfig::builder().max_mask_dimension(32).build().unwrap();
        let downloader = MaskDownloader::new(fetcher, Arc::new(InlineAnalyzer), &config);

        let err = downloader
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("40x10"), "{}", err.message());
    }

    /// Decoder that yields for a minute before decoding
    #[derive(Debug)]
    struct StalledDecoder;

    #[async_trait::async_trait]
    impl PixelAnalyzer for StalledDecoder {
        async fn scan_alpha(&self, image: Arc<RgbaImage>) -> crate::processor::AlphaStats {
            InlineAnalyzer.scan_alpha(image).await
        }

        async fn edge_smoothness(&self, image: Arc<RgbaImage>) -> crate::processor::EdgeStats {
            InlineAnalyzer.edge_smoothness(image).await
        }

        async fn box_blur(&self, image: Arc<RgbaImage>, radius: f32) -> RgbaImage {
            InlineAnalyzer.box_blur(image, radius).await
        }

        async fn decode(&self, bytes: Arc<Vec<u8>>) -> std::result::Result<RgbaImage, image::ImageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            InlineAnalyzer.decode(bytes).await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_yielding_decode_is_bounded_by_load_timeout() {
        let fetcher = Arc::new(MockMaskFetcher::new(&soft_circle_mask(8, 8)));
        let downloader = MaskDownloader::new(fetcher, Arc::new(StalledDecoder), &PipelineConfig::default());

        let started = Instant::now();
        let err = downloader
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), LOAD_TIMEOUT_MESSAGE);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_rechecks_alpha() {
        let opaque = image::RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let fetcher = Arc::new(MockMaskFetcher::with_default(fetched_png(&opaque)));

        let err = downloader(&fetcher)
            .download("https://cdn/mask.png", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("fully opaque"));
    }
}
