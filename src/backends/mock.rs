//! Mock backends for testing the pipeline without network access
//!
//! Responses are scripted per call through FIFO queues. When a queue runs dry the
//! mock falls back to a successful default, so tests only script the calls they
//! care about.

use crate::remote::{
    ApiFailure, CreatePredictionRequest, FetchedMask, MaskFetcher, Prediction, PredictionApi,
};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// URL returned by default for succeeded predictions
pub const MOCK_MASK_URL: &str = "https://mock.segmask.invalid/mask.png";

type ApiResult<T> = std::result::Result<T, ApiFailure>;

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(item);
}

/// Scripted prediction API
#[derive(Debug, Default)]
pub struct MockPredictionApi {
    create_responses: Mutex<VecDeque<ApiResult<Prediction>>>,
    get_responses: Mutex<VecDeque<ApiResult<Prediction>>>,
    cancel_responses: Mutex<VecDeque<ApiResult<()>>>,
    default_get: Mutex<Option<Prediction>>,
    requests: Mutex<Vec<CreatePredictionRequest>>,
    latency: Option<Duration>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl MockPredictionApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every create and get call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_create(&self, response: ApiResult<Prediction>) {
        push(&self.create_responses, response);
    }

    pub fn push_get(&self, response: ApiResult<Prediction>) {
        push(&self.get_responses, response);
    }

    pub fn push_cancel(&self, response: ApiResult<()>) {
        push(&self.cancel_responses, response);
    }

    /// Status reported once the get queue is empty; the id is replaced by the requested one
    pub fn set_default_get(&self, prediction: Prediction) {
        *self
            .default_get
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(prediction);
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Every create request received so far
    #[must_use]
    pub fn requests(&self) -> Vec<CreatePredictionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PredictionApi for MockPredictionApi {
    async fn create_prediction(&self, request: &CreatePredictionRequest) -> ApiResult<Prediction> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.simulate_latency().await;

        pop(&self.create_responses)
            .unwrap_or_else(|| Ok(Prediction::starting(format!("mock-prediction-{call}"))))
    }

    async fn get_prediction(&self, id: &str) -> ApiResult<Prediction> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(response) = pop(&self.get_responses) {
            return response;
        }
        let default = self
            .default_get
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(match default {
            Some(prediction) => Prediction {
                id: id.to_string(),
                ..prediction
            },
            None => Prediction::succeeded(id, MOCK_MASK_URL),
        })
    }

    async fn cancel_prediction(&self, _id: &str) -> ApiResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        pop(&self.cancel_responses).unwrap_or(Ok(()))
    }
}

/// Scripted mask download
#[derive(Debug)]
pub struct MockMaskFetcher {
    responses: Mutex<VecDeque<ApiResult<FetchedMask>>>,
    default_response: FetchedMask,
    urls: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockMaskFetcher {
    /// Serve `mask` as a PNG once the queue is empty
    #[must_use]
    pub fn new(mask: &RgbaImage) -> Self {
        Self::with_default(fetched_png(mask))
    }

    #[must_use]
    pub fn with_default(response: FetchedMask) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: response,
            urls: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: ApiResult<FetchedMask>) {
        push(&self.responses, response);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MaskFetcher for MockMaskFetcher {
    async fn fetch(&self, url: &str) -> ApiResult<FetchedMask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        pop(&self.responses).unwrap_or_else(|| Ok(self.default_response.clone()))
    }
}

/// Encode an RGBA image as PNG bytes
///
/// # Panics
///
/// Panics if the PNG encoder fails, which only happens for zero-sized images.
#[must_use]
pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("PNG encoding of an in-memory image");
    bytes
}

/// 200 response carrying `mask` as `image/png`
#[must_use]
pub fn fetched_png(mask: &RgbaImage) -> FetchedMask {
    FetchedMask {
        status: 200,
        content_type: Some("image/png".to_string()),
        body: encode_png(mask),
    }
}

/// White mask whose alpha falls off linearly from the center
///
/// Produces a soft matte with smooth gradients, which assesses as high quality.
#[must_use]
pub fn soft_circle_mask(width: u32, height: u32) -> RgbaImage {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let radius = (width.min(height) as f32 / 2.0).max(1.0);

    RgbaImage::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - center_x;
        let dy = y as f32 + 0.5 - center_y;
        let distance = (dx * dx + dy * dy).sqrt();
        let alpha = ((radius - distance) / radius).clamp(0.0, 1.0) * 255.0;
        Rgba([255, 255, 255, alpha.round() as u8])
    })
}
