//! Remote segmentation client
//!
//! Wraps a [`PredictionApi`] with the job lifecycle the pipeline needs: creation
//! with retry and backoff, status polling under a wall-clock bound, and best-effort
//! cancellation. All failures leave this module already classified as
//! [`SegmentationError`]s.

mod classify;
mod types;

pub use classify::{classify_failure, classify_job_failure};
pub(crate) use classify::NO_SUBJECT_MESSAGE;
pub use types::{
    ApiFailure, CreatePredictionRequest, FetchedMask, Prediction, PredictionInput,
    PredictionOutput, PredictionStatus,
};

use crate::config::PipelineConfig;
use crate::error::{Result, SegmentationError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const POLL_TIMEOUT_MESSAGE: &str =
    "Mask generation is taking longer than expected. Please try again.";
const POLL_FAILURE_MESSAGE: &str =
    "Lost contact with the background removal service. Please check your connection and try again.";

/// Largest backoff exponent, caps the delay at 64 seconds
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// HTTP contract of the prediction service
#[async_trait]
pub trait PredictionApi: Send + Sync + std::fmt::Debug {
    /// `POST /predictions`
    async fn create_prediction(
        &self,
        request: &CreatePredictionRequest,
    ) -> std::result::Result<Prediction, ApiFailure>;

    /// `GET /predictions/{id}`
    async fn get_prediction(&self, id: &str) -> std::result::Result<Prediction, ApiFailure>;

    /// `POST /predictions/{id}/cancel`
    async fn cancel_prediction(&self, id: &str) -> std::result::Result<(), ApiFailure>;
}

/// Fetches generated mask bytes
#[async_trait]
pub trait MaskFetcher: Send + Sync + std::fmt::Debug {
    /// Perform one GET; non-2xx statuses are returned, not raised
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedMask, ApiFailure>;
}

/// Race a future against a cancellation token
pub(crate) async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(SegmentationError::canceled()),
        output = future => Ok(output),
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... for attempt 0, 1, 2, ...
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Client for asynchronous background-removal jobs
#[derive(Debug)]
pub struct RemoteSegmentationClient {
    api: Arc<dyn PredictionApi>,
    model_version: String,
    poll_interval: Duration,
    poll_transient_retries: u32,
}

impl RemoteSegmentationClient {
    #[must_use]
    pub fn new(api: Arc<dyn PredictionApi>, config: &PipelineConfig) -> Self {
        Self {
            api,
            model_version: config.model_version.clone(),
            poll_interval: config.poll_interval,
            poll_transient_retries: config.poll_transient_retries,
        }
    }

    /// Submit a prediction for a data-URL image
    ///
    /// Makes at most `max_retries` attempts (minimum one). Non-retryable failures
    /// return immediately; rate-limit responses wait for the server's hint, other
    /// retryable failures back off exponentially. Cancellation interrupts both the
    /// request and the waits.
    ///
    /// # Errors
    /// - The last classified failure once attempts are exhausted
    /// - A non-retryable classified failure
    /// - The canceled error when `cancel` fires
    #[instrument(skip(self, image_data, cancel), fields(model = %self.model_version))]
    pub async fn create_job(
        &self,
        image_data: &str,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Prediction> {
        let attempts = max_retries.max(1);
        let request = CreatePredictionRequest::new(self.model_version.as_str(), image_data);

        let mut attempt = 0;
        loop {
            let failure = match until_cancelled(cancel, self.api.create_prediction(&request)).await? {
                Ok(prediction) => {
                    info!(prediction_id = %prediction.id, status = %prediction.status, "Created prediction");
                    return Ok(prediction);
                }
                Err(failure) => failure,
            };

            let error = classify_failure(&failure);
            attempt += 1;

            if !error.is_retryable() {
                warn!(status = failure.status, "Prediction rejected: {}", failure.message);
                return Err(error);
            }
            if attempt >= attempts {
                warn!(attempts, status = failure.status, "Prediction creation failed after all attempts");
                return Err(error);
            }

            let delay = error
                .retry_after()
                .map_or_else(|| backoff_delay(attempt - 1), Duration::from_secs);
            warn!(
                attempt,
                status = failure.status,
                delay_ms = delay.as_millis() as u64,
                "Prediction creation failed, retrying"
            );
            until_cancelled(cancel, tokio::time::sleep(delay)).await?;
        }
    }

    /// Fetch the current state of a prediction
    ///
    /// # Errors
    ///
    /// Returns the classified API failure
    pub async fn get_job(&self, id: &str) -> Result<Prediction> {
        self.api
            .get_prediction(id)
            .await
            .map_err(|failure| classify_failure(&failure))
    }

    /// Ask the service to cancel a prediction
    ///
    /// Best effort: a 404 means the job already finished, and any other failure is
    /// logged and swallowed.
    pub async fn cancel_job(&self, id: &str) {
        match self.api.cancel_prediction(id).await {
            Ok(()) => info!(prediction_id = id, "Canceled prediction"),
            Err(failure) if failure.status == 404 => {
                debug!(prediction_id = id, "Prediction already finished, nothing to cancel");
            }
            Err(failure) => {
                warn!(prediction_id = id, status = failure.status, "Failed to cancel prediction: {}", failure.message);
            }
        }
    }

    /// Poll until the prediction reaches a terminal state and return the mask URL
    ///
    /// Polls once per interval. The whole loop, in-flight requests included, is
    /// bounded by `timeout`.
    ///
    /// # Errors
    /// - `Timeout` when `timeout` elapses
    /// - `RemoteService` "No subject detected" for a success without output
    /// - The classified job error for `failed`, the canceled error for `canceled`
    /// - `Network` after too many consecutive transient poll failures
    #[instrument(skip(self, cancel))]
    pub async fn poll_until_done(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match tokio::time::timeout(timeout, self.poll_loop(id, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(prediction_id = id, timeout_ms = timeout.as_millis() as u64, "Polling timed out");
                Err(SegmentationError::timeout(POLL_TIMEOUT_MESSAGE))
            }
        }
    }

    async fn poll_loop(&self, id: &str, cancel: &CancellationToken) -> Result<String> {
        let mut transient_failures = 0u32;

        loop {
            let mut delay = self.poll_interval;

            match until_cancelled(cancel, self.api.get_prediction(id)).await? {
                Ok(prediction) => {
                    transient_failures = 0;
                    match prediction.status {
                        PredictionStatus::Succeeded => {
                            return match prediction.mask_reference() {
                                Some(url) => {
                                    debug!(prediction_id = id, "Prediction succeeded");
                                    Ok(url.to_string())
                                }
                                None => {
                                    warn!(prediction_id = id, "Prediction succeeded without output");
                                    Err(SegmentationError::remote_service(NO_SUBJECT_MESSAGE, false))
                                }
                            };
                        }
                        PredictionStatus::Failed => {
                            warn!(prediction_id = id, "Prediction failed: {:?}", prediction.error);
                            return Err(classify_job_failure(prediction.error.as_deref()));
                        }
                        PredictionStatus::Canceled => {
                            info!(prediction_id = id, "Prediction was canceled remotely");
                            return Err(SegmentationError::canceled());
                        }
                        PredictionStatus::Starting | PredictionStatus::Processing => {
                            debug!(prediction_id = id, status = %prediction.status, "Prediction pending");
                        }
                    }
                }
                Err(failure) => {
                    let error = classify_failure(&failure);
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    transient_failures += 1;
                    if transient_failures > self.poll_transient_retries {
                        warn!(prediction_id = id, transient_failures, "Giving up on polling");
                        return Err(SegmentationError::network(POLL_FAILURE_MESSAGE));
                    }
                    if let Some(secs) = error.retry_after() {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    debug!(prediction_id = id, status = failure.status, transient_failures, "Transient poll failure");
                }
            }

            until_cancelled(cancel, tokio::time::sleep(delay)).await?;
        }
    }
}
