//! Mapping raw API failures onto the user-facing error taxonomy

use super::types::ApiFailure;
use crate::error::SegmentationError;

pub(crate) const NO_SUBJECT_MESSAGE: &str =
    "No subject detected in this image. Please upload a photo with a clear foreground subject.";

const RATE_LIMIT_MESSAGE: &str = "Too many requests right now. Please wait a moment and try again.";
const UNREACHABLE_MESSAGE: &str =
    "Unable to reach the background removal service. Please check your connection and try again.";
const UNAVAILABLE_MESSAGE: &str =
    "The background removal service is temporarily unavailable. Please try again in a moment.";
const AUTH_MESSAGE: &str =
    "The background removal service rejected our credentials. Please check the API token configuration.";
const BAD_REQUEST_MESSAGE: &str =
    "The image could not be processed. Please upload a different JPEG, PNG, or WebP image.";
const REMOTE_TIMEOUT_MESSAGE: &str =
    "The background removal service took too long to respond. Please try again.";
const BUSY_MESSAGE: &str =
    "The background removal service is at capacity. Please try again in a few moments.";

const NO_SUBJECT_MARKERS: &[&str] = &["no subject", "no foreground", "empty", "nothing detected"];
const BUSY_MARKERS: &[&str] = &["capacity", "overloaded"];

/// Classify a failed API call
///
/// Rules apply in priority order: rate limiting, missing or 5xx responses,
/// authentication, no-subject messages, bad requests, then message heuristics.
#[must_use]
pub fn classify_failure(failure: &ApiFailure) -> SegmentationError {
    let status = failure.status;

    if status == 429 {
        return SegmentationError::rate_limited(RATE_LIMIT_MESSAGE, failure.retry_after);
    }
    if failure.is_malformed_response() {
        return SegmentationError::remote_service(&failure.message, true);
    }
    if status == 0 {
        return SegmentationError::network(UNREACHABLE_MESSAGE);
    }
    if status >= 500 {
        return SegmentationError::network(UNAVAILABLE_MESSAGE);
    }
    if status == 401 || status == 403 {
        return SegmentationError::remote_service(AUTH_MESSAGE, false);
    }

    let lower = failure.message.to_lowercase();
    if contains_any(&lower, NO_SUBJECT_MARKERS) {
        return SegmentationError::remote_service(NO_SUBJECT_MESSAGE, false);
    }
    if status == 400 {
        return SegmentationError::remote_service(BAD_REQUEST_MESSAGE, false);
    }

    classify_by_message(&lower)
        .unwrap_or_else(|| SegmentationError::remote_service(&failure.message, status >= 500))
}

/// Classify the error text of a prediction that ended in `failed`
///
/// Unrecognized failures are treated as retryable since the job itself may succeed
/// on a second attempt.
#[must_use]
pub fn classify_job_failure(message: Option<&str>) -> SegmentationError {
    let raw = message.unwrap_or_default();
    let lower = raw.to_lowercase();

    if contains_any(&lower, NO_SUBJECT_MARKERS) {
        return SegmentationError::remote_service(NO_SUBJECT_MESSAGE, false);
    }
    classify_by_message(&lower).unwrap_or_else(|| SegmentationError::remote_service(raw, true))
}

fn classify_by_message(lower: &str) -> Option<SegmentationError> {
    if lower.contains("timeout") || lower.contains("timed out") {
        return Some(SegmentationError::timeout(REMOTE_TIMEOUT_MESSAGE));
    }
    if contains_any(lower, BUSY_MARKERS) {
        return Some(SegmentationError::remote_service(BUSY_MESSAGE, true));
    }
    None
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
