//! Error handling, classification and boundary conditions
//!
//! Covers the error taxonomy callers rely on for UI decisions and the edge cases of
//! input checks, configuration, caching and mask validation.

use image::{Rgba, RgbaImage};
use segmask::{
    error::{is_actionable, GENERIC_ERROR_MESSAGE, MAX_MESSAGE_LEN},
    input::{MAX_IMAGE_BYTES, MIN_IMAGE_BYTES},
    remote::{classify_failure, classify_job_failure},
    sanitize_message, soft_circle_mask, ApiFailure, CacheConfig, ErrorKind, MaskCache,
    MaskProcessor, PipelineConfig, RefineOptions, SegmentationError,
    validate_image_data,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_failure_classification_table() {
    let cases: &[(u16, &str, ErrorKind, bool)] = &[
        (429, "slow down", ErrorKind::RemoteService, true),
        (0, "connection refused", ErrorKind::Network, true),
        (500, "internal", ErrorKind::Network, true),
        (503, "maintenance", ErrorKind::Network, true),
        (401, "unauthorized", ErrorKind::RemoteService, false),
        (403, "forbidden", ErrorKind::RemoteService, false),
        (422, "No subject found in image", ErrorKind::RemoteService, false),
        (400, "bad input", ErrorKind::RemoteService, false),
        (408, "request timed out", ErrorKind::Timeout, true),
        (409, "model overloaded", ErrorKind::RemoteService, true),
        (418, "something odd happened", ErrorKind::RemoteService, false),
    ];

    for &(status, message, kind, retryable) in cases {
        let err = classify_failure(&ApiFailure::new(status, message));
        assert_eq!(err.kind(), kind, "status {status} '{message}'");
        assert_eq!(err.is_retryable(), retryable, "status {status} '{message}'");
        assert!(is_actionable(err.message()), "status {status}: {}", err.message());
    }
}

#[test]
fn test_rate_limit_outranks_message_heuristics() {
    let err = classify_failure(&ApiFailure::new(429, "no subject, timed out").with_retry_after(9));
    assert_eq!(err.kind(), ErrorKind::RemoteService);
    assert_eq!(err.retry_after(), Some(9));

    // Server errors stay network-class whatever the body says
    let err = classify_failure(&ApiFailure::new(502, "empty response"));
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[test]
fn test_job_failure_classification() {
    let err = classify_job_failure(Some("Nothing detected in the input"));
    assert!(err.message().contains("No subject detected"));
    assert!(!err.is_retryable());

    assert_eq!(classify_job_failure(Some("Prediction timed out")).kind(), ErrorKind::Timeout);

    let err = classify_job_failure(None);
    assert_eq!(err.kind(), ErrorKind::RemoteService);
    assert!(err.is_retryable());
    assert_eq!(err.message(), GENERIC_ERROR_MESSAGE);
}

#[test]
fn test_sanitize_message_edge_cases() {
    assert_eq!(sanitize_message(""), GENERIC_ERROR_MESSAGE);
    assert_eq!(sanitize_message("   \n\n  "), GENERIC_ERROR_MESSAGE);
    assert_eq!(sanitize_message("Error: null"), GENERIC_ERROR_MESSAGE);
    assert_eq!(sanitize_message("[object Object] failed"), GENERIC_ERROR_MESSAGE);
    assert_eq!(
        sanitize_message("Error: TypeError: network connection lost\n  at fetch (x.js:1:1)"),
        "Network connection lost"
    );
    assert_eq!(sanitize_message("\n\nmodel is warming up"), "Model is warming up");
}

#[test]
fn test_error_messages_are_bounded_and_actionable() {
    let long = format!("The upstream service said {}", "blah ".repeat(100));
    for err in [
        SegmentationError::remote_service(&long, true),
        SegmentationError::network("socket closed unexpectedly"),
        SegmentationError::download(""),
        SegmentationError::validation("Please upload an image."),
    ] {
        assert!(err.message().chars().count() <= MAX_MESSAGE_LEN, "{err:?}");
        assert!(is_actionable(err.message()), "{err:?}");
    }
    // Already actionable messages pass through untouched
    assert_eq!(
        SegmentationError::validation("Please upload an image.").message(),
        "Please upload an image."
    );
}

#[test]
fn test_error_kind_serialization() {
    assert_eq!(serde_json::to_string(&ErrorKind::RemoteService).unwrap(), "\"remote-service\"");
    assert_eq!(serde_json::to_string(&ErrorKind::Timeout).unwrap(), "\"timeout\"");
}

#[test]
fn test_input_size_boundaries() {
    let data_url = |payload_len: usize| format!("data:image/png;base64,{}", "A".repeat(payload_len));

    // 136 base64 chars decode to ~102 bytes, 132 to ~99
    assert!(validate_image_data(&data_url(136)).is_ok());
    assert!(validate_image_data(&data_url(132)).is_err());
    assert!(validate_image_data(&data_url(MIN_IMAGE_BYTES / 3 * 4)).is_err());

    let largest_ok = MAX_IMAGE_BYTES / 3 * 4;
    assert!(validate_image_data(&data_url(largest_ok)).is_ok());
    assert!(validate_image_data(&data_url(largest_ok + 8)).is_err());
}

#[test]
fn test_input_rejects_multiple_commas_and_missing_base64_marker() {
    let payload = "A".repeat(400);
    for input in [
        format!("data:image/png;base64,{payload},{payload}"),
        format!("data:image/png,{payload}"),
        format!("data:image/png;charset=utf-8,{payload}"),
    ] {
        let err = validate_image_data(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("malformed"), "{}", err.message());
    }
}

#[test]
fn test_config_validation_edge_cases() {
    let config = PipelineConfig::builder().max_retries(0).build().unwrap();
    assert_eq!(config.max_retries, 1);

    assert!(PipelineConfig::builder().cache_max_entries(0).build().is_err());
    assert!(PipelineConfig::builder()
        .poll_interval(Duration::ZERO)
        .build()
        .is_err());
    assert!(PipelineConfig::builder()
        .poll_interval(Duration::from_secs(10))
        .poll_timeout(Duration::from_secs(5))
        .build()
        .is_err());
    assert!(PipelineConfig::builder().max_mask_dimension(0).build().is_err());
    assert!(PipelineConfig::builder().model_version("  ").build().is_err());

    let err = PipelineConfig::builder().api_base_url("").build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_config_serialization_hides_token() {
    let config = PipelineConfig::builder()
        .api_token("secret-token-value")
        .build()
        .unwrap();
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("secret-token-value"));
    assert!(json.contains("\"poll_interval\":1000"));
}

#[test]
fn test_cache_capacity_one() {
    let mut cache = MaskCache::new(CacheConfig {
        max_entries: 1,
        ttl: Duration::from_secs(60),
    });
    cache.set("a", 1);
    cache.set("a", 2);
    assert_eq!(cache.size(), 1);
    assert_eq!(cache.get("a"), Some(2));

    cache.set("b", 3);
    assert_eq!(cache.size(), 1);
    assert!(!cache.has("a"));
    assert_eq!(cache.get("b"), Some(3));
}

#[test]
fn test_cache_miss_accounting() {
    let mut cache: MaskCache<u32> = MaskCache::new(CacheConfig {
        max_entries: 4,
        ttl: Duration::from_secs(60),
    });
    assert_eq!(cache.get("missing"), None);
    assert!(!cache.remove("missing"));

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (0, 1));
    assert!(stats.hit_rate().abs() < f64::EPSILON);

    // has() is not a lookup
    assert!(!cache.has("missing"));
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_validate_empty_and_degenerate_masks() {
    let processor = MaskProcessor::inline();

    let report = processor.validate(Arc::new(RgbaImage::new(0, 0)), None).await;
    assert!(!report.is_valid);
    assert!(report.first_error().unwrap().contains("empty"));

    let transparent = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 0]));
    let report = processor.validate(Arc::new(transparent), None).await;
    assert!(!report.is_valid);
    assert!(report.first_error().unwrap().contains("fully transparent"));

    let opaque = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
    let report = processor.validate(Arc::new(opaque), None).await;
    assert!(!report.is_valid);
    assert!(!report.has_alpha_channel);
}

#[tokio::test]
async fn test_dimension_mismatch_reports_both_sizes() {
    let processor = MaskProcessor::inline();
    let report = processor
        .validate(Arc::new(soft_circle_mask(30, 20)), Some((60, 40)))
        .await;

    assert!(!report.is_valid);
    let error = report.first_error().unwrap();
    assert!(error.starts_with("Dimension mismatch"));
    assert!(error.contains("30x20") && error.contains("60x40"));
}

#[tokio::test]
async fn test_refine_leaves_input_untouched() {
    let processor = MaskProcessor::inline();
    let mask = Arc::new(soft_circle_mask(24, 24));
    let before = mask.as_ref().clone();

    let refined = processor
        .refine(&mask, &RefineOptions::new().blur(2.0).dilate(1).threshold(100))
        .await;

    assert_eq!(*mask, before);
    assert_eq!(refined.dimensions(), (24, 24));
    assert!(refined.pixels().all(|p| p[3] == 0 || p[3] == 255));

    let unchanged = processor.refine(&mask, &RefineOptions::new()).await;
    assert!(Arc::ptr_eq(&unchanged, &mask));
}

#[test]
fn test_decoder_errors_never_reach_the_caller() {
    let raw_failures = [
        "Malformed prediction response: missing field `id` at line 1 column 22",
        "invalid type: integer `3`, expected a string at line 1 column 9",
        "error decoding response body: serde_json::Error",
    ];

    for raw in raw_failures {
        let err = classify_failure(&ApiFailure::new(200, raw));
        let message = err.message();
        assert!(!message.contains('`'), "{message}");
        assert!(!message.contains("column"), "{message}");
        assert!(!message.contains("::"), "{message}");
        assert!(is_actionable(message), "{message}");
    }

    let err = classify_failure(&ApiFailure::malformed_response(201));
    assert!(err.is_retryable());
    assert!(!err.message().contains("Malformed"));
}

#[tokio::test]
async fn test_refine_with_oversized_blur_radius() {
    let processor = MaskProcessor::inline();
    let mask = Arc::new(soft_circle_mask(16, 12));

    let refined = processor
        .refine(&mask, &RefineOptions::new().blur(3.0e9))
        .await;

    assert_eq!(refined.dimensions(), (16, 12));
    let first = refined.get_pixel(0, 0)[3];
    assert!(refined.pixels().all(|p| p[3] == first));
}
