//! Configuration types for the mask generation pipeline

use crate::error::{Result, SegmentationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base URL of the remote prediction API
pub const DEFAULT_API_BASE_URL: &str = "https://api.replicate.com/v1";

/// Default background-removal model version
pub const DEFAULT_MODEL_VERSION: &str =
    "fb8af171cfa1616ddcf1242c093f9c46bcada5ad4cf6f2fbe8b81b330ec5c003";

/// Environment variable holding the API token
pub const API_TOKEN_ENV: &str = "SEGMASK_API_TOKEN";
/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "SEGMASK_API_URL";
/// Environment variable overriding the model version
pub const MODEL_VERSION_ENV: &str = "SEGMASK_MODEL_VERSION";

/// Where heavy pixel scans run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// On the calling task
    Inline,
    /// On the blocking worker pool, falling back to inline on failure
    #[default]
    Worker,
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Mask cache tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached masks
    pub max_entries: usize,
    /// Entries older than this are never returned
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 30,
            ttl: Duration::from_millis(7_200_000),
        }
    }
}

/// Configuration for the mask generation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the prediction API
    pub api_base_url: String,
    /// Bearer token for the prediction API
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Model version submitted with every prediction
    pub model_version: String,
    /// Attempts for prediction creation
    pub max_retries: u32,
    /// Delay between status polls
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Wall-clock bound for polling one prediction
    #[serde(with = "duration_millis")]
    pub poll_timeout: Duration,
    /// Transient poll failures tolerated before giving up
    pub poll_transient_retries: u32,
    /// Retries for the mask download
    pub download_retries: u32,
    /// Bound for decoding the downloaded mask; enforced with the worker analyzer only
    #[serde(with = "duration_millis")]
    pub image_load_timeout: Duration,
    /// Largest accepted mask width or height
    pub max_mask_dimension: u32,
    /// Per-request HTTP timeout
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Mask cache tunables
    pub cache: CacheConfig,
    /// Whether results are served from and stored in the cache
    pub cache_enabled: bool,
    /// Whether `prefetch` does anything
    pub prefetch_enabled: bool,
    /// Where heavy pixel scans run
    pub analyzer: AnalyzerKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(45),
            poll_transient_retries: 3,
            download_retries: 2,
            image_load_timeout: Duration::from_secs(30),
            max_mask_dimension: 10_000,
            request_timeout: Duration::from_secs(60),
            cache: CacheConfig::default(),
            cache_enabled: true,
            prefetch_enabled: true,
            analyzer: AnalyzerKind::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Defaults overlaid with `SEGMASK_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(token) = std::env::var(API_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.api_token = Some(token.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(version) = std::env::var(MODEL_VERSION_ENV) {
            if !version.trim().is_empty() {
                config.model_version = version.trim().to_string();
            }
        }
        config
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Zero cache capacity
    /// - Zero poll interval, or a poll timeout shorter than the interval
    /// - Zero mask dimension bound
    /// - Empty API base URL or model version
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(SegmentationError::validation(
                "Cache size must be at least 1. Please check the pipeline configuration.",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SegmentationError::validation(
                "Poll interval must be positive. Please check the pipeline configuration.",
            ));
        }
        if self.poll_timeout < self.poll_interval {
            return Err(SegmentationError::validation(
                "Poll timeout must not be shorter than the poll interval. Please check the pipeline configuration.",
            ));
        }
        if self.max_mask_dimension == 0 {
            return Err(SegmentationError::validation(
                "Maximum mask dimension must be positive. Please check the pipeline configuration.",
            ));
        }
        if self.api_base_url.trim().is_empty() || self.model_version.trim().is_empty() {
            return Err(SegmentationError::validation(
                "API address and model version are required. Please check the pipeline configuration.",
            ));
        }
        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// Start from the environment-derived configuration
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            config: PipelineConfig::from_env(),
        }
    }

    #[must_use]
    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn api_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn model_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.model_version = version.into();
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries.max(1);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn poll_transient_retries(mut self, retries: u32) -> Self {
        self.config.poll_transient_retries = retries;
        self
    }

    #[must_use]
    pub fn download_retries(mut self, retries: u32) -> Self {
        self.config.download_retries = retries;
        self
    }

    #[must_use]
    pub fn image_load_timeout(mut self, timeout: Duration) -> Self {
        self.config.image_load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_mask_dimension(mut self, dimension: u32) -> Self {
        self.config.max_mask_dimension = dimension;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    #[must_use]
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    #[must_use]
    pub fn prefetch_enabled(mut self, enabled: bool) -> Self {
        self.config.prefetch_enabled = enabled;
        self
    }

    #[must_use]
    pub fn analyzer(mut self, analyzer: AnalyzerKind) -> Self {
        self.config.analyzer = analyzer;
        self
    }

    /// Build the pipeline configuration
    ///
    /// # Errors
    ///
    /// Returns `SegmentationError::Validation` when [`PipelineConfig::validate`] fails
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
