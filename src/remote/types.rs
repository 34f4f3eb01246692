//! Wire types for the remote prediction API

use serde::{Deserialize, Serialize};

/// Lifecycle of a remote prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    /// Whether polling can stop
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Output of a succeeded prediction: one URL or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutput {
    Single(String),
    Many(Vec<String>),
}

/// One remote job as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PredictionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Prediction {
    /// Prediction in the `starting` state
    pub fn starting<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            status: PredictionStatus::Starting,
            output: None,
            error: None,
        }
    }

    /// Prediction in the `processing` state
    pub fn processing<S: Into<String>>(id: S) -> Self {
        Self {
            status: PredictionStatus::Processing,
            ..Self::starting(id)
        }
    }

    /// Succeeded prediction with a single URL output
    pub fn succeeded<S: Into<String>, U: Into<String>>(id: S, url: U) -> Self {
        Self {
            status: PredictionStatus::Succeeded,
            output: Some(PredictionOutput::Single(url.into())),
            ..Self::starting(id)
        }
    }

    /// Failed prediction with the service's error text
    pub fn failed<S: Into<String>, E: Into<String>>(id: S, error: E) -> Self {
        Self {
            status: PredictionStatus::Failed,
            error: Some(error.into()),
            ..Self::starting(id)
        }
    }

    /// The mask URL, if the output carries a non-empty one
    ///
    /// Array outputs yield their first element.
    #[must_use]
    pub fn mask_reference(&self) -> Option<&str> {
        let url = match self.output.as_ref()? {
            PredictionOutput::Single(url) => url.as_str(),
            PredictionOutput::Many(urls) => urls.first()?.as_str(),
        };
        let url = url.trim();
        (!url.is_empty()).then_some(url)
    }
}

/// Body of `POST /predictions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePredictionRequest {
    pub version: String,
    pub input: PredictionInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionInput {
    /// Image as a base64 data URL
    pub image: String,
}

impl CreatePredictionRequest {
    pub fn new<V: Into<String>, I: Into<String>>(version: V, image: I) -> Self {
        Self {
            version: version.into(),
            input: PredictionInput {
                image: image.into(),
            },
        }
    }
}

pub(crate) const MALFORMED_RESPONSE_MESSAGE: &str =
    "The background removal service sent an unexpected response. Please try again.";

/// Raw failure from a prediction API call, before classification
///
/// A `status` of `0` means no HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: u16,
    pub message: String,
    /// Seconds, from the response body or a `Retry-After` header
    pub retry_after: Option<u64>,
}

impl ApiFailure {
    pub fn new<S: Into<String>>(status: u16, message: S) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Transport failure with no HTTP response
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::new(0, message)
    }

    /// A successful response whose body could not be understood
    pub fn malformed_response(status: u16) -> Self {
        Self::new(status, MALFORMED_RESPONSE_MESSAGE)
    }

    #[must_use]
    pub fn is_malformed_response(&self) -> bool {
        self.message == MALFORMED_RESPONSE_MESSAGE
    }

    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiFailure {}

/// Response to a mask download
///
/// Non-2xx responses are returned as values; only transport failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMask {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}
