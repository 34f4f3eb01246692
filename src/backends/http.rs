//! reqwest-backed implementations of the remote service traits

use crate::config::PipelineConfig;
use crate::error::{Result, SegmentationError};
use crate::remote::{
    ApiFailure, CreatePredictionRequest, FetchedMask, MaskFetcher, Prediction, PredictionApi,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

type ApiResult<T> = std::result::Result<T, ApiFailure>;

const USER_AGENT: &str = concat!("segmask/", env!("CARGO_PKG_VERSION"));

/// Error payload returned by the prediction API
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    error: Option<String>,
    retry_after: Option<f64>,
}

fn build_client(config: &PipelineConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| {
            tracing::error!("Failed to create HTTP client: {e}");
            SegmentationError::network(
                "Unable to initialize the network connection. Please check your system configuration.",
            )
        })
}

fn transport_failure(error: &reqwest::Error) -> ApiFailure {
    ApiFailure::transport(error.to_string())
}

fn header_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// Turn a non-2xx response into an `ApiFailure`
async fn failure_from_response(response: Response) -> ApiFailure {
    let status = response.status();
    let header_hint = header_retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let message = body
        .detail
        .or(body.error)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });

    let retry_after = body
        .retry_after
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
        .or(header_hint);

    ApiFailure {
        status: status.as_u16(),
        message,
        retry_after,
    }
}

async fn parse_prediction(response: Response) -> ApiResult<Prediction> {
    if !response.status().is_success() {
        return Err(failure_from_response(response).await);
    }
    let status = response.status().as_u16();
    response.json::<Prediction>().await.map_err(|e| {
        warn!(status, "Malformed prediction response: {e}");
        ApiFailure::malformed_response(status)
    })
}

/// Prediction API over HTTPS with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpPredictionApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPredictionApi {
    /// Create an API client from the pipeline configuration
    ///
    /// # Errors
    /// - Failed to build the HTTP client
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl PredictionApi for HttpPredictionApi {
    async fn create_prediction(&self, request: &CreatePredictionRequest) -> ApiResult<Prediction> {
        let url = self.url("predictions");
        debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        parse_prediction(response).await
    }

    async fn get_prediction(&self, id: &str) -> ApiResult<Prediction> {
        let url = self.url(&format!("predictions/{id}"));
        debug!("GET {}", url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        parse_prediction(response).await
    }

    async fn cancel_prediction(&self, id: &str) -> ApiResult<()> {
        let url = self.url(&format!("predictions/{id}/cancel"));
        debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(failure_from_response(response).await)
        }
    }
}

/// Mask download over plain HTTPS GET
#[derive(Debug, Clone)]
pub struct HttpMaskFetcher {
    client: Client,
}

impl HttpMaskFetcher {
    /// # Errors
    /// - Failed to build the HTTP client
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl MaskFetcher for HttpMaskFetcher {
    async fn fetch(&self, url: &str) -> ApiResult<FetchedMask> {
        debug!("Downloading mask from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = if status == StatusCode::NO_CONTENT {
            Vec::new()
        } else {
            response
                .bytes()
                .await
                .map_err(|e| transport_failure(&e))?
                .to_vec()
        };

        Ok(FetchedMask {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
