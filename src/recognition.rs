//! Client for the FatSecret image recognition endpoint.

use std::time::Duration;

use axum::body::Bytes;
use base64::Engine;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::config::DEFAULT_UPSTREAM_TIMEOUT;

/// Region sent upstream when the caller gives none.
pub const DEFAULT_REGION: &str = "US";
/// Language sent upstream when the caller gives none.
pub const DEFAULT_LANGUAGE: &str = "en";
/// Largest image accepted for recognition (10 MiB).
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const FALLBACK_ERROR_MESSAGE: &str = "Failed to process image";

/// Failures of a single recognition call.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognition API returned {status}: {message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Value,
    },
    #[error("recognition request timed out")]
    Timeout,
    #[error("recognition request failed: {0}")]
    Request(reqwest::Error),
}

impl From<reqwest::Error> for RecognitionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

/// A single image to recognize.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub image: Bytes,
    pub region: String,
    pub language: String,
}

impl RecognitionRequest {
    /// Builds a request, falling back to the default region and language when
    /// they are absent or blank.
    pub fn new(image: Bytes, region: Option<String>, language: Option<String>) -> Self {
        let or_default = |value: Option<String>, default: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            image,
            region: or_default(region, DEFAULT_REGION),
            language: or_default(language, DEFAULT_LANGUAGE),
        }
    }
}

#[derive(Debug, Serialize)]
struct RecognitionPayload<'a> {
    image_b64: String,
    include_food_data: bool,
    region: &'a str,
    language: &'a str,
}

impl<'a> From<&'a RecognitionRequest> for RecognitionPayload<'a> {
    fn from(request: &'a RecognitionRequest) -> Self {
        Self {
            image_b64: base64::engine::general_purpose::STANDARD.encode(&request.image),
            include_food_data: true,
            region: &request.region,
            language: &request.language,
        }
    }
}

/// Posts images to the recognition endpoint with a bearer token.
pub struct RecognitionClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RecognitionClient {
    /// Creates a client for `url` with the default 30 second timeout.
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Overrides the per-call upstream timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends the image upstream with a single attempt and returns the
    /// response body untouched.
    pub async fn recognize(
        &self,
        access_token: &str,
        request: &RecognitionRequest,
    ) -> Result<Value, RecognitionError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(access_token)
            .json(&RecognitionPayload::from(request))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        let details = serde_json::from_str(&body).unwrap_or(Value::String(body));
        let message = upstream_message(&details);

        Err(RecognitionError::Upstream {
            status,
            message,
            details,
        })
    }
}

/// Extracts `error.message` from an upstream error body.
fn upstream_message(details: &Value) -> String {
    details
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or(FALLBACK_ERROR_MESSAGE)
        .to_string()
}
