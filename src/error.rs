//! Errors surfaced by the HTTP handlers and their JSON rendering.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::{recognition::RecognitionError, token::TokenError};

/// Every way a proxied request can fail, mapped to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upload had no usable `image` field, or was not multipart at all.
    #[error("No image file provided")]
    MissingImage,
    /// The image is larger than the upload limit.
    #[error("Image exceeds the {limit} byte upload limit")]
    ImageTooLarge { limit: usize },
    /// The multipart body could not be read.
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    /// The token endpoint refused or returned garbage.
    #[error("Failed to authenticate with FatSecret API")]
    Authentication(#[from] TokenError),
    /// The recognition API answered with a non-2xx status.
    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Value,
    },
    /// The recognition API did not answer in time.
    #[error("Image processing took too long")]
    Timeout,
    /// Any other failure.
    #[error("{0}")]
    Internal(String),
}

impl From<RecognitionError> for ProxyError {
    fn from(err: RecognitionError) -> Self {
        match err {
            RecognitionError::Upstream {
                status,
                message,
                details,
            } => Self::Upstream {
                status,
                message,
                details,
            },
            RecognitionError::Timeout => Self::Timeout,
            RecognitionError::Request(e) => Self::Internal(e.to_string()),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Error body without upstream details.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }
}

impl ProxyError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingImage => StatusCode::BAD_REQUEST,
            Self::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart(e) => e.status(),
            Self::Upstream { status, .. } => *status,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Authentication(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::MissingImage => ErrorBody::new("No image file provided", "Please upload an image file"),
            Self::ImageTooLarge { .. } => ErrorBody::new("Image too large", self.to_string()),
            Self::Multipart(e) => ErrorBody::new("Invalid upload", e.body_text()),
            Self::Upstream {
                message, details, ..
            } => ErrorBody {
                error: "FatSecret API Error".to_string(),
                message,
                details: Some(details),
            },
            Self::Timeout => ErrorBody::new("Request Timeout", self.to_string()),
            Self::Authentication(_) | Self::Internal(_) => {
                ErrorBody::new("Internal Server Error", self.to_string())
            }
        };

        (status, Json(body)).into_response()
    }
}
