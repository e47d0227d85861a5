//! Error taxonomy shared by the orchestrators and the HTTP surface.
//!
//! Every fallible operation in the request path returns [`GatewayError`].
//! The HTTP layer maps each variant to one status code and the JSON error
//! body `{ "error": { "code": ..., "message": ... } }`.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown session, history row or document id.
    #[error("{0}")]
    NotFound(String),

    /// Unsupported file type, empty transcript, malformed request body.
    #[error("{0}")]
    InvalidInput(String),

    /// A wrapped engine is disabled or not configured.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// A wrapped engine did not answer within its stage timeout.
    #[error("{service} timed out after {secs}s")]
    ServiceTimeout { service: &'static str, secs: u64 },

    /// A wrapped engine returned an error or an unparseable response.
    #[error("{service} failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Classifies a transport error from one of the HTTP engine clients.
    pub fn from_reqwest(service: &'static str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ServiceTimeout {
                service,
                secs: timeout_secs,
            }
        } else if err.is_connect() {
            Self::ServiceUnavailable(format!("{} is not reachable: {}", service, err))
        } else {
            Self::upstream(service, err.to_string())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "bad_request",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ServiceTimeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl From<MultipartError> for GatewayError {
    fn from(err: MultipartError) -> Self {
        Self::InvalidInput(format!("Invalid multipart payload: {}", err.body_text()))
    }
}

/// Runs one pipeline stage under a deadline.
pub async fn with_timeout<T, F>(service: &'static str, secs: u64, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::ServiceTimeout { service, secs }),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), "request failed: {:#}", self);
        } else {
            tracing::debug!(code = self.code(), "request rejected: {}", self);
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::not_found("x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::invalid("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::unavailable("x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::upstream("generation", "boom").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Internal(anyhow::anyhow!("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_message_names_service() {
        let err = GatewayError::upstream("synthesis", "voice not found");
        assert_eq!(err.to_string(), "synthesis failed: voice not found");
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: GatewayResult<()> = with_timeout("transcription", 0, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        match result {
            Err(GatewayError::ServiceTimeout { service, .. }) => {
                assert_eq!(service, "transcription")
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
