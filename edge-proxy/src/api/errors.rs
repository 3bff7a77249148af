use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Body of every error the proxy answers with.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("unknown key {0}")]
    UnknownEnvironmentKey(String),
    #[error("feature '{0}' not found")]
    FeatureNotFound(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(String),
    #[error("{0}")]
    Unauthorized(String),
}

impl ProxyError {
    /// Returns (status label, status code) for this error.
    ///
    /// Single place mapping variants to HTTP, shared by the response body and logs.
    fn error_metadata(&self) -> (&'static str, u16) {
        match self {
            ProxyError::UnknownEnvironmentKey(_) => ("unauthorized", 401),
            ProxyError::Unauthorized(_) => ("unauthorized", 401),
            ProxyError::FeatureNotFound(_) => ("not_found", 404),
            ProxyError::RequestParsingError(_) => ("bad_request", 400),
            ProxyError::ValidationError(_) => ("validation_error", 422),
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> u16 {
        self.error_metadata().1
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        let body = ErrorResponse {
            status: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;
    use serde_json::{json, Value};

    async fn body_of(error: ProxyError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_key_body() {
        let (status, body) = body_of(ProxyError::UnknownEnvironmentKey("abc".to_string())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"status": "unauthorized", "message": "unknown key abc"}));
    }

    #[tokio::test]
    async fn test_feature_not_found_body() {
        let (status, body) = body_of(ProxyError::FeatureNotFound("feature_3".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"status": "not_found", "message": "feature 'feature_3' not found"})
        );
    }

    #[rstest]
    #[case(ProxyError::ValidationError("too long".to_string()), 422)]
    #[case(ProxyError::RequestParsingError("eof".to_string()), 400)]
    #[case(ProxyError::Unauthorized("bad token".to_string()), 401)]
    fn test_status_codes(#[case] error: ProxyError, #[case] expected: u16) {
        assert_eq!(error.status_code(), expected);
    }
}
