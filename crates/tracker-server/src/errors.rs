//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracker_log::LogError;

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Session log or frame storage failure.
    #[error(transparent)]
    Log(#[from] LogError),
    /// A path segment did not name anything.
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Log(LogError::NoSession | LogError::FrameNotFound(_)) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Log(LogError::InvalidFrameId(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Log(LogError::SessionExists(_)) => StatusCode::CONFLICT,
            Self::Log(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({ "success": false, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::from(LogError::NoSession).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(LogError::FrameNotFound("1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(LogError::InvalidFrameId("..".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(LogError::SessionExists("s".into())).status(),
            StatusCode::CONFLICT
        );
        let io = std::io::Error::other("disk");
        assert_eq!(
            ApiError::from(LogError::from(io)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn body_carries_message() {
        let resp = ApiError::BadRequest("label required".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["message"], "bad request: label required");
    }
}
