use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors answered at the request boundary. The body is always
/// `{"error": "<display text>"}`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Message cannot be empty")]
    EmptyMessage,
    /// The store could not durably write the new message.
    #[error("Failed to save message")]
    PersistFailure,
    #[error("Template error")]
    Template,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson | ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::PersistFailure | ApiError::Template => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::EmptyMessage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::PersistFailure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Template.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_body_is_error_object() {
        let res = ApiError::EmptyMessage.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Message cannot be empty" }));
    }
}
