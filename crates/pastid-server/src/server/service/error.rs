use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// A failed request as seen by the client.
///
/// Backend details never reach the response body; they are logged instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound,
    Unprocessable(String),
    Internal,
}

impl From<pastid::Error> for ApiError {
    fn from(err: pastid::Error) -> Self {
        match err {
            pastid::Error::InvalidPost { reason } => Self::Unprocessable(reason),
            pastid::Error::InvalidIdentifier { .. } => Self::NotFound,
            _e => {
                #[cfg(feature = "tracing")]
                tracing::error!("Request failed: {_e}");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Post not found".to_string()),
            Self::Unprocessable(reason) => (StatusCode::UNPROCESSABLE_ENTITY, reason),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
