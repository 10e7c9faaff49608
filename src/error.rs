use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Refresh-token and JWT failure kinds. All of them surface as 401; the
/// distinction matters for callers deciding whether re-authentication helps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Refresh token not found")]
    NotFound,
    #[error("Refresh token has been revoked")]
    Revoked,
    #[error("Refresh token has expired")]
    Expired,
    #[error("Invalid or expired token")]
    Invalid,
}

/// Domain error taxonomy, translated into HTTP exactly once (below).
/// No domain code branches on status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // A unique-index race on insert is a duplicate, not a server fault.
        if let sqlx::Error::Database(db) = &err {
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                return ApiError::Conflict("Value already registered".into());
            }
        }
        ApiError::Unexpected(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) | ApiError::Token(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Unexpected(e) => {
                error!(error = ?e, "unexpected error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ApiResponse::<()>::failure(message))).into_response()
    }
}

/// Uniform response envelope: `{success, message, data}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        })
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
            data: None,
        })
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            data: None,
        }
    }
}
