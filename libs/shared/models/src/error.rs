use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// A domain rule rejected the request. `code` is the stable machine
    /// readable identifier clients switch on.
    #[error("Rejected ({code}): {detail}")]
    Rejected { code: String, detail: String },

    #[error("Conflict ({code}): {detail}")]
    Conflict { code: String, detail: String },

    /// A referenced resource does not resolve, reported with a domain code.
    #[error("Unresolved ({code}): {detail}")]
    Unresolved { code: String, detail: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    pub fn rejected(code: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::Rejected {
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn conflict(code: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::Conflict {
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn unresolved(code: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::Unresolved {
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::Unresolved { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Rejected { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            AppError::Auth(_) => "not_authenticated",
            AppError::Forbidden(_) => "permission_denied",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Rejected { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Unresolved { code, .. } => code,
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "storage_error",
            AppError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    fn detail(&self) -> &str {
        match self {
            AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Internal(msg)
            | AppError::Database(msg)
            | AppError::ServiceUnavailable(msg) => msg,
            AppError::Rejected { detail, .. }
            | AppError::Conflict { detail, .. }
            | AppError::Unresolved { detail, .. } => detail,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, self.detail());
        } else {
            tracing::debug!("Request rejected: {}: {}", status, self.detail());
        }

        let body = Json(json!({
            "detail": self.detail(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
