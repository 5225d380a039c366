use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Error taxonomy for the recommendation & assistant runtime (spec §7).
///
/// `UnsafeQuery` and `UpstreamFailure` are intentionally never surfaced
/// through `ResponseError` on the assistant path: the pipeline catches them
/// and degrades to a fallback `AssistantResponse` before the HTTP boundary.
/// They still implement `ResponseError` so components outside that pipeline
/// (tests, future callers) get a sane status code if they ever do escape.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient interaction data for user {0}")]
    InsufficientData(String),

    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    #[error("service initializing")]
    ServiceInitializing,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unsafe query: {0}")]
    UnsafeQuery(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ModelNotAvailable(_) | AppError::ServiceInitializing => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::UnsafeQuery(_) | AppError::UpstreamFailure(_) => StatusCode::OK,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        // Internal details never leave the process; only the taxonomy-level message does.
        let message = match self {
            AppError::InternalError(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::UpstreamFailure(format!("database error: {err}"))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::UpstreamFailure(format!("cache error: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamFailure(format!("http client error: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("serialization error: {err}"))
    }
}
