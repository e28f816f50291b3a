use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Unified error type for the whole service.
///
/// Every failure documented for the pipeline and the query path is a variant
/// here; the HTTP layer maps variants to statuses and stable codes in one
/// place (`IntoResponse` below). Ingestion-side variants normally never reach
/// a response — they end up in `sources.error_message` — but they still have
/// a mapping so an unexpected escape is not a panic.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload too large: limit is {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: u64 },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    #[error("no extractable content")]
    EmptyContent,
    #[error("robots.txt disallows {0}")]
    RobotsDenied(String),
    #[error("insufficient content: {got} chars, need {min}")]
    InsufficientContent { got: usize, min: usize },
    #[error("embedding failed on batch {batch_index}: {cause}")]
    EmbeddingFailed { batch_index: usize, cause: String },
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("prompt does not fit the model context window")]
    ContextOverflow,
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),
    #[error("rate limited, retry in {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },
    #[error("origin not allowed for this token")]
    DomainNotAllowed,
    #[error("token expired")]
    Expired,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ApiError::ValidationFailed(msg.into())
    }

    /// Stable machine-readable code for client switching.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationFailed(_) => "validation_failed",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::UnsupportedFormat(_) => "unsupported_format",
            ApiError::CorruptInput(_) => "corrupt_input",
            ApiError::EmptyContent => "empty_content",
            ApiError::RobotsDenied(_) => "robots_denied",
            ApiError::InsufficientContent { .. } => "insufficient_content",
            ApiError::EmbeddingFailed { .. } => "embedding_failed",
            ApiError::DimensionMismatch { .. } => "dimension_mismatch",
            ApiError::ContextOverflow => "context_overflow",
            ApiError::ProviderUnavailable(_) => "provider_unavailable",
            ApiError::ProviderRejected(_) => "provider_rejected",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::DomainNotAllowed => "domain_not_allowed",
            ApiError::Expired => "expired",
            ApiError::Cancelled => "cancelled",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::Expired => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden | ApiError::DomainNotAllowed => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::CorruptInput(_)
            | ApiError::EmptyContent
            | ApiError::RobotsDenied(_)
            | ApiError::InsufficientContent { .. }
            | ApiError::ContextOverflow => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ProviderUnavailable(_) | ApiError::EmbeddingFailed { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::ProviderRejected(_) | ApiError::DimensionMismatch { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Cancelled | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(json!({
            "status": "error",
            "code": self.code(),
            "message": self.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_s } = self {
            if let Ok(value) = retry_after_s.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_mapping_table() {
        assert_eq!(
            ApiError::ValidationFailed("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::DomainNotAllowed.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::RateLimited { retry_after_s: 12 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::ProviderUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::ContextOverflow.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ApiError::Expired.code(), "expired");
        assert_eq!(
            ApiError::EmbeddingFailed {
                batch_index: 3,
                cause: "boom".into()
            }
            .code(),
            "embedding_failed"
        );
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = ApiError::RateLimited { retry_after_s: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
