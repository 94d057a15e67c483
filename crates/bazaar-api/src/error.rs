use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

use bazaar_types::api::ApiResponse;

/// Failures surfaced by the REST handlers.
///
/// `Persistence` carries only the operation's public message; the
/// underlying error is logged where it is converted.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Persistence(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiResponse::failure(self.to_string()))).into_response()
    }
}

// Extractor rejections, so malformed requests still get the envelope.
// Used through `axum_extra::extract::WithRejection<_, ApiError>`.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                Self::Validation("Expected a JSON body (Content-Type: application/json)")
            }
            _ => Self::Validation("Invalid JSON body"),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        debug!("Rejected path: {}", rejection.body_text());
        Self::Validation("Invalid path parameter")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!("Rejected query string: {}", rejection.body_text());
        Self::Validation("Invalid query string")
    }
}

pub trait PersistenceExt<T> {
    /// Log the store error and replace it with a generic message.
    fn or_persistence(self, message: &'static str) -> Result<T, ApiError>;
}

impl<T> PersistenceExt<T> for anyhow::Result<T> {
    fn or_persistence(self, message: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {:#}", message, e);
            ApiError::Persistence(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_detail_is_not_leaked() {
        let err = Err::<(), _>(anyhow::anyhow!("disk I/O error at /var/db"))
            .or_persistence("Failed to send message")
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to send message");
    }

    #[test]
    fn statuses() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Validation("x").status(), StatusCode::BAD_REQUEST);
    }
}
