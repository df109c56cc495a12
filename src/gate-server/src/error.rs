use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clearance_authz::{Clearance, Rejection, RejectionKind};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Turned away by the clearance gate
    #[error("{}: {}", .0.kind.error(), .0.reason)]
    Rejected(Rejection),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Insufficient clearance: required {required}, provided {provided}")]
    InsufficientClearance {
        required: Clearance,
        provided: Clearance,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Rejected(rejection) => {
                let status = match rejection.kind {
                    RejectionKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    RejectionKind::Forbidden => StatusCode::FORBIDDEN,
                };
                (status, json!(rejection.body()))
            }
            ApiError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "reason": reason }),
            ),
            ApiError::Forbidden(reason) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "reason": reason }),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal server error" }),
            ),
            ApiError::InsufficientClearance { required, provided } => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "insufficient clearance",
                    "required": required.to_string(),
                    "provided": provided.to_string(),
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
