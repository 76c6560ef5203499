use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::db::StoreError;

/// Failure of a single realtime operation. None of these are fatal to the
/// connection that triggered them, let alone to other connections.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl RealtimeError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a client. Store internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Persistence(_) => "Failed to persist change".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        if let Self::Persistence(ref e) = self {
            tracing::error!(error = %e, "Store call failed");
        }
        let body = Json(serde_json::json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}
