//! Caller-facing error taxonomy.
//!
//! Every handler error ends up as one of these variants. The public message is
//! the only thing a caller ever sees; internal causes are logged and dropped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input from the caller (bad identifiers, bad ban durations).
    #[error("{0}")]
    Client(String),

    /// Well-formed input that violates a rule (duplicates, password length).
    #[error("{0}")]
    Validation(String),

    /// Missing or unusable claims, or an actor without the required privilege.
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: source.into(),
        }
    }

    /// True for failures caused by the caller, which are safe to return as-is.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// Keep caller errors untouched and replace the public message of anything
    /// else, retaining the original cause for diagnostics.
    #[must_use]
    pub fn classify(self, message: &str) -> Self {
        match self {
            Self::Internal { source, .. } => Self::Internal {
                message: message.to_string(),
                source,
            },
            other => other,
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Client(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub msg: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal { message, source } = &self {
            error!(error = ?source, "{message}");
        }
        let body = ErrorBody {
            code: status.as_u16(),
            msg: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classify_keeps_caller_errors() {
        let err = Error::client("Invalid format for ban_duration").classify("Error updating user");
        assert!(matches!(err, Error::Client(ref msg) if msg == "Invalid format for ban_duration"));

        let err = Error::validation("too short").classify("Error updating user");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn classify_hides_internal_detail() {
        let err = Error::internal("relation users does not exist", anyhow!("pg: 42P01"))
            .classify("Error updating user");
        assert_eq!(err.to_string(), "Error updating user");
        match err {
            Error::Internal { source, .. } => assert_eq!(source.to_string(), "pg: 42P01"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::client("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::validation("x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(Error::auth("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::internal("x", anyhow!("y")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_response_does_not_echo_cause() {
        let response = Error::internal("Database error", anyhow!("password=hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("Database error"));
        assert!(!body.contains("hunter2"));
    }
}
