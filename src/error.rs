//! Error types for the equation render cache

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for equation operations
pub type Result<T> = std::result::Result<T, EquationError>;

/// The document controller could not produce a fragment
#[derive(Debug, Clone, Error)]
#[error("Serialization error: {0}")]
pub struct SerializationError(pub String);

impl SerializationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Normalized markup is still not well-formed
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Malformed XML at byte {position}: {message}")]
    Malformed { position: usize, message: String },

    #[error("Unbound namespace prefix: {0}")]
    UnboundPrefix(String),

    #[error("Unclosed element: {0}")]
    Unclosed(String),

    #[error("Fragment has no root element")]
    NoRootElement,
}

/// The external renderer rejected the markup
#[derive(Debug, Clone, Error)]
#[error("Render error: {0}")]
pub struct RenderError(pub String);

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Persistence layer failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Session token could not be issued
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("OS random source unavailable: {0}")]
    Random(String),
}

/// Unified error type for freeze, normalize, render and storage operations
#[derive(Debug, Error)]
pub enum EquationError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Task join error: {0}")]
    Join(String),
}

/// HTTP-facing error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Equation(#[from] EquationError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Equation(EquationError::Parse(e)) => {
                tracing::error!("Error parsing MathML content: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "parse_error",
                    "Error parsing MathML content".to_string(),
                )
            }
            AppError::Equation(EquationError::Render(e)) => {
                tracing::error!("Error rendering MathML content: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "render_error",
                    format!("Error rendering MathML content: {}", e.0),
                )
            }
            AppError::Equation(EquationError::Storage(e)) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Storage error".to_string(),
                )
            }
            AppError::Equation(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response = AppError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_render_error_maps_to_500() {
        let err: EquationError = RenderError::new("bad glyph").into();
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_messages() {
        let err = EquationError::from(SerializationError::new("bad offset"));
        assert_eq!(err.to_string(), "Serialization error: bad offset");

        let err = EquationError::from(ParseError::UnboundPrefix("m".into()));
        assert_eq!(err.to_string(), "Unbound namespace prefix: m");
    }
}
