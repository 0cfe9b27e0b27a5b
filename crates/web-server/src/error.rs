use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use database::{DbError, ErrorKind};
use serde_json::json;
use thiserror::Error;

/// Errors returned by request handlers. Rendered as `{ "error": "..." }`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Errors raised while configuring or running the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid server configuration: {0}")]
    Config(String),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Server terminated with an error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(db_err) => match db_err.kind() {
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
                ErrorKind::Connection | ErrorKind::Cancelled => {
                    tracing::warn!(error = ?db_err, "Database unavailable.");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "The database is currently unavailable".to_string(),
                    )
                }
                _ => {
                    tracing::error!(error = ?db_err, "Database error.");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An internal database error occurred".to_string(),
                    )
                }
            },
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
