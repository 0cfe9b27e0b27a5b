use crate::error::AppError;
use axum::http::{Method, Uri};

/// Fallback for requests no controller claimed.
pub async fn not_found(method: Method, uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {method} {}", uri.path()))
}
