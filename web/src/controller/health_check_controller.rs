use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET /health
///
/// Liveness probe; does not touch the database.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}
