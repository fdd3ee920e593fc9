use axum::http::StatusCode;

/// Liveness probe for load balancers
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
