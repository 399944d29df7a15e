//! Liveness endpoint.

use axum::http::StatusCode;

/// `GET /health`: 200 with body `OK` while the process serves requests.
///
/// Does not touch the store or the provider, so a slow upstream never fails
/// a liveness probe.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        assert_eq!(health_handler().await, (StatusCode::OK, "OK"));
    }
}
