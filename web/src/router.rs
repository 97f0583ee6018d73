use crate::controller::{clerk_webhook_controller, health_check_controller};
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(webhook_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

// Identity provider webhooks authenticate with their Svix signature, not a session.
fn webhook_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/webhooks/clerk",
            post(clerk_webhook_controller::clerk_webhook),
        )
        .with_state(app_state)
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use service::config::Config;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        define_routes(AppState::new(Config::default(), &db))
    }

    #[tokio::test]
    async fn health_route_is_public() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_route_only_accepts_post() {
        let request = Request::builder()
            .method("GET")
            .uri("/webhooks/clerk")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
