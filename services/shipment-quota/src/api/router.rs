use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    Router::new()
        .route("/api/quota/check", post(handlers::check_quota))
        .route("/api/quota/commit", post(handlers::commit_usage))
        .route(
            "/api/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/api/subscriptions/:subscriber_id/active",
            get(handlers::get_active_subscription),
        )
        .route("/api/scheduler/status", get(handlers::scheduler_status))
        .route("/api/scheduler/start", post(handlers::start_scheduler))
        .route("/api/scheduler/stop", post(handlers::stop_scheduler))
        .route("/api/scheduler/fire", post(handlers::fire_reset))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
