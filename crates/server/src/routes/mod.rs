use axum::{Router, middleware::from_fn_with_state};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{AppState, error::ApiError, middleware::maintenance_gate::maintenance_gate};

pub mod bouncer;
pub mod health;
pub mod maintenance;
pub mod studio;

pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::router(&state))
        .merge(maintenance::router(&state))
        .merge(bouncer::router(&state))
        .merge(studio::router(&state));

    let router = match state.static_dir.clone() {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(not_found),
    };

    router
        .layer(from_fn_with_state(state.clone(), maintenance_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
