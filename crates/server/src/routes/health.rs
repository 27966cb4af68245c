use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use serde::{Deserialize, Serialize};
use utils::response::ApiResponse;

use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthInfo {
    pub maintenance: bool,
    pub version: String,
    /// Only reported when a studio backend is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio_backend: Option<bool>,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> ResponseJson<ApiResponse<HealthInfo>> {
    let studio_backend = match &state.studio {
        Some(studio) => Some(studio.client.health().await),
        None => None,
    };

    ResponseJson(ApiResponse::success(HealthInfo {
        maintenance: state.gate.config().enabled,
        version: env!("CARGO_PKG_VERSION").to_string(),
        studio_backend,
    }))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
