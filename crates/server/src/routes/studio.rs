use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::{get, post},
};
use services::services::{
    generation::GenerationOutcome,
    identity::forwarded_headers,
    studio_api::{GenerateForm, MeResponse},
};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, state::StudioBackend};

fn backend(state: &AppState) -> Result<&StudioBackend, ApiError> {
    state.studio.as_ref().ok_or(ApiError::StudioUnavailable)
}

/// POST /api/studio/generate
/// Generate text and run it through the bouncer, on behalf of the caller's identity
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<GenerateForm>,
) -> Result<ResponseJson<ApiResponse<GenerationOutcome>>, ApiError> {
    let extra = forwarded_headers(&headers);
    let outcome = backend(&state)?.pipeline.run(&form, &extra).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

/// GET /api/studio/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ResponseJson<ApiResponse<MeResponse>>, ApiError> {
    let me = backend(&state)?.client.me(forwarded_headers(&headers)).await?;
    Ok(ResponseJson(ApiResponse::success(me)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/api/studio",
        Router::new()
            .route("/generate", post(generate))
            .route("/me", get(me)),
    )
}
