//! Stateless bouncer checks exposed over HTTP.

use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::{Deserialize, Serialize};
use services::services::bouncer::{self, ViolationKind, ViolationReport};
use utils::response::ApiResponse;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub text: String,
    /// Falls back to the configured `SOFT_STEMS`.
    pub soft_stems: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct StripRequest {
    pub text: String,
    pub stems: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripResponse {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RepairPromptRequest {
    pub text: String,
    /// Defaults to whatever `scan` finds in `text`.
    pub hard: Option<Vec<ViolationKind>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepairPromptResponse {
    pub prompt: String,
}

/// POST /api/bouncer/scan
pub async fn scan(
    State(state): State<AppState>,
    Json(payload): Json<ScanRequest>,
) -> ResponseJson<ApiResponse<ViolationReport>> {
    let stems = payload
        .soft_stems
        .unwrap_or_else(|| state.soft_stems.to_vec());
    ResponseJson(ApiResponse::success(bouncer::scan(&payload.text, &stems)))
}

/// POST /api/bouncer/strip
pub async fn strip(
    State(state): State<AppState>,
    Json(payload): Json<StripRequest>,
) -> ResponseJson<ApiResponse<StripResponse>> {
    let stems = payload.stems.unwrap_or_else(|| state.soft_stems.to_vec());
    ResponseJson(ApiResponse::success(StripResponse {
        text: bouncer::strip_stems(&payload.text, &stems),
    }))
}

/// POST /api/bouncer/repair-prompt
pub async fn repair_prompt(
    Json(payload): Json<RepairPromptRequest>,
) -> ResponseJson<ApiResponse<RepairPromptResponse>> {
    let hard = payload.hard.unwrap_or_else(|| {
        let no_stems: &[&str] = &[];
        bouncer::scan(&payload.text, no_stems).hard
    });
    ResponseJson(ApiResponse::success(RepairPromptResponse {
        prompt: bouncer::build_repair_prompt(&payload.text, &hard),
    }))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/api/bouncer",
        Router::new()
            .route("/scan", post(scan))
            .route("/strip", post(strip))
            .route("/repair-prompt", post(repair_prompt)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use services::services::maintenance::MaintenanceConfig;
    use tower::ServiceExt;

    use super::*;
    use crate::{app, routes::test_support::*};

    fn test_app() -> Router {
        app(AppState::new(
            MaintenanceConfig::new(false, None, true),
            vec!["Konkurrenz".into()],
        ))
    }

    #[tokio::test]
    async fn test_scan_uses_configured_stems_by_default() {
        let resp = test_app()
            .oneshot(post_json(
                "/api/bouncer/scan",
                json!({ "text": "Sie sind besser als die Konkurrenzfirma." }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: ApiResponse<ViolationReport> = json(resp).await;
        let report = body.into_data().unwrap();
        assert_eq!(report.hard, vec![ViolationKind::FormalAddress]);
        assert_eq!(report.soft, vec!["Konkurrenz"]);
    }

    #[tokio::test]
    async fn test_scan_with_explicit_empty_stems() {
        let resp = test_app()
            .oneshot(post_json(
                "/api/bouncer/scan",
                json!({ "text": "Die Konkurrenz schläft.", "soft_stems": [] }),
            ))
            .await
            .unwrap();
        let body: ApiResponse<ViolationReport> = json(resp).await;
        assert!(body.into_data().unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_strip_route() {
        let resp = test_app()
            .oneshot(post_json(
                "/api/bouncer/strip",
                json!({ "text": "Billig und  billiger !", "stems": ["billig"] }),
            ))
            .await
            .unwrap();
        let body: ApiResponse<StripResponse> = json(resp).await;
        assert_eq!(body.into_data().unwrap().text, "und!");
    }

    #[tokio::test]
    async fn test_repair_prompt_defaults_to_scanned_tags() {
        let resp = test_app()
            .oneshot(post_json(
                "/api/bouncer/repair-prompt",
                json!({ "text": "Sorry, können Sie helfen?" }),
            ))
            .await
            .unwrap();
        let body: ApiResponse<RepairPromptResponse> = json(resp).await;
        let prompt = body.into_data().unwrap().prompt;
        assert!(prompt.contains("formal_address, apology_or_meta"));
        assert!(prompt.ends_with("Sorry, können Sie helfen?"));
    }

    #[tokio::test]
    async fn test_repair_prompt_rejects_unknown_tag() {
        let resp = test_app()
            .oneshot(post_json(
                "/api/bouncer/repair-prompt",
                json!({ "text": "x", "hard": ["rude"] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
