use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{generation::GenerationError, studio_api::StudioApiError};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    StudioApi(#[from] StudioApiError),
    #[error("studio backend is not configured")]
    StudioUnavailable,
    #[error("not found")]
    NotFound,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Generation(GenerationError::Api(e)) | ApiError::StudioApi(e) => {
                studio_status(e)
            }
            ApiError::Generation(GenerationError::EmptyOutput) => StatusCode::BAD_GATEWAY,
            ApiError::StudioUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

fn studio_status(e: &StudioApiError) -> StatusCode {
    match e {
        StudioApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        StudioApiError::Api { status, .. } if (400..500).contains(status) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "API request failed");
        }
        ApiResponse::<()>::error(&self.to_string()).with_status(status)
    }
}
