use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::StatusResponse;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("empty caption")]
    EmptyCaption,

    #[error("failed to append to caption log: {0}")]
    LogWrite(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            AppError::EmptyCaption => {
                (StatusCode::BAD_REQUEST, Json(StatusResponse::empty())).into_response()
            }
            AppError::LogWrite(e) => {
                tracing::error!("Error writing to log: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
