use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::intake::IntakeError;
use crate::pipeline::PipelineError;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("invalid photo: {0}")]
    Intake(#[from] IntakeError),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("export failed: {0}")]
    Export(String),
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let status = match &self {
            StudioError::NotFound(_) => StatusCode::NOT_FOUND,
            StudioError::Pipeline(PipelineError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            StudioError::Pipeline(PipelineError::StaleRun { .. }) => StatusCode::CONFLICT,
            StudioError::Pipeline(_) => StatusCode::BAD_REQUEST,
            StudioError::Collaborator(CollaboratorError::UnknownClient(_)) => StatusCode::NOT_FOUND,
            StudioError::Collaborator(CollaboratorError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            StudioError::Collaborator(CollaboratorError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            StudioError::Intake(_) | StudioError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StudioError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
