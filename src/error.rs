use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{permissions::Permission, repository::RepoError, supabase::AuthProviderError};

/// AppError
///
/// Handler-level failures. Infrastructure errors are logged in full and reach
/// the client only as a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("missing permission `{0}`")]
    Forbidden(Permission),

    #[error("no blood bank is linked to this account")]
    NoLinkedBloodBank,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Account created but profile setup failed. Please contact support.")]
    ProfileSetup(#[source] RepoError),

    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    #[error("auth provider error: {0}")]
    AuthProvider(#[from] AuthProviderError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::NoLinkedBloodBank => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ProfileSetup(_) | AppError::Repository(_) | AppError::AuthProvider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::ProfileSetup(source) => {
                tracing::error!(error = %source, "profile insert failed after auth sign-up");
                self.to_string()
            }
            AppError::Repository(_) | AppError::AuthProvider(_) => {
                tracing::error!(error = %self, "request failed");
                "An unexpected error occurred.".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
