use crate::auth::AuthError;
use crate::credentials::SignupError;
use crate::geo_query::SearchError;
use crate::ingest::{IngestError, RemoveError};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// Failure leaving the HTTP boundary. Rendered as a plain-text body; backend
/// detail is logged here and not sent to the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid password or username")]
    InvalidCredentials,

    #[error(transparent)]
    Signup(#[from] SignupError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Remove(#[from] RemoveError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidCredentials => StatusCode::FORBIDDEN,
            // Signup keeps its 500 contract even for validation failures
            ApiError::Signup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Ingest(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Search(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Search(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Remove(RemoveError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Remove(RemoveError::NotOwner { .. }) => StatusCode::FORBIDDEN,
            ApiError::Remove(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to the client
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Auth(AuthError::Signing(_)) => "Failed to issue token".to_string(),
            ApiError::Signup(SignupError::Backend(_)) => "Failed to add a new user".to_string(),
            ApiError::Signup(SignupError::AlreadyExists(name)) => {
                format!("Failed to add a new user: {} already exists", name)
            }
            ApiError::Ingest(e) => e.public_message(),
            ApiError::Remove(e) => e.public_message(),
            ApiError::Search(SearchError::Backend(_)) => "Search is not available".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, status = %status, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }

        let headers = [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ];
        let body = self.public_message();

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(WWW_AUTHENTICATE, "Bearer")], headers, body).into_response();
        }

        (status, headers, body).into_response()
    }
}
