use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::components::pages;
use crate::oidc::OidcError;

/// Request-scoped failures of the login and logout flows.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No pending verifier: the session expired, the callback was replayed,
    /// or it was never started from this browser.
    #[error("no pending code verifier in session")]
    MissingVerifier,
    #[error("identity provider denied the authorization request: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },
    #[error("authorization response did not contain a code")]
    MissingCode,
    #[error("token exchange failed")]
    TokenExchange(#[source] OidcError),
    #[error("invalid credentials")]
    InvalidCredentials(#[source] OidcError),
    #[error("userinfo request failed")]
    UserInfo(#[source] OidcError),
    #[error("token revocation failed")]
    Revocation(#[source] OidcError),
    #[error("identity provider logout failed: {0}")]
    RemoteLogout(String),
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("flow is not enabled")]
    FlowDisabled,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingVerifier
            | AuthError::AuthorizationDenied { .. }
            | AuthError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            AuthError::TokenExchange(source) if source.is_grant_rejection() => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::MissingCode | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::FlowDisabled => StatusCode::NOT_FOUND,
            AuthError::TokenExchange(_)
            | AuthError::UserInfo(_)
            | AuthError::Revocation(_)
            | AuthError::RemoteLogout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client gets to see. Never includes tokens or provider detail.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::MissingVerifier => "Login session expired or was not started".to_string(),
            AuthError::AuthorizationDenied { error, .. } => {
                format!("Authorization denied: {error}")
            }
            AuthError::MissingCode => "Missing authorization code".to_string(),
            AuthError::TokenExchange(_) => "Failed to obtain tokens from identity provider".to_string(),
            AuthError::InvalidCredentials(_) => "Invalid credentials".to_string(),
            AuthError::UserInfo(_) => "Failed to fetch user info".to_string(),
            AuthError::Revocation(_) => "Failed to revoke tokens".to_string(),
            AuthError::RemoteLogout(_) => "Failed to log out of identity provider".to_string(),
            AuthError::BadRequest(reason) => (*reason).to_string(),
            AuthError::FlowDisabled => "Not found".to_string(),
        }
    }
}

/// How errors and results are rendered back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Html,
}

#[derive(Debug)]
pub struct ServerError(pub(crate) AuthError, pub(crate) ResponseFormat);

pub type ServerResult<S> = Result<S, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let ServerError(error, format) = self;
        let status = error.status();

        if status.is_server_error() {
            tracing::error!(error = ?error, "Request Error");
        } else {
            tracing::warn!(error = %error, "Request rejected");
        }

        match format {
            ResponseFormat::Json => {
                (status, Json(json!({ "error": error.public_message() }))).into_response()
            }
            ResponseFormat::Html => {
                (status, pages::error_page(status, &error.public_message())).into_response()
            }
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(error: AuthError) -> Self {
        ServerError(error, ResponseFormat::Json)
    }
}

pub(crate) trait WithFormat<T> {
    fn with_format(self, format: ResponseFormat) -> ServerResult<T>;
}

impl<T> WithFormat<T> for Result<T, AuthError> {
    fn with_format(self, format: ResponseFormat) -> ServerResult<T> {
        self.map_err(|err| ServerError(err, format))
    }
}
