use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::errors::AuthError;
use crate::oidc::OidcProvider;

/// What to do when the provider's end-session call does not answer 204
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLogoutPolicy {
    /// Log a warning and report the partial outcome
    Lenient,
    /// Fail the whole logout
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdpLogout {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutOutcome {
    pub message: &'static str,
    pub revoked: bool,
    pub idp_logout: IdpLogout,
}

impl LogoutOutcome {
    fn new(idp_logout: IdpLogout) -> Self {
        let message = match idp_logout {
            IdpLogout::Failed => "Tokens revoked, identity provider logout failed",
            IdpLogout::Succeeded | IdpLogout::Skipped => "Logged out",
        };

        Self {
            message,
            revoked: true,
            idp_logout,
        }
    }
}

/// Accept a caller-supplied end-session URL only if it points at the
/// provider's own end-session endpoint.
fn end_session_target(provider: &dyn OidcProvider, raw: &str) -> Result<Url, AuthError> {
    let url = Url::parse(raw).map_err(|_| AuthError::BadRequest("issuerLogoutURL is not a URL"))?;
    let endpoint = provider
        .end_session_endpoint()
        .ok_or(AuthError::BadRequest("provider has no end-session endpoint"))?;

    let same_endpoint = url.scheme() == endpoint.scheme()
        && url.host_str() == endpoint.host_str()
        && url.port_or_known_default() == endpoint.port_or_known_default()
        && url.path() == endpoint.path();

    if same_endpoint {
        Ok(url)
    } else {
        warn!(host = ?url.host_str(), "Rejecting logout URL for a foreign endpoint");
        Err(AuthError::BadRequest(
            "issuerLogoutURL does not match the provider end-session endpoint",
        ))
    }
}

/// Revoke the refresh token, then end the provider session when asked to.
pub async fn handle_logout(
    provider: &dyn OidcProvider,
    refresh_token: &str,
    issuer_logout_url: Option<&str>,
    policy: RemoteLogoutPolicy,
) -> Result<LogoutOutcome, AuthError> {
    // Validate before any side effect
    let target = issuer_logout_url
        .map(|raw| end_session_target(provider, raw))
        .transpose()?;

    provider
        .revoke(refresh_token)
        .await
        .map_err(AuthError::Revocation)?;

    let Some(target) = target else {
        info!("Refresh token revoked, no provider logout requested");
        return Ok(LogoutOutcome::new(IdpLogout::Skipped));
    };

    let failure = match provider.remote_logout(&target).await {
        Ok(StatusCode::NO_CONTENT) => {
            info!("Refresh token revoked and provider session ended");
            return Ok(LogoutOutcome::new(IdpLogout::Succeeded));
        }
        Ok(status) => format!("end-session endpoint answered {status}"),
        Err(err) => format!("end-session request failed: {err}"),
    };

    match policy {
        RemoteLogoutPolicy::Strict => Err(AuthError::RemoteLogout(failure)),
        RemoteLogoutPolicy::Lenient => {
            warn!(reason = %failure, "Provider logout did not complete");
            Ok(LogoutOutcome::new(IdpLogout::Failed))
        }
    }
}

/// Logout for the password flow: there is no provider browser session to end.
pub async fn handle_logout_ext(
    provider: &dyn OidcProvider,
    refresh_token: &str,
) -> Result<LogoutOutcome, AuthError> {
    provider
        .revoke(refresh_token)
        .await
        .map_err(AuthError::Revocation)?;

    info!("Refresh token revoked");
    Ok(LogoutOutcome::new(IdpLogout::Skipped))
}
