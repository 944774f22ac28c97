//! Authorization Code flow with PKCE.
//!
//! `/login` mints a verifier, keeps it in the session and redirects to the
//! provider with the matching challenge. `/callback` takes the verifier back
//! out of the session (exactly once) and redeems the code with it.
//!
//! ```text
//! ANONYMOUS --/login--> VERIFIER_ISSUED --/callback ok--> AUTHENTICATED
//!                               \--/callback error--> FAILED
//! ```

use openidconnect::PkceCodeChallenge;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{logout_url, Authenticated, LOGOUT_ROUTE};
use crate::errors::AuthError;
use crate::oidc::OidcProvider;
use crate::session::{Session, CODE_VERIFIER_KEY};

/// Query parameters the provider appends to the redirect back to `/callback`
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Start a login: store a fresh verifier and return the provider URL to redirect to.
///
/// Any verifier left over from an unfinished login in the same session is
/// overwritten, so only the most recent attempt can complete.
pub fn handle_login(provider: &dyn OidcProvider, session: &dyn Session, scope: &str) -> Url {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    session.set(CODE_VERIFIER_KEY, verifier.secret().clone());

    let url = provider.authorization_url(scope, challenge);
    debug!(authorization_endpoint = %url.origin().ascii_serialization(), "Redirecting to provider");
    url
}

/// Finish a login from the provider's redirect.
pub async fn handle_callback(
    provider: &dyn OidcProvider,
    session: &dyn Session,
    params: CallbackParams,
) -> Result<Authenticated, AuthError> {
    let code_verifier = session
        .get(CODE_VERIFIER_KEY)
        .ok_or(AuthError::MissingVerifier)?;
    // Single use whatever happens next
    session.clear(CODE_VERIFIER_KEY);

    if let Some(error) = params.error {
        warn!(
            error = %error,
            description = ?params.error_description,
            "Provider returned an authorization error"
        );
        return Err(AuthError::AuthorizationDenied {
            error,
            description: params.error_description,
        });
    }

    let code = params.code.ok_or(AuthError::MissingCode)?;
    if let Some(state) = &params.state {
        debug!(state = %state, "Ignoring state parameter on callback");
    }

    let token_set = provider
        .exchange_code(&code, &code_verifier)
        .await
        .map_err(AuthError::TokenExchange)?;

    let userinfo = provider
        .userinfo(&token_set)
        .await
        .map_err(AuthError::UserInfo)?;

    let end_session = provider.end_session_url(token_set.id_token.as_deref());
    let logout_url = logout_url(
        LOGOUT_ROUTE,
        token_set.refresh_token.as_deref(),
        end_session.as_ref(),
    );

    info!(sub = ?userinfo.sub(), "Authorization code login succeeded");

    Ok(Authenticated {
        token_set,
        userinfo,
        logout_url,
    })
}
