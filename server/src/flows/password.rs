use std::fmt;

use serde::Deserialize;
use tracing::{info, warn};

use super::{logout_url, Authenticated, LOGOUT_EXT_ROUTE};
use crate::errors::AuthError;
use crate::oidc::OidcProvider;

/// Username and password for the direct grant. `user` is accepted as an
/// alias for `username`.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "user")]
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Resource Owner Password Credentials login. Stateless: nothing is kept in
/// the session.
pub async fn handle_login_ext(
    provider: &dyn OidcProvider,
    credentials: Credentials,
    scope: Option<&str>,
) -> Result<Authenticated, AuthError> {
    let token_set = provider
        .exchange_password(&credentials.username, &credentials.password, scope)
        .await
        .map_err(|err| {
            if err.is_grant_rejection() {
                warn!("Password grant rejected");
                AuthError::InvalidCredentials(err)
            } else {
                AuthError::TokenExchange(err)
            }
        })?;

    let userinfo = provider
        .userinfo(&token_set)
        .await
        .map_err(AuthError::UserInfo)?;

    let logout_url = logout_url(LOGOUT_EXT_ROUTE, token_set.refresh_token.as_deref(), None);

    info!(sub = ?userinfo.sub(), "Password login succeeded");

    Ok(Authenticated {
        token_set,
        userinfo,
        logout_url,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::flows::testing::{MockProvider, PASSWORD, USERNAME};
    use crate::oidc::{OidcError, TOKEN_ENDPOINT};

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_skips_userinfo() {
        let provider = MockProvider::default();

        let err = handle_login_ext(&provider, credentials(USERNAME, "nope"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(MockProvider::calls(&provider.userinfo_calls), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_indistinguishable_from_wrong_password() {
        let provider = MockProvider::default();

        let unknown = handle_login_ext(&provider, credentials("mallory", PASSWORD), None)
            .await
            .unwrap_err();
        let wrong = handle_login_ext(&provider, credentials(USERNAME, "nope"), None)
            .await
            .unwrap_err();

        assert_eq!(unknown.public_message(), wrong.public_message());
        assert_eq!(unknown.status(), wrong.status());
    }

    fn unavailable() -> OidcError {
        OidcError::Rejected {
            endpoint: TOKEN_ENDPOINT,
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            error: "temporarily_unavailable".to_string(),
            description: None,
        }
    }

    fn client_not_accepted() -> OidcError {
        OidcError::Rejected {
            endpoint: TOKEN_ENDPOINT,
            status: Some(StatusCode::UNAUTHORIZED),
            error: "invalid_client".to_string(),
            description: Some("Client authentication failed".to_string()),
        }
    }

    #[tokio::test]
    async fn test_provider_outage_is_not_reported_as_bad_credentials() {
        let provider = MockProvider {
            token_error: Some(unavailable),
            ..Default::default()
        };

        let err = handle_login_ext(&provider, credentials(USERNAME, PASSWORD), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExchange(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_ne!(err.public_message(), "Invalid credentials");
    }

    #[tokio::test]
    async fn test_misconfigured_client_is_not_reported_as_bad_credentials() {
        let provider = MockProvider {
            token_error: Some(client_not_accepted),
            ..Default::default()
        };

        let err = handle_login_ext(&provider, credentials(USERNAME, PASSWORD), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExchange(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(MockProvider::calls(&provider.userinfo_calls), 0);
    }

    #[tokio::test]
    async fn test_successful_login_links_to_logoutext() {
        let provider = MockProvider::default();

        let authenticated =
            handle_login_ext(&provider, credentials(USERNAME, PASSWORD), Some("uid"))
                .await
                .unwrap();

        assert_eq!(authenticated.logout_url, "/logoutext?refresh_token=refresh-token");
        assert_eq!(authenticated.userinfo.claim("email"), Some("alice@example.com"));
        assert_eq!(MockProvider::calls(&provider.userinfo_calls), 1);
    }

    #[test]
    fn test_user_alias_is_accepted() {
        let credentials: Credentials =
            serde_urlencoded::from_str("user=alice&password=wonderland").unwrap();
        assert_eq!(credentials.username, "alice");
    }

    #[test]
    fn test_debug_output_hides_password() {
        assert!(!format!("{:?}", credentials(USERNAME, PASSWORD)).contains(PASSWORD));
    }
}
