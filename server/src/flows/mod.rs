//! Login and logout flows.
//! Pure request shaping lives here; every network call goes through an
//! [`OidcProvider`](crate::oidc::OidcProvider).

pub mod authorization_code;
pub mod logout;
pub mod password;

pub use authorization_code::*;
pub use logout::*;
pub use password::*;

use serde::Serialize;
use url::{form_urlencoded, Url};

use crate::oidc::{TokenSet, UserInfo};

pub const LOGOUT_ROUTE: &str = "/logout";
pub const LOGOUT_EXT_ROUTE: &str = "/logoutext";

/// Query parameter carrying the provider end-session URL on `/logout`
pub const ISSUER_LOGOUT_PARAM: &str = "issuerLogoutURL";

/// Result of a completed login
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token_set: TokenSet,
    pub userinfo: UserInfo,
    /// Relative URL of the matching logout route, refresh token embedded
    pub logout_url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticatedPayload<'a> {
    #[serde(rename = "tokenSet", skip_serializing_if = "Option::is_none")]
    pub token_set: Option<&'a TokenSet>,
    pub userinfo: &'a UserInfo,
    #[serde(rename = "logoutURL")]
    pub logout_url: &'a str,
}

impl Authenticated {
    pub fn payload(&self, include_tokens: bool) -> AuthenticatedPayload<'_> {
        AuthenticatedPayload {
            token_set: include_tokens.then_some(&self.token_set),
            userinfo: &self.userinfo,
            logout_url: &self.logout_url,
        }
    }
}

/// Build the link a caller follows to log out again.
pub fn logout_url(
    route: &str,
    refresh_token: Option<&str>,
    issuer_logout_url: Option<&Url>,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(refresh_token) = refresh_token {
        query.append_pair("refresh_token", refresh_token);
    }
    if let Some(url) = issuer_logout_url {
        query.append_pair(ISSUER_LOGOUT_PARAM, url.as_str());
    }

    let query = query.finish();
    if query.is_empty() {
        route.to_string()
    } else {
        format!("{route}?{query}")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider that records how often each network call was made.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use openidconnect::{PkceCodeChallenge, PkceCodeVerifier};
    use reqwest::StatusCode;
    use url::Url;

    use crate::oidc::{
        OidcError, OidcProvider, TokenSet, UserInfo, INVALID_GRANT, REVOCATION_ENDPOINT,
        TOKEN_ENDPOINT,
    };

    pub(crate) const USERNAME: &str = "alice";
    pub(crate) const PASSWORD: &str = "wonderland";
    pub(crate) const END_SESSION: &str = "https://idp.example/logout";

    /// `BASE64URL(SHA256(verifier))`
    pub(crate) fn code_challenge(verifier: &str) -> String {
        PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()))
            .as_str()
            .to_string()
    }

    pub(crate) struct MockProvider {
        /// Codes the provider will redeem, each bound to a challenge
        pub codes: Mutex<Vec<(String, String)>>,
        pub redeemed: Mutex<HashSet<String>>,
        pub end_session: Url,
        pub logout_status: StatusCode,
        pub revoke_fails: bool,
        /// Answer every token request with this instead of tokens
        pub token_error: Option<fn() -> OidcError>,
        pub exchange_calls: AtomicUsize,
        pub password_calls: AtomicUsize,
        pub userinfo_calls: AtomicUsize,
        pub revoke_calls: AtomicUsize,
        pub logout_calls: AtomicUsize,
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self {
                codes: Mutex::new(Vec::new()),
                redeemed: Mutex::new(HashSet::new()),
                end_session: Url::parse(END_SESSION).unwrap(),
                logout_status: StatusCode::NO_CONTENT,
                revoke_fails: false,
                token_error: None,
                exchange_calls: AtomicUsize::new(0),
                password_calls: AtomicUsize::new(0),
                userinfo_calls: AtomicUsize::new(0),
                revoke_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
            }
        }
    }

    impl MockProvider {
        /// Simulate the provider issuing `code` for a login that sent `challenge`.
        pub(crate) fn issue_code(&self, code: &str, challenge: &str) {
            self.codes
                .lock()
                .unwrap()
                .push((code.to_string(), challenge.to_string()));
        }

        pub(crate) fn calls(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn token_set() -> TokenSet {
            TokenSet {
                access_token: "access-token".to_string(),
                token_type: "Bearer".to_string(),
                id_token: Some("id-token".to_string()),
                refresh_token: Some("refresh-token".to_string()),
                scope: Some("openid email profile".to_string()),
                expires_in: Some(300),
                expires_at: None,
            }
        }

        fn invalid_grant() -> OidcError {
            OidcError::Rejected {
                endpoint: TOKEN_ENDPOINT,
                status: None,
                error: INVALID_GRANT.to_string(),
                description: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl OidcProvider for MockProvider {
        fn authorization_url(&self, scope: &str, pkce_challenge: PkceCodeChallenge) -> Url {
            let mut url = Url::parse("https://idp.example/authorize").unwrap();
            url.query_pairs_mut()
                .append_pair("scope", scope)
                .append_pair("code_challenge", pkce_challenge.as_str())
                .append_pair("code_challenge_method", pkce_challenge.method().as_str());
            url
        }

        fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<Url> {
            let mut url = self.end_session.clone();
            if let Some(hint) = id_token_hint {
                url.query_pairs_mut().append_pair("id_token_hint", hint);
            }
            Some(url)
        }

        fn end_session_endpoint(&self) -> Option<&Url> {
            Some(&self.end_session)
        }

        async fn exchange_code(
            &self,
            code: &str,
            code_verifier: &str,
        ) -> Result<TokenSet, OidcError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token_error) = self.token_error {
                return Err(token_error());
            }

            let challenge = self
                .codes
                .lock()
                .unwrap()
                .iter()
                .find(|(c, _)| c == code)
                .map(|(_, challenge)| challenge.clone())
                .ok_or_else(Self::invalid_grant)?;

            if !self.redeemed.lock().unwrap().insert(code.to_string()) {
                return Err(Self::invalid_grant());
            }
            if code_challenge(code_verifier) != challenge {
                return Err(Self::invalid_grant());
            }

            Ok(Self::token_set())
        }

        async fn exchange_password(
            &self,
            username: &str,
            password: &str,
            _scope: Option<&str>,
        ) -> Result<TokenSet, OidcError> {
            self.password_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token_error) = self.token_error {
                return Err(token_error());
            }
            if username == USERNAME && password == PASSWORD {
                Ok(Self::token_set())
            } else {
                Err(Self::invalid_grant())
            }
        }

        async fn userinfo(&self, _token_set: &TokenSet) -> Result<UserInfo, OidcError> {
            self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_value(serde_json::json!({
                "sub": "user-1",
                "email": "alice@example.com",
                "name": "Alice"
            }))
            .unwrap())
        }

        async fn revoke(&self, _refresh_token: &str) -> Result<(), OidcError> {
            self.revoke_calls.fetch_add(1, Ordering::SeqCst);
            if self.revoke_fails {
                Err(OidcError::Rejected {
                    endpoint: REVOCATION_ENDPOINT,
                    status: Some(StatusCode::SERVICE_UNAVAILABLE),
                    error: "temporarily_unavailable".to_string(),
                    description: None,
                })
            } else {
                Ok(())
            }
        }

        async fn remote_logout(&self, _url: &Url) -> Result<StatusCode, OidcError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.logout_status)
        }
    }
}
