use std::fmt;
use std::time::Duration;

use openidconnect::core::{
    CoreAuthDisplay, CoreAuthPrompt, CoreAuthenticationFlow, CoreErrorResponseType,
    CoreGenderClaim, CoreJsonWebKey, CoreJweContentEncryptionAlgorithm, CoreRevocableToken,
    CoreRevocationErrorResponse, CoreTokenIntrospectionResponse,
};
use openidconnect::{
    AccessToken, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, EndSessionUrl,
    EndpointMaybeSet, EndpointNotSet, EndpointSet, LogoutRequest, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, PostLogoutRedirectUrl, RedirectUrl, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, Scope, StandardErrorResponse, UserInfoError,
};
use reqwest::{redirect, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};
use url::{form_urlencoded, Url};

use super::{
    end_session_endpoint, revocation_endpoint, DiscoveredMetadata, ExtraClaims, OidcError,
    OidcProvider, RpIdToken, RpTokenResponse, RpUserInfoClaims, TokenSet, UserInfo,
    END_SESSION_ENDPOINT, REVOCATION_ENDPOINT, TOKEN_ENDPOINT, USERINFO_ENDPOINT,
};
use crate::config::{ClientConfig, Secret};

/// A client built from discovery: the authorization endpoint is always
/// known, token and userinfo endpoints only when advertised.
type RpClient = Client<
    ExtraClaims,
    CoreAuthDisplay,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJsonWebKey,
    CoreAuthPrompt,
    StandardErrorResponse<CoreErrorResponseType>,
    RpTokenResponse,
    CoreTokenIntrospectionResponse,
    CoreRevocableToken,
    CoreRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// Build the HTTP client shared by every outbound provider call.
///
/// Redirects are not followed so an end-session endpoint answering with a
/// redirect is reported as such instead of being chased.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .timeout(timeout)
        .redirect(redirect::Policy::none())
        .use_rustls_tls()
        .build()
}

/// A client registered with a provider
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: Secret,
    pub redirect_uri: Option<Url>,
    pub post_logout_redirect_uri: Option<Url>,
}

impl From<&ClientConfig> for ClientRegistration {
    fn from(config: &ClientConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.callback_url.clone(),
            post_logout_redirect_uri: config.post_logout_redirect_uri.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OidcClient {
    http: reqwest::Client,
    client: RpClient,
    registration: ClientRegistration,
    issuer: String,
    revocation_endpoint: Option<Url>,
    end_session_endpoint: Option<Url>,
}

impl fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.issuer)
            .field("client_id", &self.registration.client_id)
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    pub fn new(
        http: reqwest::Client,
        metadata: &DiscoveredMetadata,
        registration: ClientRegistration,
    ) -> Self {
        let mut client = RpClient::from_provider_metadata(
            metadata.clone(),
            ClientId::new(registration.client_id.clone()),
            Some(ClientSecret::new(
                registration.client_secret.expose().to_string(),
            )),
        );
        if let Some(redirect_uri) = &registration.redirect_uri {
            client = client.set_redirect_uri(RedirectUrl::from_url(redirect_uri.clone()));
        }

        Self {
            http,
            client,
            issuer: metadata.issuer().as_str().to_string(),
            revocation_endpoint: revocation_endpoint(metadata).cloned(),
            end_session_endpoint: end_session_endpoint(metadata).cloned(),
            registration,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `client_secret_basic` credentials; both halves are form-encoded first
    /// as RFC 6749 section 2.3.1 requires.
    fn with_client_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let encode = |value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
        request.basic_auth(
            encode(&self.registration.client_id),
            Some(encode(self.registration.client_secret.expose())),
        )
    }
}

fn scopes(scope: &str) -> impl Iterator<Item = Scope> + '_ {
    scope.split_whitespace().map(|s| Scope::new(s.to_string()))
}

/// The wire value of an OAuth error code.
fn error_code<T: Serialize>(code: &T) -> String {
    match serde_json::to_value(code) {
        Ok(Value::String(code)) => code,
        _ => "unknown_error".to_string(),
    }
}

fn token_error<RE>(
    err: RequestTokenError<RE, StandardErrorResponse<CoreErrorResponseType>>,
) -> OidcError
where
    RE: std::error::Error + Send + Sync + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let error = error_code(response.error());
            let description = response.error_description().cloned();
            error!(
                endpoint = TOKEN_ENDPOINT,
                error = %error,
                description = ?description,
                "Provider rejected request"
            );
            OidcError::Rejected {
                endpoint: TOKEN_ENDPOINT,
                status: None,
                error,
                description,
            }
        }
        RequestTokenError::Request(source) => OidcError::Transport {
            endpoint: TOKEN_ENDPOINT,
            source: Box::new(source),
        },
        other => OidcError::InvalidResponse {
            endpoint: TOKEN_ENDPOINT,
            reason: other.to_string(),
        },
    }
}

fn userinfo_error<RE>(err: UserInfoError<RE>) -> OidcError
where
    RE: std::error::Error + Send + Sync + 'static,
{
    match err {
        UserInfoError::Request(source) => OidcError::Transport {
            endpoint: USERINFO_ENDPOINT,
            source: Box::new(source),
        },
        UserInfoError::Response(status, _, _) => {
            error!(endpoint = USERINFO_ENDPOINT, %status, "Provider rejected request");
            OidcError::Rejected {
                endpoint: USERINFO_ENDPOINT,
                status: Some(status),
                error: status
                    .canonical_reason()
                    .unwrap_or("unexpected_response")
                    .to_string(),
                description: None,
            }
        }
        other => OidcError::InvalidResponse {
            endpoint: USERINFO_ENDPOINT,
            reason: other.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl OidcProvider for OidcClient {
    fn authorization_url(&self, scope: &str, pkce_challenge: PkceCodeChallenge) -> Url {
        // `openid` is always requested by the client library
        let (url, _state, _nonce) = self
            .client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scopes(scopes(scope).filter(|s| s.as_str() != "openid"))
            .set_pkce_challenge(pkce_challenge)
            .url();
        url
    }

    fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<Url> {
        let endpoint = EndSessionUrl::from_url(self.end_session_endpoint.clone()?);
        let mut request = LogoutRequest::from(endpoint).set_client_id(self.client.client_id().clone());

        let hint = id_token_hint
            .and_then(|hint| serde_json::from_value::<RpIdToken>(Value::String(hint.to_string())).ok());
        if let Some(hint) = &hint {
            request = request.set_id_token_hint(hint);
        }
        if let Some(post_logout) = &self.registration.post_logout_redirect_uri {
            request = request
                .set_post_logout_redirect_uri(PostLogoutRedirectUrl::from_url(post_logout.clone()));
        }

        Some(request.http_get_url())
    }

    fn end_session_endpoint(&self) -> Option<&Url> {
        self.end_session_endpoint.as_ref()
    }

    #[tracing::instrument(skip_all, fields(client_id = %self.registration.client_id))]
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenSet, OidcError> {
        debug!("Exchanging authorization code");
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|_| OidcError::MissingEndpoint(TOKEN_ENDPOINT))?
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(token_error)?;

        Ok(TokenSet::from_token_response(&response))
    }

    #[tracing::instrument(skip_all, fields(client_id = %self.registration.client_id))]
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<TokenSet, OidcError> {
        debug!("Requesting password grant");
        let username = ResourceOwnerUsername::new(username.to_string());
        let password = ResourceOwnerPassword::new(password.to_string());

        let mut request = self
            .client
            .exchange_password(&username, &password)
            .map_err(|_| OidcError::MissingEndpoint(TOKEN_ENDPOINT))?;
        if let Some(scope) = scope {
            request = request.add_scopes(scopes(scope));
        }

        let response = request.request_async(&self.http).await.map_err(token_error)?;

        Ok(TokenSet::from_token_response(&response))
    }

    #[tracing::instrument(skip_all, fields(client_id = %self.registration.client_id))]
    async fn userinfo(&self, token_set: &TokenSet) -> Result<UserInfo, OidcError> {
        let claims: RpUserInfoClaims = self
            .client
            .user_info(AccessToken::new(token_set.access_token.clone()), None)
            .map_err(|_| OidcError::MissingEndpoint(USERINFO_ENDPOINT))?
            .request_async(&self.http)
            .await
            .map_err(userinfo_error)?;

        UserInfo::from_claims(&claims).map_err(|e| OidcError::InvalidResponse {
            endpoint: USERINFO_ENDPOINT,
            reason: e.to_string(),
        })
    }

    /// RFC 7009 revocation, sent directly because the client library only
    /// accepts https revocation endpoints and local providers are plain http.
    #[tracing::instrument(skip_all, fields(client_id = %self.registration.client_id))]
    async fn revoke(&self, refresh_token: &str) -> Result<(), OidcError> {
        let endpoint = self
            .revocation_endpoint
            .clone()
            .ok_or(OidcError::MissingEndpoint(REVOCATION_ENDPOINT))?;

        let response = self
            .with_client_auth(self.http.post(endpoint))
            .form(&[
                ("token", refresh_token),
                ("token_type_hint", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|source| OidcError::Transport {
                endpoint: REVOCATION_ENDPOINT,
                source: Box::new(source),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Refresh token revoked");
            return Ok(());
        }

        let body = response.bytes().await.unwrap_or_default();
        let (error, description) = match serde_json::from_slice::<CoreRevocationErrorResponse>(&body) {
            Ok(body) => (error_code(body.error()), body.error_description().cloned()),
            Err(_) => (
                status
                    .canonical_reason()
                    .unwrap_or("unexpected_response")
                    .to_string(),
                None,
            ),
        };
        error!(
            endpoint = REVOCATION_ENDPOINT,
            %status,
            error = %error,
            description = ?description,
            "Provider rejected request"
        );

        Err(OidcError::Rejected {
            endpoint: REVOCATION_ENDPOINT,
            status: Some(status),
            error,
            description,
        })
    }

    #[tracing::instrument(skip_all, fields(client_id = %self.registration.client_id))]
    async fn remote_logout(&self, url: &Url) -> Result<StatusCode, OidcError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| OidcError::Transport {
                endpoint: END_SESSION_ENDPOINT,
                source: Box::new(source),
            })?;

        Ok(response.status())
    }
}
