//! OpenID Connect client façade
//! Discovery, authorization URL construction, token grants, userinfo,
//! revocation and end-session handling against a discovered provider.

pub mod client;
pub mod discovery;
pub mod token;

pub use client::*;
pub use discovery::*;
pub use token::*;

use openidconnect::PkceCodeChallenge;
use reqwest::StatusCode;
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const TOKEN_ENDPOINT: &str = "token endpoint";
pub const USERINFO_ENDPOINT: &str = "userinfo endpoint";
pub const REVOCATION_ENDPOINT: &str = "revocation endpoint";
pub const END_SESSION_ENDPOINT: &str = "end-session endpoint";

/// OAuth error code a token endpoint answers with when a grant, a code or a
/// set of resource owner credentials is not accepted.
pub const INVALID_GRANT: &str = "invalid_grant";

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("failed to discover the provider at {url}")]
    Discovery {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("provider location {url} is invalid: {reason}")]
    InvalidIssuer { url: String, reason: String },
    #[error("provider does not advertise a {0}")]
    MissingEndpoint(&'static str),
    #[error("request to the {endpoint} failed")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: BoxError,
    },
    /// The provider answered with an OAuth error. `status` is unknown for
    /// token endpoint errors, which the client library reports by error code only.
    #[error("the {endpoint} rejected the request: {error}")]
    Rejected {
        endpoint: &'static str,
        status: Option<StatusCode>,
        error: String,
        description: Option<String>,
    },
    #[error("the {endpoint} returned an unusable response: {reason}")]
    InvalidResponse {
        endpoint: &'static str,
        reason: String,
    },
}

impl OidcError {
    /// Whether the provider refused the grant itself (bad code, verifier or
    /// credentials), as opposed to being unreachable, misconfigured or broken.
    pub fn is_grant_rejection(&self) -> bool {
        match self {
            OidcError::Rejected { status, error, .. } => {
                error == INVALID_GRANT && status.map_or(true, |status| status.is_client_error())
            }
            _ => false,
        }
    }
}

/// The operations the flow handlers need from a registered client.
///
/// Only the async methods touch the network. Handlers depend on this trait
/// rather than on [`OidcClient`] so the I/O can be replaced in tests.
#[async_trait::async_trait]
pub trait OidcProvider: Send + Sync {
    /// Authorization endpoint URL carrying the given S256 challenge.
    fn authorization_url(&self, scope: &str, pkce_challenge: PkceCodeChallenge) -> Url;

    /// End-session URL with the given ID token as hint, if the provider has one.
    fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<Url>;

    fn end_session_endpoint(&self) -> Option<&Url>;

    /// `authorization_code` grant, proving possession of the PKCE verifier.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenSet, OidcError>;

    /// `password` grant.
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<TokenSet, OidcError>;

    async fn userinfo(&self, token_set: &TokenSet) -> Result<UserInfo, OidcError>;

    async fn revoke(&self, refresh_token: &str) -> Result<(), OidcError>;

    /// Call an end-session URL and report the status the provider answered with.
    async fn remote_logout(&self, url: &Url) -> Result<StatusCode, OidcError>;
}
