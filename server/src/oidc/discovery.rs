//! OpenID Provider discovery.
//!
//! Fetches `/.well-known/openid-configuration` and the provider key set once
//! at startup. The metadata is shared by every client registered against it.

use openidconnect::core::{
    CoreAuthDisplay, CoreClaimName, CoreClaimType, CoreClientAuthMethod, CoreGrantType,
    CoreJsonWebKey, CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm,
    CoreResponseMode, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{
    AdditionalProviderMetadata, IssuerUrl, LogoutProviderMetadata, ProviderMetadata,
    RevocationUrl,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use super::OidcError;

pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Discovery fields outside OpenID Connect Discovery 1.0 that the relying
/// party reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<RevocationUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl AdditionalProviderMetadata for ExtraProviderMetadata {}

/// Provider metadata including the RP-Initiated Logout end-session endpoint.
pub type DiscoveredMetadata = ProviderMetadata<
    LogoutProviderMetadata<ExtraProviderMetadata>,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

/// Resolve the issuer identifier for a configured discovery URL.
///
/// Accepts either the issuer itself or the full well-known URL. The issuer
/// is taken without a trailing slash, the way providers publish it.
pub fn issuer_url(discovery_url: &Url) -> Result<IssuerUrl, OidcError> {
    let raw = discovery_url.as_str();
    let issuer = raw.strip_suffix(WELL_KNOWN_PATH).unwrap_or(raw);

    IssuerUrl::new(issuer.trim_end_matches('/').to_string()).map_err(|e| {
        OidcError::InvalidIssuer {
            url: raw.to_string(),
            reason: e.to_string(),
        }
    })
}

pub fn revocation_endpoint(metadata: &DiscoveredMetadata) -> Option<&Url> {
    metadata
        .additional_metadata()
        .additional_metadata
        .revocation_endpoint
        .as_ref()
        .map(RevocationUrl::url)
}

pub fn end_session_endpoint(metadata: &DiscoveredMetadata) -> Option<&Url> {
    metadata
        .additional_metadata()
        .end_session_endpoint
        .as_ref()
        .map(|endpoint| endpoint.url())
}

#[tracing::instrument(skip(http), fields(url = %discovery_url))]
pub async fn discover(
    http: &reqwest::Client,
    discovery_url: &Url,
) -> Result<DiscoveredMetadata, OidcError> {
    let issuer = issuer_url(discovery_url)?;

    let metadata = DiscoveredMetadata::discover_async(issuer.clone(), http)
        .await
        .map_err(|source| OidcError::Discovery {
            url: issuer.as_str().to_string(),
            source: Box::new(source),
        })?;

    let methods = &metadata
        .additional_metadata()
        .additional_metadata
        .code_challenge_methods_supported;
    if let Some(methods) = methods {
        if !methods.iter().any(|m| m == CODE_CHALLENGE_METHOD) {
            warn!(
                issuer = issuer.as_str(),
                "Provider does not advertise S256 PKCE support; login may fail"
            );
        }
    }

    info!(
        issuer = issuer.as_str(),
        revocation = revocation_endpoint(&metadata).is_some(),
        end_session = end_session_endpoint(&metadata).is_some(),
        "Discovered OpenID provider"
    );

    Ok(metadata)
}
