use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use openidconnect::core::{
    CoreGenderClaim, CoreJweContentEncryptionAlgorithm, CoreJwsSigningAlgorithm, CoreTokenType,
};
use openidconnect::{
    AdditionalClaims, EmptyExtraTokenFields, IdToken, IdTokenFields, OAuth2TokenResponse as _,
    StandardTokenResponse, TokenResponse as _, UserInfoClaims,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claims outside the OpenID Connect standard set, kept verbatim so that
/// provider specific claims reach the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraClaims {
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl AdditionalClaims for ExtraClaims {}

pub type RpIdToken = IdToken<
    ExtraClaims,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
>;

pub type RpTokenResponse = StandardTokenResponse<
    IdTokenFields<
        ExtraClaims,
        EmptyExtraTokenFields,
        CoreGenderClaim,
        CoreJweContentEncryptionAlgorithm,
        CoreJwsSigningAlgorithm,
    >,
    CoreTokenType,
>;

pub type RpUserInfoClaims = UserInfoClaims<ExtraClaims, CoreGenderClaim>;

/// Tokens issued by a successful grant.
///
/// Never persisted server side; it lives for one request and is handed to the
/// caller, who keeps the refresh token for a later logout.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// When the access token expires (as Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl TokenSet {
    pub fn from_token_response(response: &RpTokenResponse) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let expires_in = response.expires_in();

        Self {
            access_token: response.access_token().secret().clone(),
            token_type: token_type_name(response.token_type()),
            id_token: response.id_token().map(ToString::to_string),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            scope: response.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|scope| scope.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
            expires_in: expires_in.map(|d| d.as_secs()),
            expires_at: expires_at(now, expires_in),
        }
    }
}

/// Absolute expiry in Unix seconds. Saturates instead of wrapping when a
/// provider sends an absurd lifetime.
fn expires_at(now: u64, expires_in: Option<Duration>) -> Option<u64> {
    expires_in.map(|lifetime| now.saturating_add(lifetime.as_secs()))
}

fn token_type_name(token_type: &CoreTokenType) -> String {
    match token_type {
        CoreTokenType::Bearer => "Bearer".to_string(),
        other => match serde_json::to_value(other) {
            Ok(Value::String(name)) => name,
            _ => "Bearer".to_string(),
        },
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("token_type", &self.token_type)
            .field("id_token", &self.id_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct UserInfo(pub Map<String, Value>);

impl UserInfo {
    pub fn sub(&self) -> Option<&str> {
        self.claim("sub")
    }

    pub fn claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn claims(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Flatten typed userinfo claims back into the plain claim map.
    pub fn from_claims(claims: &RpUserInfoClaims) -> Result<Self, serde_json::Error> {
        serde_json::to_value(claims).and_then(serde_json::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: Value) -> RpTokenResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_token_set_from_response() {
        let token_set = TokenSet::from_token_response(&response(serde_json::json!({
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 300,
            "refresh_token": "rt",
            "scope": "openid email"
        })));

        assert_eq!(token_set.token_type, "Bearer");
        assert_eq!(token_set.refresh_token.as_deref(), Some("rt"));
        assert_eq!(token_set.scope.as_deref(), Some("openid email"));
        assert_eq!(token_set.expires_in, Some(300));
        assert!(token_set.expires_at.unwrap() >= 300);
        assert!(token_set.id_token.is_none());
    }

    #[test]
    fn test_huge_lifetime_saturates_expiry() {
        let token_set = TokenSet::from_token_response(&response(serde_json::json!({
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": u64::MAX
        })));

        assert_eq!(token_set.expires_in, Some(u64::MAX));
        assert_eq!(token_set.expires_at, Some(u64::MAX));
        assert_eq!(
            expires_at(1_700_000_000, Some(Duration::from_secs(u64::MAX - 1))),
            Some(u64::MAX)
        );
    }

    #[test]
    fn test_debug_output_does_not_contain_tokens() {
        let token_set = TokenSet {
            access_token: "secret-access".to_string(),
            token_type: "Bearer".to_string(),
            id_token: Some("secret-id".to_string()),
            refresh_token: Some("secret-refresh".to_string()),
            scope: None,
            expires_in: None,
            expires_at: None,
        };

        let debug = format!("{:?}", token_set);
        assert!(!debug.contains("secret-"));
    }

    #[test]
    fn test_userinfo_reads_string_claims() {
        let info: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "248289761001",
            "email": "jane@example.com",
            "email_verified": true
        }))
        .unwrap();

        assert_eq!(info.sub(), Some("248289761001"));
        assert_eq!(info.claim("email"), Some("jane@example.com"));
        assert_eq!(info.claim("email_verified"), None);
    }

    #[test]
    fn test_userinfo_keeps_non_standard_claims() {
        let claims = RpUserInfoClaims::from_json::<std::convert::Infallible>(
            serde_json::json!({
                "sub": "248289761001",
                "email": "jane@example.com",
                "groups": ["staff", "admin"],
                "tenant": "north"
            })
            .to_string()
            .as_bytes(),
            None,
        )
        .unwrap();

        let info = UserInfo::from_claims(&claims).unwrap();
        assert_eq!(info.sub(), Some("248289761001"));
        assert_eq!(info.claim("email"), Some("jane@example.com"));
        assert_eq!(info.claim("tenant"), Some("north"));
        assert_eq!(info.0["groups"], serde_json::json!(["staff", "admin"]));
    }
}
