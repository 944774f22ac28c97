use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse as _, Response},
};
use reqwest::StatusCode;
use sha2::{Digest, Sha512};
use tower_cookies::{
    cookie::{time::Duration, SameSite},
    Cookie, Cookies, Key,
};
use tracing::error;

use crate::state::AppState;

/// Session key holding the PKCE verifier between `/login` and `/callback`
pub const CODE_VERIFIER_KEY: &str = "code_verifier";

const COOKIE_PREFIX: &str = "rp_";

/// How long a pending login may take before its verifier cookie lapses
const PENDING_LOGIN_MINUTES: i64 = 10;

/// Per-browser key/value session state.
///
/// Handlers only see this interface; how the values are kept away from the
/// browser is up to the implementation.
pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn clear(&self, key: &str);
}

/// Derive the cookie encryption key from the configured secret and salt.
pub fn derive_cookie_key(secret: &str, salt: &str) -> Key {
    let digest = Sha512::new()
        .chain_update(salt.as_bytes())
        .chain_update(secret.as_bytes())
        .finalize();
    Key::from(digest.as_slice())
}

/// Session stored client side in private cookies, which are encrypted and
/// authenticated with the server key, so the browser can neither read nor
/// forge the values.
pub struct CookieSession {
    cookies: Cookies,
    key: Key,
    secure: bool,
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for CookieSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = match Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies,
            Err(_) => {
                error!("Failed to extract cookies from request");
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };

        Ok(CookieSession {
            cookies,
            key: state.cookie_key.clone(),
            secure: state.config.session.cookie_secure,
        })
    }
}

fn cookie_name(key: &str) -> String {
    format!("{COOKIE_PREFIX}{key}")
}

impl Session for CookieSession {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies
            .private(&self.key)
            .get(&cookie_name(key))
            .map(|cookie| cookie.value().to_string())
    }

    fn set(&self, key: &str, value: String) {
        // Lax so the cookie survives the top-level redirect back from the provider
        let cookie = Cookie::build((cookie_name(key), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(Duration::minutes(PENDING_LOGIN_MINUTES))
            .build();
        self.cookies.private(&self.key).add(cookie);
    }

    fn clear(&self, key: &str) {
        let cookie = Cookie::build((cookie_name(key), "")).path("/").build();
        self.cookies.private(&self.key).remove(cookie);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::Session;

    /// In-memory session for exercising handlers without cookies
    #[derive(Default)]
    pub(crate) struct MemorySession(Mutex<HashMap<String, String>>);

    impl Session for MemorySession {
        fn get(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: &str, value: String) {
            self.0.lock().unwrap().insert(key.to_string(), value);
        }

        fn clear(&self, key: &str) {
            self.0.lock().unwrap().remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_key_derivation_is_deterministic() {
        let a = derive_cookie_key("0123456789abcdef0123456789abcdef", "salt");
        let b = derive_cookie_key("0123456789abcdef0123456789abcdef", "salt");
        assert_eq!(a.master(), b.master());
    }

    #[test]
    fn test_cookie_key_depends_on_salt() {
        let a = derive_cookie_key("0123456789abcdef0123456789abcdef", "salt");
        let b = derive_cookie_key("0123456789abcdef0123456789abcdef", "pepper");
        assert_ne!(a.master(), b.master());
    }

    #[test]
    fn test_private_cookie_round_trip_hides_value() {
        let key = derive_cookie_key("0123456789abcdef0123456789abcdef", "salt");
        let cookies = Cookies::default();
        let session = CookieSession {
            cookies: cookies.clone(),
            key,
            secure: true,
        };

        session.set(CODE_VERIFIER_KEY, "verifier-value".to_string());
        assert_eq!(
            session.get(CODE_VERIFIER_KEY).as_deref(),
            Some("verifier-value")
        );

        let raw = cookies.get(&cookie_name(CODE_VERIFIER_KEY)).unwrap();
        assert_ne!(raw.value(), "verifier-value");
        assert_eq!(raw.http_only(), Some(true));
        assert_eq!(raw.same_site(), Some(SameSite::Lax));
        assert_eq!(raw.max_age(), Some(Duration::minutes(10)));
        assert_eq!(raw.path(), Some("/"));
        assert_eq!(raw.secure(), Some(true));

        session.clear(CODE_VERIFIER_KEY);
        assert!(session.get(CODE_VERIFIER_KEY).is_none());
    }

    #[test]
    fn test_insecure_sessions_drop_the_secure_attribute() {
        let cookies = Cookies::default();
        let session = CookieSession {
            cookies: cookies.clone(),
            key: derive_cookie_key("0123456789abcdef0123456789abcdef", "salt"),
            secure: false,
        };

        session.set(CODE_VERIFIER_KEY, "verifier-value".to_string());

        let raw = cookies.get(&cookie_name(CODE_VERIFIER_KEY)).unwrap();
        assert_eq!(raw.secure(), Some(false));
        assert_eq!(raw.max_age(), Some(Duration::minutes(PENDING_LOGIN_MINUTES)));
    }
}
