use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use url::Url;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SCOPE: &str = "openid email profile";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Session secrets need enough material to be worth deriving a key from.
const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A value that must never show up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Which of the route families are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flows {
    /// Render HTML pages instead of JSON payloads
    pub enable_templates: bool,
    /// Serve `/loginext` and `/logoutext`
    pub enable_ropc: bool,
    /// Include the raw token set in login results
    pub enable_view_output: bool,
}

impl Default for Flows {
    fn default() -> Self {
        Self {
            enable_templates: false,
            enable_ropc: false,
            enable_view_output: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub discovery_url: Url,
    pub client_id: String,
    pub client_secret: Secret,
    /// Registered redirect URI; only the browser-facing client has one
    pub callback_url: Option<Url>,
    /// `None` means no scope parameter is sent
    pub scope: Option<String>,
    pub post_logout_redirect_uri: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: Secret,
    pub salt: Secret,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub session: SessionConfig,
    pub acg: ClientConfig,
    pub ropc: Option<ClientConfig>,
    pub flows: Flows,
    pub http_timeout: Duration,
    pub strict_remote_logout: bool,
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build and validate the configuration from an arbitrary variable source.
    ///
    /// Every required value is checked here so that a misconfigured process
    /// never gets as far as binding a socket.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let flows = Flows {
            enable_templates: env.flag("ENABLE_TEMPLATES", false)?,
            enable_ropc: env.flag("ENABLE_ROPC", false)?,
            enable_view_output: env.flag("ENABLE_VIEW_OUTPUT", true)?,
        };

        let host = env
            .optional("HOST")
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match env.optional("PORT") {
            Some(port) => port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };
        let bind_addr = bind_addr(&host, port)?;

        let acg = ClientConfig {
            discovery_url: env.url("OIDC_DISCOVERY_URL")?,
            client_id: env.required("OIDC_CLIENT_ID")?,
            client_secret: Secret::new(env.required("OIDC_CLIENT_SECRET")?),
            callback_url: Some(env.url("OIDC_CALLBACK_URL")?),
            scope: Some(
                env.optional("OIDC_SCOPE")
                    .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            ),
            post_logout_redirect_uri: env.optional_url("OIDC_POST_LOGOUT_REDIRECT_URI")?,
        };

        let ropc = if flows.enable_ropc {
            Some(ClientConfig {
                discovery_url: env
                    .optional_url("ROPC_DISCOVERY_URL")?
                    .unwrap_or_else(|| acg.discovery_url.clone()),
                client_id: env.required("ROPC_CLIENT_ID")?,
                client_secret: Secret::new(env.required("ROPC_CLIENT_SECRET")?),
                callback_url: None,
                scope: env.optional("ROPC_SCOPE"),
                post_logout_redirect_uri: None,
            })
        } else {
            None
        };

        let secret = env.required("SESSION_SECRET")?;
        if secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "SESSION_SECRET",
                reason: format!("must be at least {MIN_SESSION_SECRET_LEN} characters"),
            });
        }
        let callback_is_https = acg
            .callback_url
            .as_ref()
            .is_some_and(|url| url.scheme() == "https");
        let session = SessionConfig {
            secret: Secret::new(secret),
            salt: Secret::new(env.required("SESSION_SALT")?),
            cookie_secure: env.flag("COOKIE_SECURE", callback_is_https)?,
        };

        let http_timeout = match env.optional("HTTP_TIMEOUT_SECS") {
            Some(secs) => {
                let secs = secs.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    name: "HTTP_TIMEOUT_SECS",
                    reason: e.to_string(),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        name: "HTTP_TIMEOUT_SECS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        Ok(Self {
            bind_addr,
            session,
            acg,
            ropc,
            flows,
            http_timeout,
            strict_remote_logout: env.flag("STRICT_REMOTE_LOGOUT", false)?,
            sentry_dsn: env.optional("SENTRY_DSN"),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are treated the same.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn url(&self, name: &'static str) -> Result<Url, ConfigError> {
        parse_url(name, &self.required(name)?)
    }

    fn optional_url(&self, name: &'static str) -> Result<Option<Url>, ConfigError> {
        self.optional(name)
            .map(|value| parse_url(name, &value))
            .transpose()
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.optional(name) else {
            return Ok(default);
        };

        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }
}

/// `HOST` is an IP literal (v4 or bare v6) or a name resolved once at startup.
fn bind_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let invalid = |reason: String| ConfigError::Invalid {
        name: "HOST",
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid(format!("{host:?} did not resolve to an address")))
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme {scheme:?}"),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("SESSION_SECRET", "0123456789abcdef0123456789abcdef".to_string()),
            ("SESSION_SALT", "pepper".to_string()),
            (
                "OIDC_DISCOVERY_URL",
                "https://idp.example/realms/test".to_string(),
            ),
            ("OIDC_CLIENT_ID", "rp-web".to_string()),
            ("OIDC_CLIENT_SECRET", "web-secret".to_string()),
            (
                "OIDC_CALLBACK_URL",
                "https://rp.example/callback".to_string(),
            ),
        ])
    }

    pub(crate) fn config_from(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_minimal_configuration_uses_defaults() {
        let config = config_from(&base_vars()).unwrap();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.acg.scope.as_deref(), Some(DEFAULT_SCOPE));
        assert_eq!(config.flows, Flows::default());
        assert!(config.ropc.is_none());
        assert!(config.session.cookie_secure);
        assert!(!config.strict_remote_logout);
        assert_eq!(
            config.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_ipv6_host_is_bound_as_an_address() {
        let mut vars = base_vars();
        vars.insert("HOST", "::".to_string());
        vars.insert("PORT", "8080".to_string());

        let config = config_from(&vars).unwrap();
        assert_eq!(config.bind_addr, "[::]:8080".parse::<SocketAddr>().unwrap());

        vars.insert("HOST", "[::1]".to_string());
        let config = config_from(&vars).unwrap();
        assert_eq!(config.bind_addr, "[::1]:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_localhost_host_is_resolved() {
        let mut vars = base_vars();
        vars.insert("HOST", "localhost".to_string());

        let config = config_from(&vars).unwrap();
        assert!(config.bind_addr.ip().is_loopback());
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_malformed_host_is_rejected() {
        let mut vars = base_vars();
        vars.insert("HOST", "not a host".to_string());

        let err = config_from(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "HOST", .. }));
    }

    #[test]
    fn test_missing_client_secret_is_fatal() {
        let mut vars = base_vars();
        vars.remove("OIDC_CLIENT_SECRET");

        let err = config_from(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OIDC_CLIENT_SECRET")));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("SESSION_SALT", "   ".to_string());

        let err = config_from(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SESSION_SALT")));
    }

    #[test]
    fn test_short_session_secret_is_rejected() {
        let mut vars = base_vars();
        vars.insert("SESSION_SECRET", "too-short".to_string());

        let err = config_from(&vars).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "SESSION_SECRET",
                ..
            }
        ));
    }

    #[test]
    fn test_ropc_requires_its_own_client_credentials() {
        let mut vars = base_vars();
        vars.insert("ENABLE_ROPC", "true".to_string());

        let err = config_from(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ROPC_CLIENT_ID")));
    }

    #[test]
    fn test_ropc_falls_back_to_acg_discovery_url() {
        let mut vars = base_vars();
        vars.insert("ENABLE_ROPC", "yes".to_string());
        vars.insert("ROPC_CLIENT_ID", "rp-service".to_string());
        vars.insert("ROPC_CLIENT_SECRET", "service-secret".to_string());
        vars.insert("ROPC_SCOPE", "eduPersonAffiliation givenname sn uid".to_string());

        let config = config_from(&vars).unwrap();
        let ropc = config.ropc.unwrap();
        assert_eq!(ropc.discovery_url, config.acg.discovery_url);
        assert_eq!(
            ropc.scope.as_deref(),
            Some("eduPersonAffiliation givenname sn uid")
        );
        assert!(ropc.callback_url.is_none());
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let mut vars = base_vars();
        vars.insert("ENABLE_TEMPLATES", "sometimes".to_string());

        assert!(config_from(&vars).is_err());
    }

    #[test]
    fn test_non_http_discovery_url_is_rejected() {
        let mut vars = base_vars();
        vars.insert("OIDC_DISCOVERY_URL", "ftp://idp.example".to_string());

        assert!(config_from(&vars).is_err());
    }

    #[test]
    fn test_plain_http_callback_disables_secure_cookies() {
        let mut vars = base_vars();
        vars.insert("OIDC_CALLBACK_URL", "http://localhost:3000/callback".to_string());

        let config = config_from(&vars).unwrap();
        assert!(!config.session.cookie_secure);
    }

    #[test]
    fn test_secrets_are_redacted_in_debug_output() {
        let config = config_from(&base_vars()).unwrap();
        let debug = format!("{:?}", config);

        assert!(!debug.contains("web-secret"));
        assert!(!debug.contains("0123456789abcdef"));
        assert!(debug.contains("REDACTED"));
    }
}
