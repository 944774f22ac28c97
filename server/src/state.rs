use std::sync::Arc;

use color_eyre::eyre::WrapErr as _;
use tower_cookies::Key;
use tracing::info;

use crate::config::Config;
use crate::errors::ResponseFormat;
use crate::flows::RemoteLogoutPolicy;
use crate::oidc::{build_http_client, discover, ClientRegistration, OidcClient, OidcProvider};
use crate::session::derive_cookie_key;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cookie_key: Key,
    /// Browser-facing Authorization Code client
    pub acg: Arc<dyn OidcProvider>,
    /// Service-facing password grant client, when that flow is enabled
    pub ropc: Option<Arc<dyn OidcProvider>>,
}

impl AppState {
    pub fn new(
        config: Config,
        acg: Arc<dyn OidcProvider>,
        ropc: Option<Arc<dyn OidcProvider>>,
    ) -> Self {
        let cookie_key = derive_cookie_key(
            config.session.secret.expose(),
            config.session.salt.expose(),
        );

        Self {
            config: Arc::new(config),
            cookie_key,
            acg,
            ropc,
        }
    }

    /// Discover every configured provider and register the clients.
    ///
    /// Each distinct discovery URL is fetched once. Any failure here aborts
    /// startup.
    pub async fn from_config(config: Config) -> color_eyre::Result<Self> {
        let http = build_http_client(config.http_timeout)
            .wrap_err("Failed to build HTTP client")?;

        let acg_metadata = discover(&http, &config.acg.discovery_url)
            .await
            .wrap_err("Failed to discover the authorization code provider")?;
        let acg: Arc<dyn OidcProvider> = Arc::new(OidcClient::new(
            http.clone(),
            &acg_metadata,
            ClientRegistration::from(&config.acg),
        ));

        let ropc = match &config.ropc {
            Some(ropc_config) => {
                let client = if ropc_config.discovery_url == config.acg.discovery_url {
                    OidcClient::new(
                        http.clone(),
                        &acg_metadata,
                        ClientRegistration::from(ropc_config),
                    )
                } else {
                    let metadata = discover(&http, &ropc_config.discovery_url)
                        .await
                        .wrap_err("Failed to discover the password grant provider")?;
                    OidcClient::new(http.clone(), &metadata, ClientRegistration::from(ropc_config))
                };
                Some(Arc::new(client) as Arc<dyn OidcProvider>)
            }
            None => None,
        };

        info!(
            ropc = ropc.is_some(),
            templates = config.flows.enable_templates,
            "OIDC clients registered"
        );

        Ok(Self::new(config, acg, ropc))
    }

    pub fn response_format(&self) -> ResponseFormat {
        if self.config.flows.enable_templates {
            ResponseFormat::Html
        } else {
            ResponseFormat::Json
        }
    }

    pub fn remote_logout_policy(&self) -> RemoteLogoutPolicy {
        if self.config.strict_remote_logout {
            RemoteLogoutPolicy::Strict
        } else {
            RemoteLogoutPolicy::Lenient
        }
    }

    pub fn login_scope(&self) -> &str {
        self.config
            .acg
            .scope
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_SCOPE)
    }
}
