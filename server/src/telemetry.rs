use sentry::ClientInitGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};
use tracing_tree::HierarchicalLayer;

const DEFAULT_FILTER: &str = "info,oidc_rp=debug,tower_http=debug";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn setup_tracing() -> color_eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let hierarchical = HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(hierarchical)
        .try_init()?;

    Ok(())
}

/// Report panics and errors to Sentry when a DSN is configured. The guard
/// must be held for the lifetime of the process.
pub fn setup_sentry(dsn: Option<&str>) -> Option<ClientInitGuard> {
    let dsn = dsn?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate: 0.0,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        tracing::info!("Sentry reporting enabled");
    } else {
        tracing::warn!("SENTRY_DSN is set but Sentry could not be enabled");
    }

    Some(guard)
}
